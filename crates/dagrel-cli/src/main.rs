//! dagrel CLI: run, explain and validate YAML operator DAGs.

use clap::{Parser, Subcommand};
use dagrel_core::config::EngineConfig;
use dagrel_exec::{Engine, ExecError};
use dagrel_io::build_storage;
use dagrel_planner::{parse_yaml_dag, ParsedDag};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dagrel")]
#[command(about = "Dataflow relational engine over YAML operator DAGs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every store of a DAG and print the run manifest
    Run {
        /// Path to the DAG YAML file
        #[arg(short, long)]
        dag: PathBuf,

        /// Memory cap in bytes (overrides config)
        #[arg(long)]
        mem_cap: Option<usize>,

        /// Default shuffle parallelism (overrides config)
        #[arg(long)]
        parallelism: Option<usize>,

        /// Sampling seed (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Spill directory (overrides config)
        #[arg(long)]
        spill_dir: Option<String>,

        /// Storage backend: `file://` or `memory://`
        #[arg(long, default_value = "file://", env = "DAGREL_STORAGE")]
        storage: String,
    },

    /// Parse a DAG and compile it without reading data
    Validate {
        #[arg(short, long)]
        dag: PathBuf,
    },

    /// Show the logical plan and the stage list of a DAG
    Explain {
        #[arg(short, long)]
        dag: PathBuf,

        /// Default shuffle parallelism used for planning
        #[arg(long)]
        parallelism: Option<usize>,
    },
}

struct Overrides {
    mem_cap: Option<usize>,
    parallelism: Option<usize>,
    seed: Option<u64>,
    spill_dir: Option<String>,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Run {
            dag,
            mem_cap,
            parallelism,
            seed,
            spill_dir,
            storage,
        } => run_dag(
            &dag,
            &storage,
            Overrides {
                mem_cap,
                parallelism,
                seed,
                spill_dir,
            },
        ),
        Commands::Validate { dag } => validate_dag(&dag),
        Commands::Explain { dag, parallelism } => explain_dag(&dag, parallelism),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ExecError>() {
                Some(exec) => eprintln!("error {}: {exec}", exec.code()),
                None => eprintln!("error: {e}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn load(path: &Path) -> CliResult<ParsedDag> {
    let src = fs::read_to_string(path)?;
    Ok(parse_yaml_dag(&src)?)
}

/// Defaults, then `DAGREL_*` variables, then the document's `config:` block, then flags.
fn resolve_config(parsed: &ParsedDag, flags: &Overrides) -> EngineConfig {
    let mut cfg = EngineConfig::from_env();
    parsed.config.apply(&mut cfg);
    if let Some(v) = flags.mem_cap {
        cfg.mem_cap_bytes = v;
    }
    if let Some(v) = flags.parallelism {
        cfg.default_parallelism = v;
    }
    if let Some(v) = flags.seed {
        cfg.seed = v;
    }
    if let Some(v) = &flags.spill_dir {
        cfg.spill_dir = v.clone();
    }
    cfg
}

fn targets(parsed: &ParsedDag) -> Vec<&str> {
    parsed.outputs.iter().map(String::as_str).collect()
}

fn run_dag(path: &Path, storage: &str, flags: Overrides) -> CliResult<()> {
    let parsed = load(path)?;
    let cfg = resolve_config(&parsed, &flags);
    let engine = Engine::new(cfg, build_storage(storage)?)?;
    let (logical, program) = engine.compile(&parsed.dag, &targets(&parsed))?;
    let execution = engine.execute(&program)?;

    for alias in &parsed.outputs {
        let name = logical
            .alias(alias)
            .map(|id| logical.node(id).name.clone())
            .unwrap_or_else(|| alias.clone());
        println!("-- {alias}");
        for row in execution.rows(&name).unwrap_or_default() {
            println!("{row}");
        }
    }
    println!("{}", serde_json::to_string_pretty(&execution.manifest)?);
    Ok(())
}

fn validate_dag(path: &Path) -> CliResult<()> {
    let parsed = load(path)?;
    let cfg = resolve_config(
        &parsed,
        &Overrides {
            mem_cap: None,
            parallelism: None,
            seed: None,
            spill_dir: None,
        },
    );
    let (_, program) = dagrel_planner::plan(&parsed.dag, &targets(&parsed), &cfg).map_err(ExecError::from)?;
    println!(
        "ok: {} relation(s), {} stage(s)",
        parsed.dag.relations.len(),
        program.stages.len()
    );
    Ok(())
}

fn explain_dag(path: &Path, parallelism: Option<usize>) -> CliResult<()> {
    let parsed = load(path)?;
    let cfg = resolve_config(
        &parsed,
        &Overrides {
            mem_cap: None,
            parallelism,
            seed: None,
            spill_dir: None,
        },
    );
    let (logical, program) = dagrel_planner::plan(&parsed.dag, &targets(&parsed), &cfg).map_err(ExecError::from)?;

    println!("Logical plan");
    println!("============");
    println!("{logical}");
    println!("Stages");
    println!("======");
    println!("{}", program.explain());
    println!("Plan hash: {}", program.plan_hash().map_err(ExecError::from)?.to_hex());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
config:
  default_parallelism: 3
  seed: 7
relations:
  - alias: A
    op: load
    location: "in/a"
    schema: "x:int"
outputs: [A]
"#;

    #[test]
    fn flags_override_document_config() {
        let parsed = parse_yaml_dag(DOC).unwrap();
        let cfg = resolve_config(
            &parsed,
            &Overrides {
                mem_cap: None,
                parallelism: Some(5),
                seed: None,
                spill_dir: Some("/tmp/cli-spill".into()),
            },
        );
        assert_eq!(cfg.default_parallelism, 5);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.spill_dir, "/tmp/cli-spill");
        assert_eq!(targets(&parsed), vec!["A"]);
    }
}
