//! Front ends that produce an operator DAG.

pub mod yaml;
