#![forbid(unsafe_code)]
//! dagrel-mem: memory budget, spill manager and spillable bags.
//!
//! Concrete implementations for the interfaces in `dagrel-core::budget` and
//! `dagrel-core::bag`. Operators that grow bags or sort buffers reserve bytes
//! through [`MemoryBudgetImpl`]; when a reservation is refused, or a bag
//! outgrows its row threshold, rows are paged out through [`SpillManager`].
//!
//! No filesystem code lives here. Spill segments go through the [`Storage`]
//! trait, implemented by `dagrel-io`.

pub mod error;
pub mod guard;
pub mod pages;
pub mod spill;

pub use error::{Error, Result};
pub use guard::{BudgetGuardImpl, MemoryBudgetImpl};
pub use pages::{BagBuilder, SpillContext, SpilledPages};
pub use spill::{Codec, SpillManager, Storage};
