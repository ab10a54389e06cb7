//! Abstract memory budget interfaces.
//!
//! The concrete implementation lives in `dagrel-mem`. Operators that buffer
//! rows (group bags, sorts, broadcast sides) ask the budget before growing and
//! page to spill storage when it refuses.

/// A reservation handed out by a [`MemoryBudget`]. Releases on drop.
pub trait BudgetGuard: Send {
    /// Number of bytes currently reserved by this guard.
    fn bytes(&self) -> usize;
    /// Debug tag for tracing.
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A handle representing a memory-cap enforcer.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Reserve `bytes`; `None` means the caller must spill or fail.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes).
    fn capacity_bytes(&self) -> usize;

    /// Approximate currently used bytes (advisory; not a correctness API).
    fn used_bytes(&self) -> usize;
}
