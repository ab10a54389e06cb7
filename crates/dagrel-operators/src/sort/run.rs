//! Run generation for external sort.
//!
//! Accumulates rows in memory while the budget allows, sorts them, and
//! writes the sorted run to spill storage as a sequence of pages.

use dagrel_core::budget::MemoryBudget;
use dagrel_core::id::SpillId;
use dagrel_core::value::{compare_rows, SortKey, Tuple};
use dagrel_mem::guard::BudgetGuardImpl;
use dagrel_mem::spill::SegmentMeta;
use dagrel_mem::SpillContext;

use crate::traits::Result;

/// A sorted run on spill storage.
#[derive(Clone, Debug)]
pub struct RunMeta {
    pub rows: u64,
    pub pages: Vec<SegmentMeta>,
}

/// Generator for sorted runs.
///
/// A run is flushed when the buffer reaches `max_rows` or the budget
/// refuses to cover the buffered bytes.
pub struct RunGenerator {
    spill: SpillContext,
    spill_id: SpillId,
    keys: Vec<SortKey>,
    buffer: Vec<Tuple>,
    buffer_bytes: usize,
    guard: Option<BudgetGuardImpl>,
    max_rows: usize,
    next_page: u32,
    runs: Vec<RunMeta>,
}

impl RunGenerator {
    pub fn new(spill: SpillContext, keys: Vec<SortKey>, max_rows: usize) -> Self {
        let spill_id = spill.manager.next_spill_id();
        Self {
            spill,
            spill_id,
            keys,
            buffer: Vec::new(),
            buffer_bytes: 0,
            guard: None,
            max_rows: max_rows.max(1),
            next_page: 0,
            runs: Vec::new(),
        }
    }

    pub fn add(&mut self, row: Tuple) -> Result<()> {
        let size = row.estimated_size();
        if !self.reserve(self.buffer_bytes + size) {
            self.flush_run()?;
            // A single row larger than the budget is still sorted; it only
            // ever sits in memory alone.
            self.reserve(size);
        }
        self.buffer.push(row);
        self.buffer_bytes += size;
        if self.buffer.len() >= self.max_rows {
            self.flush_run()?;
        }
        Ok(())
    }

    fn reserve(&mut self, bytes: usize) -> bool {
        match &mut self.guard {
            Some(g) => g.try_resize(bytes),
            None => match self.spill.budget.try_acquire(bytes, "sort") {
                Some(g) => {
                    self.guard = Some(g);
                    true
                }
                None => false,
            },
        }
    }

    /// Flush the current buffer as one sorted run.
    fn flush_run(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let keys = &self.keys;
        self.buffer.sort_by(|a, b| compare_rows(a, b, keys));

        let page_rows = self.spill.page_rows.max(1);
        let mut pages = Vec::new();
        for chunk in self.buffer.chunks(page_rows) {
            let meta = self
                .spill
                .manager
                .write_page(self.spill_id, self.next_page, chunk)?;
            self.next_page += 1;
            pages.push(meta);
        }
        self.runs.push(RunMeta {
            rows: self.buffer.len() as u64,
            pages,
        });
        tracing::trace!(run = self.runs.len(), rows = self.buffer.len(), "flushed sort run");

        self.buffer.clear();
        self.buffer_bytes = 0;
        if let Some(g) = &mut self.guard {
            g.try_resize(0);
        }
        Ok(())
    }

    /// Finish run generation. Returns the spilled runs plus the rows still
    /// buffered, sorted; those were never written.
    pub fn finalize(mut self) -> (Vec<RunMeta>, Vec<Tuple>) {
        let keys = &self.keys;
        self.buffer.sort_by(|a, b| compare_rows(a, b, keys));
        (std::mem::take(&mut self.runs), std::mem::take(&mut self.buffer))
    }
}
