//! Spillable bag construction.
//!
//! [`BagBuilder`] collects the tuples of one group bag. It keeps rows in
//! memory until either the row threshold is reached or the memory budget
//! refuses to grow, then writes the buffered rows as a page. The finished
//! bag re-reads its pages on every iteration, so nested operators can make
//! several passes over a bag without holding it all in memory.

use std::fmt;
use std::sync::Arc;

use dagrel_core::bag::{Bag, PageSource};
use dagrel_core::budget::MemoryBudget;
use dagrel_core::id::SpillId;
use dagrel_core::value::Tuple;

use crate::error::{Error, Result};
use crate::guard::{BudgetGuardImpl, MemoryBudgetImpl};
use crate::spill::{SegmentMeta, SpillManager};

/// Pages written for one bag. Segments are deleted when the last bag
/// handle referencing them is dropped.
pub struct SpilledPages {
    manager: Arc<SpillManager>,
    pages: Vec<SegmentMeta>,
}

impl fmt::Debug for SpilledPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpilledPages")
            .field("pages", &self.pages.len())
            .finish()
    }
}

impl PageSource for SpilledPages {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn read_page(&self, index: usize) -> dagrel_core::Result<Vec<Tuple>> {
        let meta = self.pages.get(index).ok_or_else(|| {
            dagrel_core::Error::Invariant(format!(
                "page {index} out of range ({} pages)",
                self.pages.len()
            ))
        })?;
        Ok(self.manager.read_page(meta)?)
    }
}

impl Drop for SpilledPages {
    fn drop(&mut self) {
        for meta in &self.pages {
            if let Err(e) = self.manager.delete_segment(&meta.name) {
                tracing::warn!(segment = %meta.name.0, error = %e, "failed to delete spill page");
            }
        }
    }
}

/// What a builder needs to page rows out.
#[derive(Debug, Clone)]
pub struct SpillContext {
    pub manager: Arc<SpillManager>,
    pub budget: MemoryBudgetImpl,
    /// Rows kept in memory per bag before a page is written.
    pub page_rows: usize,
}

pub struct BagBuilder {
    spill: Option<SpillContext>,
    guard: Option<BudgetGuardImpl>,
    id: Option<SpillId>,
    buffer: Vec<Tuple>,
    buffer_bytes: usize,
    pages: Vec<SegmentMeta>,
    len: usize,
}

impl BagBuilder {
    /// Builder that never spills.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn new(spill: Option<SpillContext>) -> Self {
        Self {
            spill,
            guard: None,
            id: None,
            buffer: Vec::new(),
            buffer_bytes: 0,
            pages: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, row: Tuple) -> Result<()> {
        let Some(ctx) = self.spill.clone() else {
            self.buffer.push(row);
            self.len += 1;
            return Ok(());
        };

        let size = row.estimated_size();
        if !self.reserve(&ctx, self.buffer_bytes + size) {
            self.flush(&ctx)?;
            if !self.reserve(&ctx, size) {
                return Err(Error::BudgetExceeded {
                    tag: "bag",
                    requested: size,
                    capacity: ctx.budget.capacity_bytes(),
                    used: ctx.budget.used_bytes(),
                });
            }
        }
        self.buffer.push(row);
        self.buffer_bytes += size;
        self.len += 1;

        if self.buffer.len() >= ctx.page_rows.max(1) {
            self.flush(&ctx)?;
        }
        Ok(())
    }

    fn reserve(&mut self, ctx: &SpillContext, bytes: usize) -> bool {
        match &mut self.guard {
            Some(g) => g.try_resize(bytes),
            None => match ctx.budget.try_acquire(bytes, "bag") {
                Some(g) => {
                    self.guard = Some(g);
                    true
                }
                None => false,
            },
        }
    }

    fn flush(&mut self, ctx: &SpillContext) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let id = *self.id.get_or_insert_with(|| ctx.manager.next_spill_id());
        let meta = ctx
            .manager
            .write_page(id, self.pages.len() as u32, &self.buffer)?;
        self.pages.push(meta);
        self.buffer.clear();
        self.buffer_bytes = 0;
        if let Some(g) = &mut self.guard {
            g.try_resize(0);
        }
        Ok(())
    }

    /// Seal the bag. Unpaged rows stay in memory as the bag's tail.
    pub fn finish(self) -> Bag {
        let BagBuilder {
            spill,
            buffer,
            pages,
            len,
            ..
        } = self;
        match spill {
            Some(ctx) if !pages.is_empty() => {
                let source = SpilledPages {
                    manager: ctx.manager,
                    pages,
                };
                Bag::paged(Arc::new(source), buffer, len)
            }
            _ => Bag::from_tuples(buffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spill::tests::MapStorage;
    use crate::spill::Codec;
    use dagrel_core::value::Value;

    fn ctx(storage: Arc<MapStorage>, cap: usize, page_rows: usize) -> SpillContext {
        SpillContext {
            manager: Arc::new(SpillManager::new(storage, Codec::None, "spill")),
            budget: MemoryBudgetImpl::new(cap),
            page_rows,
        }
    }

    fn row(i: i32) -> Tuple {
        Tuple::new(vec![Value::Int(i)])
    }

    #[test]
    fn small_bag_stays_in_memory() {
        let storage = Arc::new(MapStorage::default());
        let mut b = BagBuilder::new(Some(ctx(storage, 1 << 20, 100)));
        for i in 0..3 {
            b.push(row(i)).unwrap();
        }
        let bag = b.finish();
        assert!(!bag.is_paged());
        assert_eq!(bag.len(), 3);
    }

    #[test]
    fn row_threshold_pages_and_iterates_twice() {
        let storage = Arc::new(MapStorage::default());
        let mut b = BagBuilder::new(Some(ctx(storage.clone(), 1 << 20, 2)));
        for i in 0..5 {
            b.push(row(i)).unwrap();
        }
        let bag = b.finish();
        assert!(bag.is_paged());
        assert_eq!(bag.len(), 5);
        assert_eq!(storage.files.lock().unwrap().len(), 2);

        let first = bag.to_vec().unwrap();
        let second = bag.to_vec().unwrap();
        assert_eq!(first, (0..5).map(row).collect::<Vec<_>>());
        assert_eq!(first, second);

        drop(bag);
        assert!(storage.files.lock().unwrap().is_empty());
    }

    #[test]
    fn budget_refusal_pages_early() {
        let storage = Arc::new(MapStorage::default());
        let one = row(0).estimated_size();
        let mut b = BagBuilder::new(Some(ctx(storage.clone(), one * 2, 1000)));
        for i in 0..5 {
            b.push(row(i)).unwrap();
        }
        let bag = b.finish();
        assert!(bag.is_paged());
        assert_eq!(bag.to_vec().unwrap().len(), 5);
    }
}
