//! External sort with run generation and k-way merge, plus bounded top-K.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use dagrel_core::value::{compare_rows, SortKey, Tuple};
use dagrel_mem::spill::SegmentMeta;
use dagrel_mem::SpillManager;

use super::run::{RunGenerator, RunMeta};
use crate::traits::{expect_inputs, EvalContext, Keyed, Operator, Result};

/// Sorts one bucket on `keys`; stable for equal keys.
///
/// With a `limit`, only the first `limit` rows in sort order are kept and
/// the sort never buffers more than that many rows. Without a spill
/// context, or when the bucket holds at most `run_rows` rows, it sorts in
/// memory; otherwise it spills sorted runs and merges them.
#[derive(Debug, Clone)]
pub struct ExternalSort {
    pub keys: Vec<SortKey>,
    pub limit: Option<u64>,
    pub run_rows: usize,
}

impl ExternalSort {
    pub fn new(keys: Vec<SortKey>, limit: Option<u64>, run_rows: usize) -> Self {
        Self {
            keys,
            limit,
            run_rows,
        }
    }

    pub fn sort(&self, rows: Vec<Tuple>, ctx: &EvalContext) -> Result<Vec<Tuple>> {
        if let Some(k) = self.limit {
            return Ok(top_k(rows, &self.keys, usize::try_from(k).unwrap_or(usize::MAX)));
        }
        match ctx.spill() {
            Some(spill) if rows.len() > self.run_rows => {
                let mut gen = RunGenerator::new(spill.clone(), self.keys.clone(), self.run_rows);
                for row in rows {
                    gen.add(row)?;
                }
                let (runs, tail) = gen.finalize();
                let out = k_way_merge(&spill.manager, &runs, tail, &self.keys);
                for run in &runs {
                    for page in &run.pages {
                        if let Err(e) = spill.manager.delete_segment(&page.name) {
                            tracing::warn!(segment = %page.name.0, error = %e, "failed to delete sort run");
                        }
                    }
                }
                out
            }
            _ => {
                let mut rows = rows;
                rows.sort_by(|a, b| compare_rows(a, b, &self.keys));
                Ok(rows)
            }
        }
    }
}

impl Operator for ExternalSort {
    fn name(&self) -> &'static str {
        "sort_external"
    }

    fn arity(&self) -> usize {
        1
    }

    fn eval_bucket(&self, inputs: Vec<Vec<Keyed>>, ctx: &EvalContext) -> Result<Vec<Tuple>> {
        expect_inputs(self, &inputs)?;
        let rows = inputs.into_iter().flatten().map(|k| k.row).collect();
        self.sort(rows, ctx)
    }
}

/// Pages of one run, read back one page at a time.
struct RunCursor<'a> {
    manager: &'a SpillManager,
    pages: std::slice::Iter<'a, SegmentMeta>,
    rows: std::vec::IntoIter<Tuple>,
}

impl RunCursor<'_> {
    fn next_row(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(t) = self.rows.next() {
                return Ok(Some(t));
            }
            match self.pages.next() {
                Some(meta) => self.rows = self.manager.read_page(meta)?.into_iter(),
                None => return Ok(None),
            }
        }
    }
}

/// Merge sorted runs (and the in-memory tail, which came last) with a min-heap.
fn k_way_merge(
    manager: &SpillManager,
    runs: &[RunMeta],
    tail: Vec<Tuple>,
    keys: &[SortKey],
) -> Result<Vec<Tuple>> {
    let mut cursors: Vec<RunCursor<'_>> = runs
        .iter()
        .map(|r| RunCursor {
            manager,
            pages: r.pages.iter(),
            rows: Vec::new().into_iter(),
        })
        .collect();
    let no_pages: &[SegmentMeta] = &[];
    cursors.push(RunCursor {
        manager,
        pages: no_pages.iter(),
        rows: tail.into_iter(),
    });

    let total: u64 = runs.iter().map(|r| r.rows).sum();
    let mut out = Vec::with_capacity(usize::try_from(total).unwrap_or(0));
    let mut heap: BinaryHeap<MergeEntry<'_>> = BinaryHeap::new();
    for (run, cursor) in cursors.iter_mut().enumerate() {
        if let Some(row) = cursor.next_row()? {
            heap.push(MergeEntry { row, run, keys });
        }
    }
    while let Some(entry) = heap.pop() {
        let run = entry.run;
        out.push(entry.row);
        if let Some(row) = cursors[run].next_row()? {
            heap.push(MergeEntry { row, run, keys });
        }
    }
    Ok(out)
}

/// Entry in the merge heap, ordered for min-heap behavior. Ties go to the
/// earlier run, which keeps the merge stable.
struct MergeEntry<'k> {
    row: Tuple,
    run: usize,
    keys: &'k [SortKey],
}

impl PartialEq for MergeEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry<'_> {}

impl PartialOrd for MergeEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&other.row, &self.row, self.keys).then_with(|| other.run.cmp(&self.run))
    }
}

/// Entry of the top-K heap: the largest kept row sits on top.
struct TopEntry<'k> {
    row: Tuple,
    seq: usize,
    keys: &'k [SortKey],
}

impl PartialEq for TopEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TopEntry<'_> {}

impl PartialOrd for TopEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&self.row, &other.row, self.keys).then_with(|| self.seq.cmp(&other.seq))
    }
}

/// First `k` rows in (stable) sort order, holding at most `k + 1` rows.
pub fn top_k(rows: Vec<Tuple>, keys: &[SortKey], k: usize) -> Vec<Tuple> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<TopEntry<'_>> = BinaryHeap::new();
    for (seq, row) in rows.into_iter().enumerate() {
        heap.push(TopEntry { row, seq, keys });
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_sorted_vec().into_iter().map(|e| e.row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use dagrel_core::value::Value;
    use dagrel_io::MemoryStorage;
    use dagrel_mem::{Codec, MemoryBudgetImpl, SpillContext, Storage};

    fn rows(keys: &[i32]) -> Vec<Tuple> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| Tuple::new(vec![Value::Int(*k), Value::Int(i as i32)]))
            .collect()
    }

    fn spilling(storage: Arc<MemoryStorage>, cap: usize) -> EvalContext {
        EvalContext::new().with_spill(SpillContext {
            manager: Arc::new(SpillManager::new(storage, Codec::None, "spill")),
            budget: MemoryBudgetImpl::new(cap),
            page_rows: 2,
        })
    }

    #[test]
    fn in_memory_sort_is_stable() {
        let out = ExternalSort::new(vec![SortKey::asc(0)], None, 100)
            .sort(rows(&[2, 1, 2, 1]), &EvalContext::new())
            .unwrap();
        assert_eq!(out, vec![
            Tuple::new(vec![Value::Int(1), Value::Int(1)]),
            Tuple::new(vec![Value::Int(1), Value::Int(3)]),
            Tuple::new(vec![Value::Int(2), Value::Int(0)]),
            Tuple::new(vec![Value::Int(2), Value::Int(2)]),
        ]);
    }

    #[test]
    fn spilled_runs_merge_like_an_in_memory_sort() {
        let storage = Arc::new(MemoryStorage::new());
        let ctx = spilling(storage.clone(), 1 << 20);
        let input = rows(&[5, 3, 9, 1, 3, 7, 0, 8, 2, 3, 6]);
        let sorter = ExternalSort::new(vec![SortKey::desc(0)], None, 3);
        let spilled = sorter.sort(input.clone(), &ctx).unwrap();
        let in_memory = sorter.sort(input, &EvalContext::new()).unwrap();
        assert_eq!(spilled, in_memory);
        assert!(storage.list("spill/").unwrap().is_empty());
    }

    #[test]
    fn tight_budget_still_sorts() {
        let storage = Arc::new(MemoryStorage::new());
        let one = rows(&[0])[0].estimated_size();
        let ctx = spilling(storage, one * 2);
        let out = ExternalSort::new(vec![SortKey::asc(0)], None, 4)
            .sort(rows(&[4, 3, 2, 1, 0, 5]), &ctx)
            .unwrap();
        let keys: Vec<Value> = out.iter().map(|t| t.get(0).clone()).collect();
        assert_eq!(keys, (0..6).map(Value::Int).collect::<Vec<_>>());
    }

    #[test]
    fn top_k_keeps_smallest_in_order() {
        let out = top_k(rows(&[5, 1, 4, 1, 3]), &[SortKey::asc(0)], 3);
        let keys: Vec<Value> = out.iter().map(|t| t.get(0).clone()).collect();
        assert_eq!(keys, vec![Value::Int(1), Value::Int(1), Value::Int(3)]);
        assert_eq!(out[0].get(1), &Value::Int(1));
        assert!(top_k(rows(&[1]), &[SortKey::asc(0)], 0).is_empty());
        assert_eq!(top_k(rows(&[2, 1]), &[SortKey::desc(0)], 10).len(), 2);
    }

    #[test]
    fn empty_input() {
        let out = ExternalSort::new(vec![SortKey::asc(0)], None, 1)
            .sort(Vec::new(), &EvalContext::new())
            .unwrap();
        assert!(out.is_empty());
    }
}
