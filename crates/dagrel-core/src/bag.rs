//! Bags: unordered multisets of tuples with restartable iteration.
//!
//! A bag is either fully in memory or backed by a [`PageSource`] (pages
//! spilled by `dagrel-mem`) plus an in-memory tail. Bags are immutable and
//! cheap to clone; every call to [`Bag::iter`] starts a fresh pass that
//! re-reads the backing pages from the beginning.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::value::Tuple;

/// Paged backing store for a spilled bag.
///
/// Reading a page may block on bounded I/O; implementations must be
/// deterministic so that re-reading a page yields the same tuples.
pub trait PageSource: Send + Sync + fmt::Debug {
    fn page_count(&self) -> usize;
    fn read_page(&self, index: usize) -> Result<Vec<Tuple>>;
}

#[derive(Clone)]
enum Backing {
    Memory(Arc<Vec<Tuple>>),
    Paged {
        pages: Arc<dyn PageSource>,
        tail: Arc<Vec<Tuple>>,
    },
}

#[derive(Clone)]
pub struct Bag {
    backing: Backing,
    len: usize,
}

impl Bag {
    pub fn empty() -> Self {
        Self::from_tuples(Vec::new())
    }

    pub fn from_tuples(rows: Vec<Tuple>) -> Self {
        let len = rows.len();
        Self {
            backing: Backing::Memory(Arc::new(rows)),
            len,
        }
    }

    /// Bag over spilled pages followed by `tail`; `len` counts both.
    pub fn paged(pages: Arc<dyn PageSource>, tail: Vec<Tuple>, len: usize) -> Self {
        Self {
            backing: Backing::Paged {
                pages,
                tail: Arc::new(tail),
            },
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_paged(&self) -> bool {
        matches!(self.backing, Backing::Paged { .. })
    }

    /// In-memory contents, if the bag is not paged.
    pub fn in_memory(&self) -> Option<&[Tuple]> {
        match &self.backing {
            Backing::Memory(rows) => Some(rows),
            Backing::Paged { .. } => None,
        }
    }

    pub fn iter(&self) -> BagIter<'_> {
        BagIter {
            bag: self,
            page: 0,
            buffer: Vec::new().into_iter(),
            pos: 0,
            failed: false,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<Tuple>> {
        self.iter().collect()
    }

    /// Contents for ordering/hashing, where errors cannot be propagated.
    /// Unreadable pages are skipped and logged.
    pub(crate) fn snapshot(&self) -> Vec<Tuple> {
        match &self.backing {
            Backing::Memory(rows) => rows.as_ref().clone(),
            Backing::Paged { .. } => self
                .iter()
                .filter_map(|r| match r {
                    Ok(t) => Some(t),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable bag page");
                        None
                    }
                })
                .collect(),
        }
    }

    pub fn estimated_size(&self) -> usize {
        match &self.backing {
            Backing::Memory(rows) => rows.iter().map(Tuple::estimated_size).sum(),
            Backing::Paged { tail, .. } => tail.iter().map(Tuple::estimated_size).sum(),
        }
    }
}

/// One pass over a bag. Yields `Err` at most once, when a page fails to load.
pub struct BagIter<'a> {
    bag: &'a Bag,
    page: usize,
    buffer: std::vec::IntoIter<Tuple>,
    pos: usize,
    failed: bool,
}

impl Iterator for BagIter<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match &self.bag.backing {
            Backing::Memory(rows) => {
                let t = rows.get(self.pos)?.clone();
                self.pos += 1;
                Some(Ok(t))
            }
            Backing::Paged { pages, tail } => loop {
                if let Some(t) = self.buffer.next() {
                    return Some(Ok(t));
                }
                if self.page < pages.page_count() {
                    let idx = self.page;
                    self.page += 1;
                    match pages.read_page(idx) {
                        Ok(rows) => self.buffer = rows.into_iter(),
                        Err(e) => {
                            self.failed = true;
                            return Some(Err(e));
                        }
                    }
                    continue;
                }
                let t = tail.get(self.pos)?.clone();
                self.pos += 1;
                return Some(Ok(t));
            },
        }
    }
}

impl Ord for Bag {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.len.cmp(&other.len) {
            Ordering::Equal => {}
            ord => return ord,
        }
        let mut a = self.snapshot();
        let mut b = other.snapshot();
        a.sort();
        b.sort();
        a.cmp(&b)
    }
}

impl PartialOrd for Bag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Bag {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Bag {}

impl fmt::Debug for Bag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bag")
            .field("len", &self.len)
            .field("paged", &self.is_paged())
            .finish()
    }
}

impl fmt::Display for Bag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, t) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match t {
                Ok(t) => write!(f, "{t}")?,
                Err(_) => return Err(fmt::Error),
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::value::Value;

    #[derive(Debug)]
    struct TwoPages;

    impl PageSource for TwoPages {
        fn page_count(&self) -> usize {
            2
        }
        fn read_page(&self, index: usize) -> Result<Vec<Tuple>> {
            Ok(vec![Tuple::new(vec![Value::Int(index as i32)])])
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl PageSource for Broken {
        fn page_count(&self) -> usize {
            1
        }
        fn read_page(&self, _: usize) -> Result<Vec<Tuple>> {
            Err(Error::IoLike("gone".into()))
        }
    }

    #[test]
    fn paged_bag_is_restartable() {
        let bag = Bag::paged(
            Arc::new(TwoPages),
            vec![Tuple::new(vec![Value::Int(9)])],
            3,
        );
        let first = bag.to_vec().unwrap();
        let second = bag.to_vec().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), bag.len());
        assert_eq!(bag.to_string(), "{(0),(1),(9)}");
    }

    #[test]
    fn empty_bag_is_not_null() {
        let bag = Bag::empty();
        assert!(bag.is_empty());
        assert_eq!(bag.iter().count(), 0);
        assert_ne!(Value::Bag(bag), Value::Null);
    }

    #[test]
    fn page_failure_surfaces_once() {
        let bag = Bag::paged(Arc::new(Broken), Vec::new(), 1);
        let items: Vec<_> = bag.iter().collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}
