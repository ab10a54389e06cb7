//! Seeded reservoir sampling of keys.
//!
//! The sample drives the order range partitioner and the skewed-join heavy
//! key detection. The seed is an explicit parameter; the same input and
//! seed always give the same sample.

use dagrel_core::value::{Tuple, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Reservoir sample of at most `size` keys, one 1-tuple per sampled key.
pub fn reservoir(keys: impl IntoIterator<Item = Value>, size: usize, seed: u64) -> Vec<Tuple> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sample: Vec<Tuple> = Vec::with_capacity(size);
    for (seen, key) in keys.into_iter().enumerate() {
        if sample.len() < size {
            sample.push(Tuple::new(vec![key]));
        } else {
            let j = rng.gen_range(0..=seen);
            if j < size {
                sample[j] = Tuple::new(vec![key]);
            }
        }
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: i32) -> impl Iterator<Item = Value> {
        (0..n).map(Value::Int)
    }

    #[test]
    fn small_input_is_kept_whole() {
        assert_eq!(reservoir(keys(3), 10, 1).len(), 3);
    }

    #[test]
    fn same_seed_same_sample() {
        let a = reservoir(keys(1000), 20, 0x5eed);
        let b = reservoir(keys(1000), 20, 0x5eed);
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert_ne!(a, reservoir(keys(1000), 20, 7));
    }

    #[test]
    fn zero_size() {
        assert!(reservoir(keys(10), 0, 1).is_empty());
    }
}
