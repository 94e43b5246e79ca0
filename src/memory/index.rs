//! Exact nearest-neighbour index over fixed-width vectors.
//!
//! Brute force: a personal store holds thousands of entries, not millions.
//! Only [`MemoryStore`](super::MemoryStore) touches this type.

use std::collections::HashMap;

use crate::error::MemoryError;

use super::embed::Metric;

#[derive(Debug)]
pub(crate) struct VectorIndex {
    dims: usize,
    metric: Metric,
    vectors: HashMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub(crate) fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            vectors: HashMap::new(),
        }
    }

    pub(crate) fn dims(&self) -> usize {
        self.dims
    }

    pub(crate) fn metric(&self) -> Metric {
        self.metric
    }

    pub(crate) fn len(&self) -> usize {
        self.vectors.len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    pub(crate) fn get(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&String, &Vec<f32>)> {
        self.vectors.iter()
    }

    fn check_dims(&self, v: &[f32]) -> Result<(), MemoryError> {
        if v.len() != self.dims {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dims,
                actual: v.len(),
            });
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Err(MemoryError::Embedding("vector contains non-finite values".into()));
        }
        Ok(())
    }

    /// Insert a new vector.  Rejects wrong width and duplicate ids.
    pub(crate) fn insert(&mut self, id: &str, vector: Vec<f32>) -> Result<(), MemoryError> {
        self.check_dims(&vector)?;
        if self.vectors.contains_key(id) {
            return Err(MemoryError::Consistency {
                records: self.vectors.len(),
                vectors: self.vectors.len() + 1,
            });
        }
        self.vectors.insert(id.to_string(), vector);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.vectors.remove(id).is_some()
    }

    /// Distance from `query` to every indexed vector, unsorted.
    pub(crate) fn distances(&self, query: &[f32]) -> Result<Vec<(&str, f32)>, MemoryError> {
        self.check_dims(query)?;
        Ok(self
            .vectors
            .iter()
            .map(|(id, v)| (id.as_str(), self.metric.distance(query, v)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_width() {
        let mut idx = VectorIndex::new(3, Metric::L2);
        let err = idx.insert("a", vec![1.0, 2.0]).unwrap_err();
        assert_eq!(err, MemoryError::DimensionMismatch { expected: 3, actual: 2 });
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn rejects_duplicate_id() {
        let mut idx = VectorIndex::new(2, Metric::L2);
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        assert!(idx.insert("a", vec![0.0, 1.0]).is_err());
        assert_eq!(idx.get("a"), Some(&[1.0, 0.0][..]));
    }

    #[test]
    fn rejects_nan() {
        let mut idx = VectorIndex::new(2, Metric::Cosine);
        assert!(idx.insert("a", vec![f32::NAN, 0.0]).is_err());
    }

    #[test]
    fn distances_cover_every_vector() {
        let mut idx = VectorIndex::new(2, Metric::L2);
        idx.insert("a", vec![0.0, 0.0]).unwrap();
        idx.insert("b", vec![3.0, 4.0]).unwrap();
        let mut d = idx.distances(&[0.0, 0.0]).unwrap();
        d.sort_by(|x, y| x.1.total_cmp(&y.1));
        assert_eq!(d[0].0, "a");
        assert!((d[1].1 - 5.0).abs() < 1e-6);
        assert!(idx.remove("a"));
        assert!(!idx.contains("a"));
    }
}
