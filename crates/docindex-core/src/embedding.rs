//! Vector utilities shared by the stores and the local backend.
//!
//! Stored vectors are kept as the backend returned them. Ranking normalizes
//! the query once per search through [`QueryVector`], so each candidate costs
//! one dot product and one norm.

/// Bytes per stored component.
const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Encode a vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use docindex_core::embedding::{decode_vector, encode_vector};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = encode_vector(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(decode_vector(&blob, 3), Some(v));
/// assert_eq!(decode_vector(&blob, 4), None);
/// ```
pub fn encode_vector(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode bytes written by [`encode_vector`]. `None` unless the blob holds
/// exactly `dims` components.
pub fn decode_vector(blob: &[u8], dims: usize) -> Option<Vec<f32>> {
    if blob.len() != dims * F32_BYTES {
        return None;
    }
    Some(
        blob.chunks_exact(F32_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn l2_normalize(v: &mut [f32]) {
    let n = norm(v);
    if n > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
}

/// A unit-length query, scored against raw candidates by cosine similarity.
#[derive(Debug, Clone)]
pub struct QueryVector {
    unit: Vec<f32>,
    zero: bool,
}

impl QueryVector {
    pub fn new(vector: &[f32]) -> Self {
        let mut unit = vector.to_vec();
        let zero = norm(&unit) <= f32::EPSILON;
        l2_normalize(&mut unit);
        Self { unit, zero }
    }

    pub fn dims(&self) -> usize {
        self.unit.len()
    }

    /// Cosine similarity in `[-1.0, 1.0]`. `0.0` when either side is empty
    /// or zero, or the lengths differ.
    pub fn score(&self, candidate: &[f32]) -> f32 {
        if self.zero || candidate.len() != self.unit.len() {
            return 0.0;
        }
        let n = norm(candidate);
        if n <= f32::EPSILON {
            return 0.0;
        }
        (dot(&self.unit, candidate) / n).clamp(-1.0, 1.0)
    }
}
