//! Deterministic feature-hash embeddings
//!
//! Questions and reference documents embed into a fixed-dimension
//! bag-of-hashed-features sketch. This is not a learned model: the vector is
//! an approximate nearest-neighbor key, and reproducibility across processes
//! matters more than semantic quality. Lowercase the text, split on
//! whitespace, hash each token, scatter every digest byte into a bucket,
//! then L2-normalize.

/// Embed text into `dims` buckets.
///
/// Each whitespace token contributes its 32-byte blake3 digest: byte `b` at
/// digest position `i` adds 1.0 to bucket `(b + i * 31) % dims`. The result
/// is L2-normalized; empty input yields the all-zero vector. `dims` must be
/// nonzero (enforced by config validation).
pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut values = vec![0.0f32; dims];
    for token in text.to_lowercase().split_whitespace() {
        let digest = blake3::hash(token.as_bytes());
        for (i, byte) in digest.as_bytes().iter().enumerate() {
            let idx = (*byte as usize + i * 31) % dims;
            values[idx] += 1.0;
        }
    }
    normalize_embedding(&values)
}

/// L2-normalize a vector. Zero vectors are returned unchanged.
pub fn normalize_embedding(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Cosine distance between two vectors (0 = identical direction).
///
/// Zero-norm inputs are treated as maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
