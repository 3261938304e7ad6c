use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// An ordered, non-empty set of equal-length vectors: one per query token,
/// image patch, or text token.
///
/// Stored flat in row-major order, `data[vector_idx * dimension + dim_idx]`,
/// the same layout the on-disk blobs use.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVectorEmbedding {
    num_vectors: usize,
    dimension: usize,
    data: Vec<f32>,
}

impl MultiVectorEmbedding {
    /// Build an embedding from a flat row-major buffer.
    ///
    /// Fails when either extent is zero, the buffer length does not match
    /// `num_vectors * dimension`, or any value is NaN or infinite.
    pub fn from_flat(
        num_vectors: usize,
        dimension: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        if num_vectors == 0 {
            return Err(Error::MalformedEmbedding(
                "embedding has no vectors".to_string(),
            ));
        }
        if dimension == 0 {
            return Err(Error::MalformedEmbedding(
                "embedding dimension is zero".to_string(),
            ));
        }
        if data.len() != num_vectors * dimension {
            return Err(Error::MalformedEmbedding(format!(
                "expected {} values for {num_vectors}x{dimension}, found {}",
                num_vectors * dimension,
                data.len()
            )));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(Error::MalformedEmbedding(format!(
                "non-finite value {} in vector {}",
                data[pos],
                pos / dimension
            )));
        }

        Ok(Self {
            num_vectors,
            dimension,
            data,
        })
    }

    /// Build an embedding from individual rows. All rows must share a length.
    ///
    /// # Examples
    ///
    /// ```
    /// use pagebert::embedding::MultiVectorEmbedding;
    ///
    /// let emb =
    ///     MultiVectorEmbedding::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]])
    ///         .unwrap();
    /// assert_eq!(emb.num_vectors(), 2);
    /// assert_eq!(emb.representative(), &[1.0, 0.0]);
    /// ```
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let dimension = rows.first().map_or(0, Vec::len);
        let num_vectors = rows.len();

        let mut data = Vec::with_capacity(num_vectors * dimension);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dimension {
                return Err(Error::MalformedEmbedding(format!(
                    "row {i} has {} values, expected {dimension}",
                    row.len()
                )));
            }
            data.extend(row);
        }

        Self::from_flat(num_vectors, dimension, data)
    }

    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Flat row-major values.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    /// The `idx`-th vector.
    pub fn vector(&self, idx: usize) -> &[f32] {
        let start = idx * self.dimension;
        &self.data[start..start + self.dimension]
    }

    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    /// The single vector used for approximate first-stage search: the first
    /// vector of the set.
    pub fn representative(&self) -> &[f32] {
        self.vector(0)
    }

    /// Copy into a `[num_vectors, dimension]` CPU tensor.
    pub fn to_tensor(&self) -> Result<Tensor> {
        Tensor::from_vec(
            self.data.clone(),
            (self.num_vectors, self.dimension),
            &Device::Cpu,
        )
        .map_err(|e| {
            Error::Scoring(format!("failed to build embedding tensor: {e}"))
        })
    }
}

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}
