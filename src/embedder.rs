use crate::{
    embedding::MultiVectorEmbedding,
    error::{Error, Result},
    text_util::tokenize,
};

/// Turns raw query text into a multi-vector embedding.
///
/// Called once per search request from the blocking pool, so
/// implementations may block on model inference.
pub trait QueryEmbedder: Send + Sync {
    fn embed_query(&self, text: &str) -> Result<MultiVectorEmbedding>;
}

/// Deterministic embedder mapping each query token to a pseudo-random unit
/// vector derived from the token text and a seed.
///
/// Identical tokens always produce identical vectors, so items indexed with
/// the same embedder get exact MaxSim matches. Token seeds come from BLAKE3,
/// which keeps stored vectors reproducible across builds and platforms.
/// Intended for offline runs and tests, not for semantic quality.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    seed: u64,
}

impl HashingEmbedder {
    pub fn new(dimension: usize, seed: u64) -> Self {
        Self { dimension, seed }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed arbitrary text; also used to build matching item embeddings.
    pub fn embed_text(&self, text: &str) -> Result<MultiVectorEmbedding> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Err(Error::EmbeddingFailure(format!(
                "no embeddable tokens in {text:?}"
            )));
        }

        let mut data = Vec::with_capacity(tokens.len() * self.dimension);
        for token in &tokens {
            data.extend(self.token_vector(token));
        }
        MultiVectorEmbedding::from_flat(tokens.len(), self.dimension, data)
    }

    fn token_vector(&self, token: &str) -> Vec<f32> {
        let mut state = token_seed(self.seed, token);

        let mut v: Vec<f32> = (0..self.dimension)
            .map(|_| {
                state = splitmix64(state);
                // Top 24 bits mapped to [-1, 1).
                ((state >> 40) as f32 / (1u64 << 23) as f32) - 1.0
            })
            .collect();

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl QueryEmbedder for HashingEmbedder {
    fn embed_query(&self, text: &str) -> Result<MultiVectorEmbedding> {
        self.embed_text(text)
    }
}

/// First eight bytes, little-endian, of BLAKE3 over `seed.to_le_bytes()`
/// followed by the token's UTF-8 bytes.
fn token_seed(seed: u64, token: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine;

    #[test]
    fn one_vector_per_token() {
        let embedder = HashingEmbedder::new(16, 7);
        let emb = embedder.embed_query("quarterly revenue growth").unwrap();
        assert_eq!(emb.num_vectors(), 3);
        assert_eq!(emb.dimension(), 16);
    }

    #[test]
    fn deterministic_for_same_seed() {
        let a = HashingEmbedder::new(8, 42).embed_query("revenue").unwrap();
        let b = HashingEmbedder::new(8, 42).embed_query("revenue").unwrap();
        assert_eq!(a, b);

        let c = HashingEmbedder::new(8, 43).embed_query("revenue").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn token_seed_hashes_seed_then_token() {
        let mut input = 7u64.to_le_bytes().to_vec();
        input.extend_from_slice("revenue".as_bytes());
        let digest = blake3::hash(&input);
        let expected =
            u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap());

        assert_eq!(token_seed(7, "revenue"), expected);
        assert_ne!(token_seed(7, "revenue"), token_seed(8, "revenue"));
    }

    #[test]
    fn splitmix_reference_values() {
        // Changing the generator invalidates every stored vector.
        assert_eq!(splitmix64(0), 0xE220_A839_7B1D_CDAF);
    }

    #[test]
    fn vectors_are_unit_length() {
        let emb = HashingEmbedder::new(32, 1).embed_query("margin").unwrap();
        let v = emb.vector(0);
        assert!((cosine(v, v) - 1.0).abs() < 1e-5);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_tokens_share_vectors() {
        let embedder = HashingEmbedder::new(8, 3);
        let q = embedder.embed_text("revenue growth").unwrap();
        let d = embedder.embed_text("strong growth this year").unwrap();
        assert_eq!(q.vector(1), d.vector(1));
    }

    #[test]
    fn punctuation_only_fails() {
        let err = HashingEmbedder::new(8, 0).embed_query("?!").unwrap_err();
        assert!(matches!(err, Error::EmbeddingFailure(_)));
    }
}
