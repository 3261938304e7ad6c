use std::{str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    embedding::MultiVectorEmbedding,
    error::{Error, Result},
};

/// Tag byte + 4 bytes vector count + 4 bytes dimension.
const HEADER_SIZE: usize = 9;

const F32_TAG: u8 = 0xF3;
const INT8_TAG: u8 = 0x18;

/// Turns full multi-vector embeddings into store blobs and back.
///
/// Ranking code only sees this trait, so the on-disk representation can
/// change without touching scoring.
pub trait EmbeddingCodec: Send + Sync {
    fn compress(&self, embedding: &MultiVectorEmbedding) -> Vec<u8>;
    fn decompress(&self, bytes: &[u8]) -> Result<MultiVectorEmbedding>;
}

/// Lossless codec.
///
/// Binary format:
/// - 1 byte: tag `0xF3`
/// - 4 bytes: vector count N (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - N * D * 4 bytes: f32 LE values in row-major order
#[derive(Debug, Clone, Copy, Default)]
pub struct F32Codec;

impl EmbeddingCodec for F32Codec {
    fn compress(&self, embedding: &MultiVectorEmbedding) -> Vec<u8> {
        let values = embedding.as_flat();
        let mut out =
            Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(values));
        write_header(&mut out, F32_TAG, embedding);
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    fn decompress(&self, bytes: &[u8]) -> Result<MultiVectorEmbedding> {
        let (num_vectors, dimension) = read_header(bytes, F32_TAG)?;
        let body = &bytes[HEADER_SIZE..];

        let expected = body_len(num_vectors, dimension, 4)?;
        if body.len() != expected {
            return Err(Error::Codec(format!(
                "f32 blob body is {} bytes, expected {expected}",
                body.len()
            )));
        }

        let data = if cfg!(target_endian = "little") {
            bytemuck::pod_collect_to_vec::<u8, f32>(body)
        } else {
            body.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        };

        MultiVectorEmbedding::from_flat(num_vectors, dimension, data)
            .map_err(|e| Error::Codec(e.to_string()))
    }
}

/// Symmetric 8-bit quantization with one absmax scale per vector.
///
/// Binary format:
/// - 1 byte: tag `0x18`
/// - 4 bytes: vector count N (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - N records of: 4 bytes scale (f32 LE) followed by D signed bytes
///
/// Roughly a quarter of the size of [`F32Codec`] blobs; reconstruction error
/// per value is bounded by `scale / 2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int8Codec;

impl EmbeddingCodec for Int8Codec {
    fn compress(&self, embedding: &MultiVectorEmbedding) -> Vec<u8> {
        let dimension = embedding.dimension();
        let mut out = Vec::with_capacity(
            HEADER_SIZE + embedding.num_vectors() * (4 + dimension),
        );
        write_header(&mut out, INT8_TAG, embedding);

        for vector in embedding.vectors() {
            let absmax = vector.iter().fold(0.0f32, |m, v| m.max(v.abs()));
            let scale = if absmax > 0.0 { absmax / 127.0 } else { 0.0 };
            out.extend_from_slice(&scale.to_le_bytes());

            let quantized: Vec<i8> = vector
                .iter()
                .map(|v| {
                    if scale == 0.0 {
                        0
                    } else {
                        (v / scale).round().clamp(-127.0, 127.0) as i8
                    }
                })
                .collect();
            out.extend_from_slice(bytemuck::cast_slice(&quantized));
        }
        out
    }

    fn decompress(&self, bytes: &[u8]) -> Result<MultiVectorEmbedding> {
        let (num_vectors, dimension) = read_header(bytes, INT8_TAG)?;
        let body = &bytes[HEADER_SIZE..];

        let record = 4 + dimension;
        let expected = body_len(num_vectors, record, 1)?;
        if body.len() != expected {
            return Err(Error::Codec(format!(
                "int8 blob body is {} bytes, expected {expected}",
                body.len()
            )));
        }

        let mut data = Vec::with_capacity(num_vectors * dimension);
        for chunk in body.chunks_exact(record) {
            let scale =
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let values: &[i8] = bytemuck::cast_slice(&chunk[4..]);
            data.extend(values.iter().map(|&q| f32::from(q) * scale));
        }

        MultiVectorEmbedding::from_flat(num_vectors, dimension, data)
            .map_err(|e| Error::Codec(e.to_string()))
    }
}

fn write_header(out: &mut Vec<u8>, tag: u8, embedding: &MultiVectorEmbedding) {
    out.push(tag);
    out.extend_from_slice(&(embedding.num_vectors() as u32).to_le_bytes());
    out.extend_from_slice(&(embedding.dimension() as u32).to_le_bytes());
}

fn read_header(bytes: &[u8], tag: u8) -> Result<(usize, usize)> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::Codec(format!(
            "blob is {} bytes, shorter than the {HEADER_SIZE}-byte header",
            bytes.len()
        )));
    }
    if bytes[0] != tag {
        return Err(Error::Codec(format!(
            "blob tag {:#04x} does not match codec tag {tag:#04x}",
            bytes[0]
        )));
    }

    let num_vectors =
        u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let dimension =
        u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) as usize;
    Ok((num_vectors, dimension))
}

fn body_len(rows: usize, row_len: usize, width: usize) -> Result<usize> {
    rows.checked_mul(row_len)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| {
            Error::Codec(format!("blob header {rows}x{row_len} overflows"))
        })
}

/// Codec selection, as stored in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    F32,
    Int8,
}

impl CodecKind {
    pub fn build(self) -> Arc<dyn EmbeddingCodec> {
        match self {
            CodecKind::F32 => Arc::new(F32Codec),
            CodecKind::Int8 => Arc::new(Int8Codec),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodecKind::F32 => "f32",
            CodecKind::Int8 => "int8",
        }
    }
}

impl FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f32" => Ok(CodecKind::F32),
            "int8" => Ok(CodecKind::Int8),
            other => Err(Error::Config(format!("unknown codec '{other}'"))),
        }
    }
}
