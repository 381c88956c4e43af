//! Seeded, bit-exact invertible row transform.
//!
//! A block is reshaped into rows of `width` bytes (the last row zero-padded),
//! weighted by a deterministic unit-magnitude [`Field`], and each row is then
//! pushed through one of two byte bijections depending on whether its
//! dispersion is above the block mean:
//!
//! - [`RowClass::Low`]: linear rescale `y = s·x + k (mod 256)`.
//! - [`RowClass::High`]: phase rotation `p = x + k`, then the folded quadratic
//!   curve `y = s·p + 2·p² (mod 256)`.
//!
//! `s` is the odd output scale and `k` the block's phase offset taken from the
//! field. Both maps are fixed byte substitutions for the whole block, so runs
//! and repeats in the input survive into the output. Both are permutations of
//! `0..=255`, so nothing is clamped and the inverse is exact. The per-row classification is returned as a mask
//! and must be persisted; [`ReversibleTransform::invert`] never recomputes it.

use std::f64::consts::PI;

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::chunker::{Chunk, ParallelChunker};
use crate::error::{Error, Result};
use crate::format::{RowClass, TransformParams};
use crate::metrics::TransformStats;

/// Largest accepted row width.
pub const MAX_ROW_WIDTH: usize = 4096;

/// Deterministic per-element weighting derived from `(seed, shape)`.
///
/// Element `i` carries the unit-magnitude weight `e^{i·theta_i}`; the block
/// carries one phase offset shared by every row. A field lives for exactly one
/// block. [`Field::collapse`] consumes it, so a field generated for one seed
/// can never be applied to another block.
#[derive(Debug)]
pub struct Field {
    rows: usize,
    width: usize,
    magnitudes: Vec<f64>,
    offset: u8,
}

impl Field {
    /// Derive the field for a `(rows, width)` shape.
    ///
    /// Element `i` gets the phase `pi * strength * u_i`, where `u_i` is the
    /// xxh3 hash of `i` keyed by `seed`, mapped to `[0, 1)`. Magnitudes are
    /// normalized by the largest one. The block offset is taken the same way
    /// from the hash of the shape.
    pub fn generate(shape: (usize, usize), seed: u64, strength: f64) -> Result<Self> {
        let (rows, width) = shape;
        if width == 0 {
            return Err(Error::Transform("field width must be non-zero".into()));
        }
        if !(strength > 0.0 && strength <= 1.0) {
            return Err(Error::Transform(format!(
                "field strength {strength} outside (0, 1]"
            )));
        }
        let len = rows
            .checked_mul(width)
            .ok_or_else(|| Error::Transform(format!("field shape {rows}x{width} overflows")))?;

        let mut magnitudes = Vec::with_capacity(len);
        for i in 0..len {
            let theta = PI * strength * unit_hash(&(i as u64).to_le_bytes(), seed);
            magnitudes.push(theta.cos().hypot(theta.sin()));
        }
        if len > 0 {
            let max = magnitudes.iter().copied().fold(0.0f64, f64::max);
            if !(max > 0.0) {
                return Err(Error::Transform("field has no non-zero weight".into()));
            }
            for m in &mut magnitudes {
                *m /= max;
            }
        }

        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&(rows as u64).to_le_bytes());
        key[8..].copy_from_slice(&(width as u64).to_le_bytes());
        // theta / 2pi * 256 with IEEE-exact arithmetic only, so the offset
        // never depends on the platform's trig implementation.
        let offset = (strength * unit_hash(&key, seed) * 128.0).floor() as u8;

        Ok(Self {
            rows,
            width,
            magnitudes,
            offset,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.width)
    }

    /// Phase offset added to every byte of the block.
    pub fn offset(&self) -> u8 {
        self.offset
    }

    #[inline]
    fn magnitude(&self, i: usize) -> f64 {
        self.magnitudes[i]
    }

    /// Discard the field once its block is finished.
    pub fn collapse(self) {}
}

/// `xxh3(bytes, seed)` mapped onto `[0, 1)` with 53 bits of precision.
fn unit_hash(bytes: &[u8], seed: u64) -> f64 {
    (xxh3_64_with_seed(bytes, seed) >> 11) as f64 / (1u64 << 53) as f64
}

/// Output of [`ReversibleTransform::apply`].
#[derive(Debug, Clone)]
pub struct Transformed {
    /// Transformed rows, `mask.len() * width` bytes including padding.
    pub data: Vec<u8>,
    pub mask: Vec<RowClass>,
    /// Zero bytes appended to complete the final row.
    pub pad: usize,
    pub stats: TransformStats,
}

/// Forward and inverse row transform for one `(width, output_scale, strength)`
/// configuration.
#[derive(Debug, Clone)]
pub struct ReversibleTransform {
    width: usize,
    output_scale: u8,
    strength: f64,
    scale: u8,
    scale_inv: u8,
    curve: [u8; 256],
    curve_inv: [u8; 256],
}

impl ReversibleTransform {
    pub fn new(width: usize, output_scale: u8, strength: f64) -> Result<Self> {
        if width == 0 || width > MAX_ROW_WIDTH {
            return Err(Error::Transform(format!(
                "row width {width} outside 1..={MAX_ROW_WIDTH}"
            )));
        }
        if output_scale == 0 {
            return Err(Error::Transform("output scale must be non-zero".into()));
        }
        if !(strength > 0.0 && strength <= 1.0) {
            return Err(Error::Transform(format!(
                "field strength {strength} outside (0, 1]"
            )));
        }

        let scale = output_scale | 1;
        let scale_inv = mod256_inverse(scale);

        let mut curve = [0u8; 256];
        let mut curve_inv = [0u8; 256];
        let mut seen = [false; 256];
        for p in 0..256u32 {
            let y = ((scale as u32 * p + 2 * p * p) & 0xff) as usize;
            if seen[y] {
                return Err(Error::Transform(format!(
                    "phase curve is not a permutation for scale {scale}"
                )));
            }
            seen[y] = true;
            curve[p as usize] = y as u8;
            curve_inv[y] = p as u8;
        }

        Ok(Self {
            width,
            output_scale,
            strength,
            scale,
            scale_inv,
            curve,
            curve_inv,
        })
    }

    /// Rebuild the transform a block was encoded with.
    pub fn from_params(params: &TransformParams) -> Result<Self> {
        Self::new(
            params.width as usize,
            params.output_scale,
            params.field_strength,
        )
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn output_scale(&self) -> u8 {
        self.output_scale
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    /// Number of rows a block of `len` bytes occupies.
    pub fn rows_for(&self, len: usize) -> usize {
        len.div_ceil(self.width)
    }

    /// Field sized for a block of `len` bytes.
    pub fn generate(&self, len: usize, seed: u64) -> Result<Field> {
        Field::generate((self.rows_for(len), self.width), seed, self.strength)
    }

    /// Transform `block` under `field`, fanning rows out over `chunker`.
    pub fn apply(
        &self,
        field: &Field,
        block: &[u8],
        chunker: &ParallelChunker,
    ) -> Result<Transformed> {
        let rows_needed = self.rows_for(block.len());
        if field.shape() != (rows_needed, self.width) {
            return Err(Error::Transform(format!(
                "field shape {:?} does not fit {} bytes in rows of {}",
                field.shape(),
                block.len(),
                self.width
            )));
        }

        let pad = rows_needed * self.width - block.len();
        let mut padded = Vec::with_capacity(block.len() + pad);
        padded.extend_from_slice(block);
        padded.resize(block.len() + pad, 0);

        // Pass 1: weight every row by the field magnitude and measure dispersion.
        let rows: Vec<&[u8]> = padded.chunks_exact(self.width).collect();
        let chunks = ParallelChunker::split(&rows, chunker.workers());
        let weighed = chunker.try_map_concurrent(&chunks, |chunk| self.weigh_chunk(field, chunk))?;

        let mut weighted = Vec::with_capacity(padded.len());
        let mut dispersion = Vec::with_capacity(rows_needed);
        for (bytes, disp) in weighed {
            weighted.extend_from_slice(&bytes);
            dispersion.extend(disp);
        }

        // The threshold spans the whole block, so the mask does not depend on
        // how many chunks the rows were split into.
        let threshold = if dispersion.is_empty() {
            0.0
        } else {
            dispersion.iter().sum::<f64>() / dispersion.len() as f64
        };
        let mask: Vec<RowClass> = dispersion
            .iter()
            .map(|&d| {
                if d > threshold {
                    RowClass::High
                } else {
                    RowClass::Low
                }
            })
            .collect();

        // Pass 2: send each row through the branch its class selects.
        let rows: Vec<&[u8]> = weighted.chunks_exact(self.width).collect();
        let chunks = ParallelChunker::split(&rows, chunker.workers());
        let encoded = chunker.map_concurrent(&chunks, |chunk| {
            self.encode_chunk(field, chunk, &mask, &padded)
        });

        let mut stats = TransformStats::default();
        let mut parts = Vec::with_capacity(encoded.len());
        for (bytes, chunk_stats) in encoded {
            stats.merge(&chunk_stats);
            parts.push(bytes);
        }

        Ok(Transformed {
            data: ParallelChunker::join(parts),
            mask,
            pad,
            stats,
        })
    }

    /// Exact inverse of [`apply`](Self::apply) given the persisted mask and pad.
    pub fn invert(
        &self,
        field: &Field,
        data: &[u8],
        mask: &[RowClass],
        pad: usize,
        chunker: &ParallelChunker,
    ) -> Result<Vec<u8>> {
        if data.len() != mask.len() * self.width {
            return Err(Error::Transform(format!(
                "{} transformed bytes do not form {} rows of {}",
                data.len(),
                mask.len(),
                self.width
            )));
        }
        if field.shape() != (mask.len(), self.width) {
            return Err(Error::Transform(format!(
                "field shape {:?} does not match {} rows of {}",
                field.shape(),
                mask.len(),
                self.width
            )));
        }
        if pad >= self.width || pad > data.len() {
            return Err(Error::Transform(format!(
                "pad {pad} invalid for rows of {}",
                self.width
            )));
        }

        let rows: Vec<&[u8]> = data.chunks_exact(self.width).collect();
        let chunks = ParallelChunker::split(&rows, chunker.workers());
        let parts = chunker.try_map_concurrent(&chunks, |chunk| {
            self.decode_chunk(field, chunk, mask)
        })?;

        let mut restored = ParallelChunker::join(parts);
        restored.truncate(restored.len() - pad);
        Ok(restored)
    }

    fn weigh_chunk(&self, field: &Field, chunk: &Chunk<'_, &[u8]>) -> Result<(Vec<u8>, Vec<f64>)> {
        let mut bytes = Vec::with_capacity(chunk.items.len() * self.width);
        let mut dispersion = Vec::with_capacity(chunk.items.len());
        for (j, row) in chunk.items.iter().enumerate() {
            let base = (chunk.offset + j) * self.width;
            let start = bytes.len();
            for (c, &x) in row.iter().enumerate() {
                let i = base + c;
                let m = field.magnitude(i);
                let y = (x as f64 * m).round();
                if !(0.0..=255.0).contains(&y) || (y / m).round() != x as f64 {
                    return Err(Error::Transform(format!(
                        "field magnitude {m} at element {i} is not invertible for byte {x}"
                    )));
                }
                bytes.push(y as u8);
            }
            dispersion.push(std_dev(&bytes[start..]));
        }
        Ok((bytes, dispersion))
    }

    fn encode_chunk(
        &self,
        field: &Field,
        chunk: &Chunk<'_, &[u8]>,
        mask: &[RowClass],
        original: &[u8],
    ) -> (Vec<u8>, TransformStats) {
        let mut out = Vec::with_capacity(chunk.items.len() * self.width);
        let mut stats = TransformStats::default();
        for (j, row) in chunk.items.iter().enumerate() {
            let r = chunk.offset + j;
            let base = r * self.width;
            let class = mask[r];
            match class {
                RowClass::High => stats.rows_high += 1,
                RowClass::Low => stats.rows_low += 1,
            }
            for (c, &x) in row.iter().enumerate() {
                let i = base + c;
                let y = self.forward(class, x, field.offset());
                stats.bytes += 1;
                stats.abs_diff += u64::from(y.abs_diff(original[i]));
                out.push(y);
            }
        }
        (out, stats)
    }

    fn decode_chunk(
        &self,
        field: &Field,
        chunk: &Chunk<'_, &[u8]>,
        mask: &[RowClass],
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(chunk.items.len() * self.width);
        for (j, row) in chunk.items.iter().enumerate() {
            let r = chunk.offset + j;
            let base = r * self.width;
            for (c, &y) in row.iter().enumerate() {
                let i = base + c;
                let weighted = self.backward(mask[r], y, field.offset());
                let m = field.magnitude(i);
                let x = (weighted as f64 / m).round();
                if !(0.0..=255.0).contains(&x) {
                    return Err(Error::Transform(format!(
                        "element {i} inverts outside the byte range"
                    )));
                }
                out.push(x as u8);
            }
        }
        Ok(out)
    }

    #[inline]
    fn forward(&self, class: RowClass, x: u8, k: u8) -> u8 {
        match class {
            RowClass::Low => self.scale.wrapping_mul(x).wrapping_add(k),
            RowClass::High => self.curve[x.wrapping_add(k) as usize],
        }
    }

    #[inline]
    fn backward(&self, class: RowClass, y: u8, k: u8) -> u8 {
        match class {
            RowClass::Low => self.scale_inv.wrapping_mul(y.wrapping_sub(k)),
            RowClass::High => self.curve_inv[y as usize].wrapping_sub(k),
        }
    }
}

/// Multiplicative inverse of an odd byte modulo 256 (Newton iteration).
fn mod256_inverse(odd: u8) -> u8 {
    let mut inv = odd;
    for _ in 0..3 {
        inv = inv.wrapping_mul(2u8.wrapping_sub(odd.wrapping_mul(inv)));
    }
    inv
}

/// Population standard deviation of a row.
fn std_dev(row: &[u8]) -> f64 {
    if row.is_empty() {
        return 0.0;
    }
    let n = row.len() as f64;
    let mean = row.iter().map(|&b| b as f64).sum::<f64>() / n;
    let var = row
        .iter()
        .map(|&b| {
            let d = b as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt()
}
