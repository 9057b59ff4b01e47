//! Perceptual fingerprints for screenshot similarity.
//!
//! A fingerprint is an average hash (aHash) over a 16x16 luminance grid:
//! one bit per cell, set when the cell is at least as bright as the grid mean.
//! Comparing two fingerprints is a Hamming-distance count, normalized to a
//! percentage so thresholds read naturally ("90% similar").

use image::DynamicImage;
use std::fmt;

/// Grid size (16x16 = 256 bits)
pub const GRID_SIZE: u32 = 16;

/// Perceptual fingerprint as a packed bit vector
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    words: Vec<u64>,
    bits: usize,
}

impl Fingerprint {
    /// Build a fingerprint from individual bits (first bit is the top-left cell)
    pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Self {
        let mut words = Vec::new();
        let mut len = 0;
        for bit in bits {
            if len % 64 == 0 {
                words.push(0);
            }
            if bit {
                words[len / 64] |= 1 << (len % 64);
            }
            len += 1;
        }
        Self { words, bits: len }
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn bit(&self, index: usize) -> bool {
        index < self.bits && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Hex rendering for debug logs
    pub fn to_hex(&self) -> String {
        self.words.iter().map(|w| format!("{:016x}", w)).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

/// Compute the fingerprint of an image at the default grid size
pub fn compute_fingerprint(image: &DynamicImage) -> Fingerprint {
    compute_fingerprint_with_grid(image, GRID_SIZE)
}

/// Compute an average hash over a `grid` x `grid` luminance downsample
///
/// Algorithm:
/// 1. Resize to grid x grid (triangle filter)
/// 2. Convert to grayscale
/// 3. Calculate mean brightness
/// 4. Emit one bit per cell: 1 if cell >= mean, else 0
pub fn compute_fingerprint_with_grid(image: &DynamicImage, grid: u32) -> Fingerprint {
    let grid = grid.max(1);
    let gray = image
        .resize_exact(grid, grid, image::imageops::FilterType::Triangle)
        .to_luma8();

    let sum: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let cells = (grid * grid) as u64;

    // Compare cell * n against sum to avoid rounding the mean
    Fingerprint::from_bits(gray.pixels().map(|p| p.0[0] as u64 * cells >= sum))
}

/// Calculate Hamming distance between two fingerprints of equal length
///
/// Returns `None` when the lengths differ.
pub fn hamming_distance(a: &Fingerprint, b: &Fingerprint) -> Option<u32> {
    if a.bits != b.bits {
        return None;
    }
    Some(
        a.words
            .iter()
            .zip(&b.words)
            .map(|(x, y)| (x ^ y).count_ones())
            .sum(),
    )
}

/// Percentage of matching bits, in [0, 100].
///
/// Mismatched or empty fingerprints are treated as definitely different (0).
pub fn similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    match hamming_distance(a, b) {
        Some(distance) if a.bits > 0 => {
            let matching = a.bits as f64 - distance as f64;
            matching * 100.0 / a.bits as f64
        }
        _ => 0.0,
    }
}
