//! Per-shape signed distance samples.

use rand::seq::SliceRandom;
use rand::Rng;

/// One sample row: `[x, y, z, sdf]`.
pub type SampleRow = [f32; 4];

/// Drop rows whose distance is NaN.
pub fn remove_nans(rows: Vec<SampleRow>) -> Vec<SampleRow> {
    rows.into_iter().filter(|r| !r[3].is_nan()).collect()
}

/// Signed distance samples of one shape, split by sign.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeSamples {
    /// Rows outside the surface (`sdf >= 0`).
    pub positive: Vec<SampleRow>,
    /// Rows inside the surface (`sdf < 0`).
    pub negative: Vec<SampleRow>,
}

impl ShapeSamples {
    /// Create a sample set, dropping NaN rows.
    pub fn new(positive: Vec<SampleRow>, negative: Vec<SampleRow>) -> Self {
        Self {
            positive: remove_nans(positive),
            negative: remove_nans(negative),
        }
    }

    /// Split unlabelled rows by the sign of their distance.
    pub fn from_rows(rows: impl IntoIterator<Item = SampleRow>) -> Self {
        let (positive, negative) = rows
            .into_iter()
            .filter(|r| !r[3].is_nan())
            .partition(|r| r[3] >= 0.0);
        Self { positive, negative }
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }

    /// A copy with both halves independently shuffled.
    pub fn permuted<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let mut out = self.clone();
        out.positive.shuffle(rng);
        out.negative.shuffle(rng);
        out
    }
}

/// Take `count` rows from `rows`: a contiguous window at a random start when
/// there are enough rows, random indices with replacement otherwise.
fn take_rows<R: Rng + ?Sized>(rows: &[SampleRow], count: usize, rng: &mut R, out: &mut Vec<SampleRow>) {
    if count == 0 || rows.is_empty() {
        return;
    }
    if rows.len() > count {
        let start = rng.gen_range(0..=rows.len() - count);
        out.extend_from_slice(&rows[start..start + count]);
    } else {
        out.extend((0..count).map(|_| rows[rng.gen_range(0..rows.len())]));
    }
}

/// Draw `n` rows, half positive and half negative.
///
/// When one half is empty the other supplies all rows. Returns an empty
/// vector only when the shape has no samples at all.
pub fn subsample<R: Rng + ?Sized>(samples: &ShapeSamples, n: usize, rng: &mut R) -> Vec<SampleRow> {
    let mut out = Vec::with_capacity(n);
    let half = n / 2;

    match (samples.positive.is_empty(), samples.negative.is_empty()) {
        (false, false) => {
            take_rows(&samples.positive, half, rng, &mut out);
            take_rows(&samples.negative, n - half, rng, &mut out);
        }
        (false, true) => take_rows(&samples.positive, n, rng, &mut out),
        (true, false) => take_rows(&samples.negative, n, rng, &mut out),
        (true, true) => {}
    }

    out
}
