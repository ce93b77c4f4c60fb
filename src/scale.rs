//! Equal-frequency colour scale for the choropleth.

use serde::Serialize;

pub const BUCKETS: usize = 6;

/// Sequential blues, low → high.
pub const PALETTE: [[u8; 3]; BUCKETS] = [
    [0xde, 0xeb, 0xf7],
    [0xc6, 0xdb, 0xef],
    [0x9e, 0xca, 0xe1],
    [0x6b, 0xae, 0xd6],
    [0x31, 0x82, 0xbd],
    [0x08, 0x51, 0x9c],
];

/// Neutral fill for features without a value. Not part of the ramp.
pub const MISSING: [u8; 3] = [0xbd, 0xbd, 0xbd];

pub fn hex(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LegendEntry {
    pub bucket: usize,
    /// Lower bound; `None` for the first bucket.
    pub from: Option<f64>,
    /// Upper bound (exclusive); `None` for the last bucket.
    pub to: Option<f64>,
    pub color: String,
}

/// Quantile scale rebuilt from the whole value set on every change.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorScale {
    domain: Vec<f64>,
    thresholds: Vec<f64>,
}

impl ColorScale {
    /// Non-finite and missing values are ignored. With fewer than two
    /// distinct values the domain falls back to `[0, 1]`.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut domain: Vec<f64> = values.into_iter().flatten().filter(|v| v.is_finite()).collect();
        domain.sort_by(f64::total_cmp);

        let distinct = domain.windows(2).any(|w| w[0] != w[1]);
        if !distinct {
            domain = vec![0.0, 1.0];
        }

        let thresholds = (1..BUCKETS)
            .map(|i| quantile_sorted(&domain, i as f64 / BUCKETS as f64))
            .collect();
        Self { domain, thresholds }
    }

    /// Bucket index in `0..BUCKETS`: the number of thresholds `<= value`.
    pub fn bucket(&self, value: f64) -> usize {
        if value.is_nan() {
            return 0;
        }
        self.thresholds.partition_point(|t| *t <= value)
    }

    /// Missing or non-finite values get the neutral fill.
    pub fn color_for(&self, value: Option<f64>) -> [u8; 3] {
        match value.filter(|v| v.is_finite()) {
            Some(v) => PALETTE[self.bucket(v)],
            None => MISSING,
        }
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.domain[0], self.domain[self.domain.len() - 1])
    }

    pub fn legend(&self) -> Vec<LegendEntry> {
        (0..BUCKETS)
            .map(|bucket| LegendEntry {
                bucket,
                from: bucket.checked_sub(1).map(|i| self.thresholds[i]),
                to: self.thresholds.get(bucket).copied(),
                color: hex(PALETTE[bucket]),
            })
            .collect()
    }
}

/// Linear interpolation between order statistics (`(n - 1) * p`).
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 || p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }
    let i = (n - 1) as f64 * p;
    let i0 = i.floor() as usize;
    let lo = sorted[i0];
    let hi = sorted[(i0 + 1).min(n - 1)];
    lo + (hi - lo) * (i - i0 as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn buckets_are_equal_frequency() {
        let values: Vec<Option<f64>> = (1..=12).map(|v| Some(v as f64)).collect();
        let scale = ColorScale::from_values(values);
        let mut counts = [0usize; BUCKETS];
        for v in 1..=12 {
            counts[scale.bucket(v as f64)] += 1;
        }
        assert_eq!(counts, [2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn heavy_tail_does_not_collapse() {
        let mut values: Vec<Option<f64>> = (1..=60).map(|v| Some(v as f64)).collect();
        values.push(Some(1.0e13));
        let scale = ColorScale::from_values(values);
        assert!(scale.bucket(10.0) < scale.bucket(50.0));
        assert_eq!(scale.bucket(1.0e13), BUCKETS - 1);
    }

    #[test]
    fn sorted_values_map_to_non_decreasing_buckets() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = rng.random_range(2..80);
            let mut values: Vec<f64> = (0..n).map(|_| rng.random_range(-1.0e6..1.0e9)).collect();
            values.push(values[0] + 1.0);
            let scale = ColorScale::from_values(values.iter().copied().map(Some));
            values.sort_by(f64::total_cmp);
            let buckets: Vec<usize> = values.iter().map(|v| scale.bucket(*v)).collect();
            assert!(buckets.windows(2).all(|w| w[0] <= w[1]), "{buckets:?}");
            assert!(buckets.iter().all(|b| *b < BUCKETS));
        }
    }

    #[test]
    fn degenerate_inputs_do_not_panic() {
        let empty = ColorScale::from_values(Vec::<Option<f64>>::new());
        assert_eq!(empty.domain(), (0.0, 1.0));
        assert!(empty.bucket(0.5) < BUCKETS);

        let same = ColorScale::from_values(vec![Some(42.0); 5]);
        assert_eq!(same.domain(), (0.0, 1.0));
        let b = same.bucket(42.0);
        assert!(b < BUCKETS);
        assert!((0..5).all(|_| same.bucket(42.0) == b));

        let junk = ColorScale::from_values(vec![None, Some(f64::NAN), Some(f64::INFINITY)]);
        assert_eq!(junk.domain(), (0.0, 1.0));
    }

    #[test]
    fn missing_values_use_neutral_fill() {
        let scale = ColorScale::from_values(vec![Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(scale.color_for(None), MISSING);
        assert_eq!(scale.color_for(Some(f64::NAN)), MISSING);
        assert_eq!(scale.color_for(Some(1.0)), PALETTE[0]);
        assert_ne!(MISSING, PALETTE[0]);
    }

    #[test]
    fn legend_covers_every_bucket() {
        let scale = ColorScale::from_values((0..30).map(|v| Some(v as f64)));
        let legend = scale.legend();
        assert_eq!(legend.len(), BUCKETS);
        assert_eq!(legend[0].from, None);
        assert_eq!(legend[BUCKETS - 1].to, None);
        assert_eq!(legend[1].from, legend[0].to);
        assert_eq!(legend[0].color, "#deebf7");
    }
}
