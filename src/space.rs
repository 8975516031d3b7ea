//! Bounded continuous spaces.
//!
//! Agents always act in the normalized cube `[-1, 1]^n`; a [`BoxSpace`]
//! maps those normalized vectors onto the real bounds an environment
//! expects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An axis-aligned box `[low_i, high_i]` in `n` dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    low: Vec<f64>,
    high: Vec<f64>,
}

impl BoxSpace {
    /// Creates a new box from per-dimension bounds.
    ///
    /// # Panics
    ///
    /// Panics if the bound vectors differ in length or any `low > high`.
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> Self {
        assert_eq!(low.len(), high.len(), "bound vectors must match in length");
        assert!(
            low.iter().zip(&high).all(|(l, h)| l <= h),
            "every lower bound must not exceed its upper bound"
        );
        Self { low, high }
    }

    /// Symmetric box `[-limit_i, limit_i]`.
    pub fn symmetric(limits: &[f64]) -> Self {
        Self::new(limits.iter().map(|l| -l.abs()).collect(), limits.iter().map(|l| l.abs()).collect())
    }

    /// The unit box `[-1, 1]^dim`.
    pub fn unit(dim: usize) -> Self {
        Self::new(vec![-1.0; dim], vec![1.0; dim])
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.low.len()
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    /// Maps a normalized vector in `[-1, 1]^n` onto this box.
    pub fn scale(&self, normalized: &[f64]) -> Vec<f64> {
        assert_eq!(normalized.len(), self.dim(), "dimension mismatch");
        normalized
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .map(|(x, (l, h))| l + (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * (h - l))
            .collect()
    }

    /// Inverse of [`BoxSpace::scale`]; values outside the box are clipped.
    pub fn normalize(&self, value: &[f64]) -> Vec<f64> {
        assert_eq!(value.len(), self.dim(), "dimension mismatch");
        value
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .map(|(v, (l, h))| {
                let width = h - l;
                if width <= f64::EPSILON {
                    0.0
                } else {
                    (2.0 * (v - l) / width - 1.0).clamp(-1.0, 1.0)
                }
            })
            .collect()
    }

    /// Clips `value` element-wise into the box.
    pub fn clip(&self, value: &[f64]) -> Vec<f64> {
        value
            .iter()
            .zip(self.low.iter().zip(&self.high))
            .map(|(v, (l, h))| v.clamp(*l, *h))
            .collect()
    }

    /// Returns true if every component lies within its bounds.
    pub fn contains(&self, value: &[f64]) -> bool {
        value.len() == self.dim()
            && value
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(v, (l, h))| v >= l && v <= h)
    }
}

impl fmt::Display for BoxSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Box(")?;
        for (i, (l, h)) in self.low.iter().zip(&self.high).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{:.2}, {:.2}]", l, h)?;
        }
        write!(f, ")")
    }
}
