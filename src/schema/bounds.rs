//! Rectangular search space for two-variable objectives.

use serde::{Deserialize, Serialize};

/// Search box `[lower_x, upper_x] x [lower_y, upper_y]`.
///
/// Bounds may be entered in either order per axis; [`SearchBounds::normalized`]
/// sorts them before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub lower_x: f64,
    pub upper_x: f64,
    pub lower_y: f64,
    pub upper_y: f64,
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self::new(-5.0, 5.0, -5.0, 5.0)
    }
}

impl SearchBounds {
    pub fn new(lower_x: f64, upper_x: f64, lower_y: f64, upper_y: f64) -> Self {
        Self {
            lower_x,
            upper_x,
            lower_y,
            upper_y,
        }
    }

    /// Symmetric box `[-half, half]` on both axes.
    pub fn symmetric(half: f64) -> Self {
        Self::new(-half, half, -half, half)
    }

    /// Copy with each axis sorted ascending.
    pub fn normalized(&self) -> Self {
        Self {
            lower_x: self.lower_x.min(self.upper_x),
            upper_x: self.lower_x.max(self.upper_x),
            lower_y: self.lower_y.min(self.upper_y),
            upper_y: self.lower_y.max(self.upper_y),
        }
    }

    /// `[min_x, min_y]` after normalization.
    pub fn lower_bounds(&self) -> [f64; 2] {
        let b = self.normalized();
        [b.lower_x, b.lower_y]
    }

    /// `[max_x, max_y]` after normalization.
    pub fn upper_bounds(&self) -> [f64; 2] {
        let b = self.normalized();
        [b.upper_x, b.upper_y]
    }

    /// Check that all bounds are finite and each axis has non-zero width.
    pub fn validate(&self) -> Result<(), BoundsError> {
        let values = [self.lower_x, self.upper_x, self.lower_y, self.upper_y];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BoundsError::NonFinite);
        }
        if self.lower_x == self.upper_x {
            return Err(BoundsError::EmptyAxis("x"));
        }
        if self.lower_y == self.upper_y {
            return Err(BoundsError::EmptyAxis("y"));
        }
        Ok(())
    }
}

/// Search bounds validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundsError {
    #[error("Bounds must be finite numbers")]
    NonFinite,
    #[error("Bounds on the {0} axis have zero width")]
    EmptyAxis(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_bounds_are_sorted() {
        let bounds = SearchBounds::new(5.0, -5.0, -2.0, 2.0);
        assert_eq!(bounds.lower_bounds(), [-5.0, -2.0]);
        assert_eq!(bounds.upper_bounds(), [5.0, 2.0]);
        assert!(bounds.validate().is_ok());
    }

    #[test]
    fn test_invalid_bounds() {
        assert_eq!(
            SearchBounds::new(f64::NAN, 1.0, 0.0, 1.0).validate(),
            Err(BoundsError::NonFinite)
        );
        assert_eq!(
            SearchBounds::new(0.0, 1.0, 3.0, 3.0).validate(),
            Err(BoundsError::EmptyAxis("y"))
        );
    }
}
