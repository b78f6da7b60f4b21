//! Virtual network coordinates and the proximity metric.
//!
//! Coordinates follow the Vivaldi model: a Euclidean position plus a
//! non-negative height that stands for the access-link delay. The
//! coordinate service itself lives outside the overlay; this module only
//! carries its output and compares it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A point in virtual coordinate space.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// Euclidean component.
    pub position: Vec<f64>,
    /// Height above the Euclidean plane.
    pub height: f64,
}

impl Coordinates {
    /// Create coordinates from a position and a height.
    pub fn new(position: Vec<f64>, height: f64) -> Self {
        Self { position, height }
    }

    /// A zero-height point.
    pub fn point(position: &[f64]) -> Self {
        Self {
            position: position.to_vec(),
            height: 0.0,
        }
    }

    /// The origin of a `dimensions`-dimensional space.
    pub fn origin(dimensions: usize) -> Self {
        Self {
            position: vec![0.0; dimensions],
            height: 0.0,
        }
    }

    /// Number of Euclidean dimensions.
    pub fn dimensions(&self) -> usize {
        self.position.len()
    }

    /// Check that every component is usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(bad) = self.position.iter().find(|c| !c.is_finite()) {
            return Err(Error::InvalidCoordinates(format!("non-finite component {bad}")));
        }
        if !self.height.is_finite() || self.height < 0.0 {
            return Err(Error::InvalidCoordinates(format!("bad height {}", self.height)));
        }
        Ok(())
    }

    /// Whether `other` lives in the same coordinate space.
    pub fn is_compatible(&self, other: &Coordinates) -> bool {
        self.dimensions() == other.dimensions()
    }
}

/// Network-distance estimate between two coordinate sets.
pub trait Proximity: Send + Sync + fmt::Debug {
    /// Estimated distance from `a` to `b`. Lower is closer.
    fn distance(&self, a: &Coordinates, b: &Coordinates) -> f64;
}

/// Height-vector distance: `|pa - pb| + ha + hb`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanProximity;

impl Proximity for EuclideanProximity {
    fn distance(&self, a: &Coordinates, b: &Coordinates) -> f64 {
        let planar = a
            .position
            .iter()
            .zip(&b.position)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt();
        planar + a.height + b.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_distance() {
        let a = Coordinates::point(&[0.0, 0.0]);
        let b = Coordinates::point(&[3.0, 4.0]);
        assert_eq!(EuclideanProximity.distance(&a, &b), 5.0);
        assert_eq!(EuclideanProximity.distance(&b, &a), 5.0);
    }

    #[test]
    fn heights_add() {
        let a = Coordinates::new(vec![0.0], 1.5);
        let b = Coordinates::new(vec![2.0], 0.5);
        assert_eq!(EuclideanProximity.distance(&a, &b), 4.0);
    }

    #[test]
    fn validate_rejects_nan() {
        assert!(Coordinates::point(&[f64::NAN]).validate().is_err());
        assert!(Coordinates::new(vec![1.0], -1.0).validate().is_err());
        assert!(Coordinates::origin(3).validate().is_ok());
    }

    #[test]
    fn compatibility_by_dimension() {
        assert!(Coordinates::origin(2).is_compatible(&Coordinates::point(&[1.0, 1.0])));
        assert!(!Coordinates::origin(2).is_compatible(&Coordinates::origin(3)));
    }
}
