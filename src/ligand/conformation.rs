//! Compact parameterization of a ligand pose and its gradient
//!
//! A conformation holds the root position, the root orientation as a unit
//! quaternion, and one angle per active torsion. Its matching change vector
//! carries a 3-vector rotation in place of the quaternion, so the gradient
//! lives in the tangent space of the orientation.

use nalgebra::{DVector, UnitQuaternion, Vector3};
use std::f64::consts::PI;

/// A ligand pose: position, orientation and active torsion angles.
#[derive(Debug, Clone)]
pub struct Conformation {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    /// Active torsion angles in frame pre-order; unconstrained reals.
    pub torsions: Vec<f64>,
}

impl Conformation {
    /// The identity pose with the given number of active torsions.
    pub fn new(num_active_torsions: usize) -> Self {
        Self {
            position: Vector3::zeros(),
            orientation: UnitQuaternion::identity(),
            torsions: vec![0.0; num_active_torsions],
        }
    }

    /// Number of free variables: 3 position, 3 orientation, torsions.
    pub fn num_variables(&self) -> usize {
        6 + self.torsions.len()
    }

    /// The pose reached by moving `alpha` along the flattened direction `d`.
    /// The orientation is composed through the exponential map and kept at
    /// unit norm.
    pub fn step(&self, d: &DVector<f64>, alpha: f64) -> Self {
        let position = self.position + alpha * Vector3::new(d[0], d[1], d[2]);
        let rotation = alpha * Vector3::new(d[3], d[4], d[5]);
        let mut orientation = UnitQuaternion::from_scaled_axis(rotation) * self.orientation;
        orientation.renormalize();
        let torsions = self
            .torsions
            .iter()
            .enumerate()
            .map(|(i, t)| t + alpha * d[6 + i])
            .collect();
        Self {
            position,
            orientation,
            torsions,
        }
    }
}

/// The gradient of the free energy with respect to a conformation, flattened
/// as `[position(3), orientation(3), torsions...]`.
#[derive(Debug, Clone)]
pub struct Change {
    v: DVector<f64>,
}

impl Change {
    pub fn zeros(num_active_torsions: usize) -> Self {
        Self {
            v: DVector::zeros(6 + num_active_torsions),
        }
    }

    pub fn set_position(&mut self, g: Vector3<f64>) {
        self.v[0] = g[0];
        self.v[1] = g[1];
        self.v[2] = g[2];
    }

    pub fn set_orientation(&mut self, g: Vector3<f64>) {
        self.v[3] = g[0];
        self.v[4] = g[1];
        self.v[5] = g[2];
    }

    pub fn set_torsion(&mut self, i: usize, g: f64) {
        self.v[6 + i] = g;
    }

    pub fn as_vector(&self) -> &DVector<f64> {
        &self.v
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.v
    }
}

/// Wraps an angle into `[-pi, pi)`.
pub fn normalized_angle(a: f64) -> f64 {
    (a + PI).rem_euclid(2.0 * PI) - PI
}
