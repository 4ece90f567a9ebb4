//! Physics state attached to particles.
//!
//! A [`Particle`](crate::Particle) carries only tracked state. Parcels add
//! components: [`KinematicState`] for motion and [`CollisionState`] for
//! contact bookkeeping. Components are identified on the wire by
//! [`ComponentKey`].

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::barycentric::Vector;

/// Stable identifiers of attached components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ComponentKey {
    /// [`KinematicState`]
    Kinematic = 1,
    /// [`CollisionState`]
    Collision = 2,
}

impl ComponentKey {
    /// Bit of this component in a component flags word.
    pub fn bit(self) -> u64 {
        1 << (self as u64 - 1)
    }
}

/// Kinematic parcel state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    /// Whether the parcel is tracked. Inactive parcels only advance in time.
    pub active: bool,
    /// User type id.
    pub type_id: i64,
    /// Number of physical particles the parcel represents.
    pub n_particle: f64,
    /// Diameter (m)
    pub diameter: f64,
    /// Density (kg/m^3)
    pub density: f64,
    /// Velocity (m/s)
    pub velocity: Vector,
    /// Time since injection (s)
    pub age: f64,
}

impl KinematicState {
    /// An active parcel of single spheres.
    pub fn new(velocity: Vector, diameter: f64, density: f64) -> Self {
        Self {
            active: true,
            type_id: -1,
            n_particle: 1.0,
            diameter,
            density,
            velocity,
            age: 0.0,
        }
    }

    /// Volume of one sphere.
    pub fn volume(&self) -> f64 {
        std::f64::consts::PI / 6.0 * self.diameter.powi(3)
    }

    /// Mass of one sphere.
    pub fn mass(&self) -> f64 {
        self.density * self.volume()
    }

    /// Rotate or reflect the velocity.
    pub fn transform(&mut self, t: &Matrix3<f64>) {
        self.velocity = t * self.velocity;
    }
}

/// Contact state of a colliding parcel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionState {
    /// Accumulated contact force (N)
    pub force: Vector,
    /// Angular momentum (kg m^2/s)
    pub angular_momentum: Vector,
    /// Accumulated torque (N m)
    pub torque: Vector,
}

impl CollisionState {
    /// Rotate or reflect every vector.
    pub fn transform(&mut self, t: &Matrix3<f64>) {
        self.force = t * self.force;
        self.angular_momentum = t * self.angular_momentum;
        self.torque = t * self.torque;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mass() {
        let k = KinematicState::new(Vector::zeros(), 2.0, 3.0);
        assert_relative_eq!(k.volume(), 4.0 * std::f64::consts::PI / 3.0, epsilon = 1e-12);
        assert_relative_eq!(k.mass(), 4.0 * std::f64::consts::PI, epsilon = 1e-12);
    }

    #[test]
    fn test_reflection() {
        let n = Vector::new(0.0, 0.0, 1.0);
        let t = Matrix3::identity() - 2.0 * n * n.transpose();
        let mut k = KinematicState::new(Vector::new(1.0, 2.0, -3.0), 1e-3, 1000.0);
        k.transform(&t);
        assert_relative_eq!(k.velocity, Vector::new(1.0, 2.0, 3.0), epsilon = 1e-15);

        let mut c = CollisionState {
            force: Vector::new(0.0, 0.0, 1.0),
            ..Default::default()
        };
        c.transform(&t);
        assert_relative_eq!(c.force, Vector::new(0.0, 0.0, -1.0), epsilon = 1e-15);
    }

    #[test]
    fn test_component_bits() {
        assert_eq!(ComponentKey::Kinematic.bit(), 1);
        assert_eq!(ComponentKey::Collision.bit(), 2);
    }
}
