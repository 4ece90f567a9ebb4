//! Motion models supplying particle displacements.
//!
//! The cloud asks the model for the displacement over the whole step, tracks
//! a Courant-limited part of it, then lets the model update the particle over
//! the time actually tracked.

use serde::{Deserialize, Serialize};

use crate::barycentric::Vector;
use crate::mesh::PolyMesh;
use crate::particle::Particle;

/// Source of particle displacements.
pub trait Motion: Send + Sync {
    /// Displacement over a step of `delta_t`, from the particle's current
    /// state.
    fn displacement(&self, p: &Particle, mesh: &PolyMesh, delta_t: f64) -> Vector;

    /// Update the particle state after `dt` of tracking.
    fn advance(&self, p: &mut Particle, dt: f64);
}

/// Parcels moving with their own velocity under a uniform acceleration.
/// Particles without kinematic state do not move.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ballistic {
    /// Acceleration (m/s^2)
    pub gravity: Vector,
}

impl Motion for Ballistic {
    fn displacement(&self, p: &Particle, _mesh: &PolyMesh, delta_t: f64) -> Vector {
        p.kinematic
            .as_ref()
            .map_or_else(Vector::zeros, |k| k.velocity * delta_t)
    }

    fn advance(&self, p: &mut Particle, dt: f64) {
        if let Some(k) = p.kinematic.as_mut() {
            if k.active {
                k.velocity += self.gravity * dt;
            }
        }
    }
}

/// Tracers carried by a uniform flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Convected {
    /// Flow velocity (m/s)
    pub velocity: Vector,
}

impl Motion for Convected {
    fn displacement(&self, _p: &Particle, _mesh: &PolyMesh, delta_t: f64) -> Vector {
        self.velocity * delta_t
    }

    fn advance(&self, _p: &mut Particle, _dt: f64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barycentric::Barycentric;
    use crate::parcel::KinematicState;
    use crate::particle::ParticleId;
    use approx::assert_relative_eq;

    #[test]
    fn test_ballistic_accelerates_active_parcels() {
        let model = Ballistic {
            gravity: Vector::new(0.0, 0.0, -10.0),
        };
        let id = ParticleId { proc: 0, id: 0 };
        let mut p = Particle::from_components(Barycentric::CENTRE, 0, 0, 1, id)
            .with_kinematic(KinematicState::new(Vector::new(1.0, 0.0, 0.0), 1e-3, 1000.0));
        model.advance(&mut p, 0.5);
        let k = p.kinematic.as_ref().unwrap();
        assert_relative_eq!(k.velocity, Vector::new(1.0, 0.0, -5.0), epsilon = 1e-12);

        p.kinematic.as_mut().unwrap().active = false;
        model.advance(&mut p, 0.5);
        let k = p.kinematic.as_ref().unwrap();
        assert_relative_eq!(k.velocity, Vector::new(1.0, 0.0, -5.0), epsilon = 1e-12);
    }
}
