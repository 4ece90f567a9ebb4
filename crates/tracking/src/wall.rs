//! Particle-wall interaction models.

use serde::{Deserialize, Serialize};

use crate::boundary::TrackingData;
use crate::cloud::MoveReport;
use crate::mesh::PolyMesh;
use crate::particle::Particle;

/// What happens to a particle that reaches a wall patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WallInteraction {
    /// Nothing. The particle keeps its state.
    #[default]
    Passive,
    /// Reflect the wall-normal velocity relative to the wall.
    Rebound {
        /// Fraction of the normal velocity retained.
        restitution: f64,
        /// Fraction of the tangential velocity removed.
        friction: f64,
    },
    /// Deactivate the particle and zero its velocity.
    Stick,
    /// Remove the particle from the cloud.
    Escape,
}

impl WallInteraction {
    /// Validate the model coefficients
    pub fn validate(&self) -> Result<(), String> {
        if let WallInteraction::Rebound { restitution, friction } = self {
            if !(0.0..=1.0).contains(restitution) {
                return Err("restitution must be in range [0, 1]".to_string());
            }
            if !(0.0..=1.0).contains(friction) {
                return Err("friction must be in range [0, 1]".to_string());
            }
        }
        Ok(())
    }

    /// Apply the interaction to a particle on a wall face.
    pub(crate) fn apply(
        &self,
        p: &mut Particle,
        mesh: &PolyMesh,
        delta_t: f64,
        td: &mut TrackingData,
        report: &mut MoveReport,
    ) {
        match self {
            WallInteraction::Passive => {}
            WallInteraction::Rebound { restitution, friction } => {
                let (nw, up) = p.patch_data(mesh, delta_t);
                let Some(k) = p.kinematic.as_mut() else { return };
                let mut u = k.velocity - up;
                let un = u.dot(&nw);
                let ut = u - nw * un;
                if un > 0.0 {
                    u -= nw * ((1.0 + restitution) * un);
                }
                u -= ut * *friction;
                k.velocity = u + up;
            }
            WallInteraction::Stick => {
                if let Some(k) = p.kinematic.as_mut() {
                    k.active = false;
                    k.velocity = Default::default();
                }
            }
            WallInteraction::Escape => {
                td.keep_particle = false;
                report.escaped += 1;
                report.escaped_mass += p.mass();
                if let Some(k) = p.kinematic.as_mut() {
                    k.active = false;
                    k.velocity = Default::default();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(WallInteraction::Passive.validate().is_ok());
        let bad = WallInteraction::Rebound {
            restitution: 1.5,
            friction: 0.0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_json_tagging() {
        let w: WallInteraction =
            serde_json::from_str(r#"{"type": "rebound", "restitution": 0.8, "friction": 0.1}"#)
                .unwrap();
        assert_eq!(
            w,
            WallInteraction::Rebound {
                restitution: 0.8,
                friction: 0.1
            }
        );
        let s: WallInteraction = serde_json::from_str(r#"{"type": "stick"}"#).unwrap();
        assert_eq!(s, WallInteraction::Stick);
    }
}
