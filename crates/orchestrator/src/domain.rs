//! Case setup: mesh generation and initial particle placement

use tracking::{Cloud, KinematicState, MeshError, PolyMesh, Vector};

use crate::config::{InjectionConfig, SimulationConfig};

/// Build the whole, undecomposed mesh of the case
pub fn setup_mesh(config: &SimulationConfig) -> Result<PolyMesh, MeshError> {
    let mesh = config.box_mesh().build()?;
    tracing::info!(
        "Mesh setup complete: {} cells, {} faces, {} patches",
        mesh.n_cells(),
        mesh.n_faces(),
        mesh.boundary().len()
    );
    Ok(mesh)
}

/// Positions to inject: the explicit list followed by the lattice, if any
pub fn injection_positions(injection: &InjectionConfig) -> Vec<Vector> {
    let mut positions: Vec<Vector> = injection.positions.iter().map(|&x| Vector::from(x)).collect();

    if let Some(lattice) = &injection.lattice {
        let [nx, ny, nz] = lattice.counts;
        let min = Vector::from(lattice.min);
        let max = Vector::from(lattice.max);
        let spacing = Vector::new(
            (max.x - min.x) / nx.max(1) as f64,
            (max.y - min.y) / ny.max(1) as f64,
            (max.z - min.z) / nz.max(1) as f64,
        );

        // Reserve capacity
        positions.reserve(nx * ny * nz);

        // Place on cell centres of the lattice
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    positions.push(Vector::new(
                        min.x + (i as f64 + 0.5) * spacing.x,
                        min.y + (j as f64 + 0.5) * spacing.y,
                        min.z + (k as f64 + 0.5) * spacing.z,
                    ));
                }
            }
        }
    }

    positions
}

/// Create the cloud of the case on the whole mesh and inject its parcels.
///
/// Positions outside the mesh are skipped with a warning.
pub fn setup_cloud(config: &SimulationConfig, mesh: &PolyMesh) -> Cloud {
    let mut cloud = Cloud::new(config.cloud_name.clone(), config.tracking.clone())
        .with_wall_interaction(config.wall.clone());

    let injection = &config.injection;
    let velocity = Vector::from(injection.velocity);
    let mut skipped = 0;
    for x in injection_positions(injection) {
        let parcel = KinematicState::new(velocity, injection.diameter, injection.density);
        if let Err(e) = cloud.inject(mesh, &x, None, Some(parcel)) {
            tracing::warn!("Skipping injection at {:?}: {}", x, e);
            skipped += 1;
        }
    }

    tracing::info!(
        "Cloud '{}' set up: {} parcels injected, {} skipped",
        cloud.name(),
        cloud.len(),
        skipped
    );
    cloud
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(injection: &str) -> SimulationConfig {
        let json = format!(
            r#"{{
                "name": "test",
                "mesh": {{ "origin": [0, 0, 0], "lengths": [1, 1, 1], "divisions": [2, 2, 2] }},
                "injection": {},
                "delta_t": 0.01,
                "n_steps": 1
            }}"#,
            injection
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_lattice_positions() {
        let config = config(
            r#"{ "positions": [[0.1, 0.1, 0.1]],
                 "lattice": { "min": [0, 0, 0], "max": [1, 0.5, 1], "counts": [2, 1, 4] } }"#,
        );
        let positions = injection_positions(&config.injection);
        assert_eq!(positions.len(), 9);
        assert_relative_eq!(positions[0], Vector::new(0.1, 0.1, 0.1));
        assert_relative_eq!(positions[1], Vector::new(0.25, 0.25, 0.125));
        assert_relative_eq!(positions[8], Vector::new(0.75, 0.25, 0.875));
    }

    #[test]
    fn test_setup_cloud_skips_outside() {
        let config = config(
            r#"{ "positions": [[0.2, 0.3, 0.4], [1.5, 0.5, 0.5], [0.7, 0.8, 0.9]],
                 "velocity": [1, 0, 0], "diameter": 0.001, "density": 2000 }"#,
        );
        let mesh = setup_mesh(&config).unwrap();
        let cloud = setup_cloud(&config, &mesh);

        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.name(), "cloud");
        for p in cloud.iter() {
            let k = p.kinematic.as_ref().unwrap();
            assert_eq!(k.velocity, Vector::new(1.0, 0.0, 0.0));
            assert_eq!(k.density, 2000.0);
        }
        assert_relative_eq!(
            cloud.particles()[1].position(&mesh),
            Vector::new(0.7, 0.8, 0.9),
            epsilon = 1e-12
        );
    }
}
