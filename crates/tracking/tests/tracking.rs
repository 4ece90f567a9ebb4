//! Tracking through static and moving box meshes.
//!
//! Checks the barycentric invariant, that a track inside the mesh ends at
//! `start + displacement`, and that a mesh moving under a particle leaves it
//! where it was.

use approx::assert_relative_eq;
use tracking::io::wire;
use tracking::{
    BoxMesh, Cloud, Convected, Particle, ParticleId, PolyMesh, SingleRank, TrackState,
    TrackingError, TrackingSettings, Transport, TransportError, Vector,
};

fn unit_box(n: usize) -> PolyMesh {
    BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [n, n, n])
        .build()
        .expect("box mesh")
}

fn id(n: u64) -> ParticleId {
    ParticleId { proc: 0, id: n }
}

#[test]
fn half_edge_track_in_single_cell() {
    let mesh = unit_box(1);
    let settings = TrackingSettings::default();
    let centroid = mesh.cell_centres()[0];
    let mut p = Particle::at_position(&mesh, &centroid, Some(0), id(0), &settings)
        .expect("centroid is inside");

    let displacement = Vector::new(1.0, 1.0, 1.0).normalize() * 0.5;
    let remaining = p
        .track(&mesh, &displacement, 1.0, &settings)
        .expect("track");

    assert_eq!(remaining, 0.0);
    assert_eq!(p.state(&mesh), TrackState::Interior);
    assert!(p.face().is_none());
    assert_relative_eq!(p.position(&mesh), centroid + displacement, epsilon = 1e-12);
    assert_relative_eq!(p.step_fraction(), 1.0, epsilon = 1e-12);
}

#[test]
fn track_across_cells_keeps_invariant() {
    let mesh = unit_box(3);
    let settings = TrackingSettings::default();
    let tracks = [
        (Vector::new(0.1, 0.2, 0.3), Vector::new(0.75, 0.5, 0.3)),
        (Vector::new(0.9, 0.85, 0.15), Vector::new(-0.7, -0.6, 0.7)),
        (Vector::new(0.45, 0.05, 0.55), Vector::new(0.02, 0.9, -0.4)),
        (Vector::new(0.3, 0.7, 0.9), Vector::new(0.0, 0.0, -0.85)),
    ];

    for (i, (start, displacement)) in tracks.iter().enumerate() {
        let mut p = Particle::at_position(&mesh, start, None, id(i as u64), &settings)
            .expect("start inside");
        let remaining = p.track(&mesh, displacement, 1.0, &settings).expect("track");

        assert_eq!(remaining, 0.0, "track {} stopped early", i);
        assert!(!p.on_face());
        assert_relative_eq!(p.coordinates().sum(), 1.0, epsilon = 1e-9);
        assert!(p.coordinates().min() > -1e-9);
        assert_relative_eq!(p.position(&mesh), start + displacement, epsilon = 1e-9);
        assert_eq!(mesh.find_cell(&(start + displacement)), Some(p.cell()));
    }
}

#[test]
fn track_to_boundary_stops_on_face() {
    let mesh = unit_box(2);
    let settings = TrackingSettings::default();
    let start = Vector::new(0.3, 0.4, 0.6);
    let mut p = Particle::at_position(&mesh, &start, None, id(0), &settings).expect("inside");

    let remaining = p
        .track(&mesh, &Vector::new(1.4, 0.0, 0.0), 1.0, &settings)
        .expect("track");

    assert_relative_eq!(remaining, 0.5, epsilon = 1e-9);
    assert_eq!(p.state(&mesh), TrackState::OnBoundaryFace);
    assert_relative_eq!(p.position(&mesh), Vector::new(1.0, 0.4, 0.6), epsilon = 1e-9);
    assert_relative_eq!(p.step_fraction(), 0.5, epsilon = 1e-9);
}

/// A start point on a tet's internal triangle locates with a weight of
/// round-off size. The track must still cross that triangle and stop on the
/// boundary face rather than run out of the mesh.
#[test]
fn track_from_tet_triangle_stops_on_boundary() {
    let mesh = BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [3, 1, 1])
        .build()
        .expect("box mesh");
    let settings = TrackingSettings::default();
    let start = Vector::new(0.8, 0.4, 0.3);

    for (i, dx) in [0.3, 0.4, 0.7, 1.0].into_iter().enumerate() {
        let mut p = Particle::at_position(&mesh, &start, None, id(i as u64), &settings)
            .expect("inside");
        assert!(p.coordinates().min() >= 0.0);

        let remaining = p
            .track(&mesh, &Vector::new(dx, 0.0, 0.0), 1.0, &settings)
            .expect("track");

        assert_relative_eq!(remaining, 1.0 - 0.2 / dx, epsilon = 1e-9);
        assert_eq!(p.state(&mesh), TrackState::OnBoundaryFace);
        assert!(p.coordinates().min() > -1e-12, "weights {:?}", p.coordinates());
        assert_relative_eq!(p.position(&mesh), Vector::new(1.0, 0.4, 0.3), epsilon = 1e-9);
    }
}

#[test]
fn translating_mesh_leaves_particle_in_place() {
    let mut mesh = unit_box(2);
    let settings = TrackingSettings::default();
    let start = Vector::new(0.3, 0.6, 0.45);
    let mut p = Particle::at_position(&mesh, &start, None, id(0), &settings).expect("inside");

    let shift = Vector::new(0.1, -0.05, 0.0);
    let moved: Vec<Vector> = mesh.points().iter().map(|x| x + shift).collect();
    mesh.move_points(moved).expect("move");
    assert!(mesh.moving());

    // At the start of the step the particle sees the old geometry
    assert_relative_eq!(p.position(&mesh), start, epsilon = 1e-12);

    let remaining = p.track(&mesh, &Vector::zeros(), 1.0, &settings).expect("track");
    assert_eq!(remaining, 0.0);
    assert_relative_eq!(p.step_fraction(), 1.0, epsilon = 1e-12);
    assert_relative_eq!(p.position(&mesh), start, epsilon = 1e-9);
    assert_relative_eq!(p.coordinates().sum(), 1.0, epsilon = 1e-9);
}

#[test]
fn moving_mesh_with_displacement() {
    let mut mesh = unit_box(2);
    let settings = TrackingSettings::default();
    let start = Vector::new(0.2, 0.2, 0.2);
    let mut p = Particle::at_position(&mesh, &start, None, id(0), &settings).expect("inside");

    // Stretch the box to twice its size along x
    let moved: Vec<Vector> = mesh
        .points()
        .iter()
        .map(|x| Vector::new(2.0 * x.x, x.y, x.z))
        .collect();
    mesh.move_points(moved).expect("move");

    let displacement = Vector::new(0.9, 0.5, 0.3);
    let remaining = p.track(&mesh, &displacement, 1.0, &settings).expect("track");
    assert_eq!(remaining, 0.0);
    assert_relative_eq!(p.position(&mesh), start + displacement, epsilon = 1e-9);
    assert_eq!(mesh.find_cell(&(start + displacement)), Some(p.cell()));
}

/// Abandoning a track after `max_n_behind` backward sub-tracks is a tuned
/// approximation. A zero threshold abandons every track, which must still
/// end the step without moving the particle.
#[test]
fn behind_limit_abandons_step() {
    let mesh = unit_box(2);
    let settings = TrackingSettings {
        max_n_behind: 0,
        ..TrackingSettings::default()
    };
    let mut cloud = Cloud::new("stuck", settings);
    let start = Vector::new(0.3, 0.3, 0.3);
    cloud.inject(&mesh, &start, None, None).expect("inject");

    let motion = Convected {
        velocity: Vector::new(0.1, 0.0, 0.0),
    };
    let report = cloud
        .move_particles(&mesh, &mut SingleRank::new(), &motion, 1.0)
        .expect("move");

    assert_eq!(report.stuck, 1);
    assert_eq!(cloud.len(), 1);
    let p = &cloud.particles()[0];
    assert_eq!(p.step_fraction(), 1.0);
    assert_relative_eq!(p.position(&mesh), start, epsilon = 1e-12);
}

#[test]
fn cloud_step_moves_every_particle() {
    let mesh = unit_box(4);
    let mut cloud = Cloud::new("tracers", TrackingSettings::default());
    let mut starts = Vec::new();
    for i in 0..4 {
        for j in 0..4 {
            let x = Vector::new(0.1 + 0.05 * i as f64, 0.12 + 0.2 * j as f64, 0.33);
            cloud.inject(&mesh, &x, None, None).expect("inject");
            starts.push(x);
        }
    }

    // Displacements span two cells, so each step is split into sub-tracks
    let motion = Convected {
        velocity: Vector::new(0.4, 0.05, 0.2),
    };
    let report = cloud
        .move_particles(&mesh, &mut SingleRank::new(), &motion, 1.0)
        .expect("move");
    assert_eq!(report.rounds, 1);
    assert_eq!(report.lost, 0);

    for (p, start) in cloud.iter().zip(&starts) {
        assert_relative_eq!(p.step_fraction(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.coordinates().sum(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(p.position(&mesh), start + motion.velocity, epsilon = 1e-9);
    }
}

/// Second rank of a pair whose neighbour announces a message every round.
struct EndlessNeighbour;

impl Transport for EndlessNeighbour {
    fn rank(&self) -> usize {
        1
    }

    fn n_ranks(&self) -> usize {
        2
    }

    fn send(&mut self, _to: usize, _data: Vec<u8>) -> Result<(), TransportError> {
        Ok(())
    }

    fn finished_sends(&mut self) -> Result<Vec<Vec<usize>>, TransportError> {
        Ok(vec![vec![0, 8], vec![0, 0]])
    }

    fn receive(&mut self, _from: usize) -> Result<Vec<u8>, TransportError> {
        Ok(wire::encode_transfer(&[], &[]))
    }
}

#[test]
fn transfer_rounds_are_capped() {
    let mesh = unit_box(2);
    let settings = TrackingSettings {
        max_transfer_rounds: 3,
        ..TrackingSettings::default()
    };
    let mut cloud = Cloud::new("endless", settings);
    cloud
        .inject(&mesh, &Vector::new(0.3, 0.3, 0.3), None, None)
        .expect("inject");
    let motion = Convected {
        velocity: Vector::new(0.1, 0.0, 0.0),
    };

    let err = cloud
        .move_particles(&mesh, &mut EndlessNeighbour, &motion, 1.0)
        .unwrap_err();
    assert!(matches!(err, TrackingError::TransferRoundLimit { rounds: 3 }));
    // The particle finished its step in the first round and is still resident
    assert_eq!(cloud.len(), 1);
}
