//! A single tracked particle.
//!
//! Position is held as barycentric coordinates in one tet of the cell
//! decomposition, identified by `(cell, tet_face, tet_pt)`. The particle is
//! either strictly inside its cell (`face == None`) or sitting on a face.
//!
//! Tracking lives in the `track` submodule, topology changes and location in
//! `topology`. Physics state is attached by composition in [`crate::parcel`].

mod topology;
mod track;

pub use topology::{LocateWarnings, OnBoundary};

use std::fmt;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::barycentric::{Barycentric, BarycentricTensor, Vector};
use crate::error::TrackingError;
use crate::mesh::PolyMesh;
use crate::parcel::{CollisionState, KinematicState};
use crate::settings::TrackingSettings;
use crate::tet::{MovingTetTransform, TetIndices};

/// Globally unique identity: the rank that created the particle and a
/// per-cloud counter on that rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticleId {
    /// Rank the particle was created on.
    pub proc: usize,
    /// Sequence number on that rank.
    pub id: u64,
}

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.proc, self.id)
    }
}

/// Where a particle is relative to the faces of its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Strictly inside the cell.
    Interior,
    /// On an internal face.
    OnInternalFace,
    /// On a boundary face.
    OnBoundaryFace,
}

/// A point-mass tracked through the mesh.
#[derive(Debug, Clone)]
pub struct Particle {
    pub(crate) coordinates: Barycentric,
    pub(crate) cell: usize,
    pub(crate) tet_face: usize,
    pub(crate) tet_pt: usize,
    pub(crate) face: Option<usize>,
    pub(crate) step_fraction: f64,
    pub(crate) behind: f64,
    pub(crate) n_behind: u32,
    pub(crate) origin_proc: usize,
    pub(crate) origin_id: u64,

    /// Kinematic parcel state, when attached.
    pub kinematic: Option<KinematicState>,
    /// Collision state, when attached.
    pub collision: Option<CollisionState>,
}

impl PartialEq for Particle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Particle {
    /// Construct from tracked state as read from file. No geometry checks are
    /// made.
    pub fn from_components(
        coordinates: Barycentric,
        cell: usize,
        tet_face: usize,
        tet_pt: usize,
        id: ParticleId,
    ) -> Self {
        Self {
            coordinates,
            cell,
            tet_face,
            tet_pt,
            face: None,
            step_fraction: 0.0,
            behind: 0.0,
            n_behind: 0,
            origin_proc: id.proc,
            origin_id: id.id,
            kinematic: None,
            collision: None,
        }
    }

    /// Construct at a Cartesian position. The cell is searched for when no
    /// hint is given. A position that turns out to be outside the mesh is
    /// moved onto the boundary with a warning.
    ///
    /// # Arguments
    /// * `mesh` - Mesh to place the particle in
    /// * `position` - Cartesian position
    /// * `cell` - Cell expected to contain the position, if known
    /// * `id` - Identity minted by the owning cloud
    /// * `settings` - Tracking settings used while locating
    pub fn at_position(
        mesh: &PolyMesh,
        position: &Vector,
        cell: Option<usize>,
        id: ParticleId,
        settings: &TrackingSettings,
    ) -> Result<Self, TrackingError> {
        Self::placed(mesh, position, cell, id, settings, &mut LocateWarnings::default())
    }

    /// As [`at_position`](Self::at_position), warning through a throttle
    /// shared with other placements.
    pub(crate) fn placed(
        mesh: &PolyMesh,
        position: &Vector,
        cell: Option<usize>,
        id: ParticleId,
        settings: &TrackingSettings,
        warnings: &mut LocateWarnings,
    ) -> Result<Self, TrackingError> {
        let cell = match cell {
            Some(c) => c,
            None => mesh.find_cell(position).ok_or(TrackingError::CellNotFound {
                x: position.x,
                y: position.y,
                z: position.z,
            })?,
        };
        let mut p = Self::from_components(Barycentric::CENTRE, cell, 0, 1, id);
        p.locate(
            mesh,
            position,
            Some(cell),
            OnBoundary::Warn(warnings),
            "Particle initialised with a location outside of the mesh",
            settings,
        )?;
        Ok(p)
    }

    /// Attach kinematic state.
    pub fn with_kinematic(mut self, state: KinematicState) -> Self {
        self.kinematic = Some(state);
        self
    }

    /// Attach collision state.
    pub fn with_collision(mut self, state: CollisionState) -> Self {
        self.collision = Some(state);
        self
    }

    // -----------------------------------------------------------------------
    // Access
    // -----------------------------------------------------------------------

    /// Barycentric coordinates in the current tet.
    pub fn coordinates(&self) -> &Barycentric {
        &self.coordinates
    }

    /// Occupied cell.
    pub fn cell(&self) -> usize {
        self.cell
    }

    /// Face of the occupied tet.
    pub fn tet_face(&self) -> usize {
        self.tet_face
    }

    /// Triangle of the occupied tet within its face.
    pub fn tet_pt(&self) -> usize {
        self.tet_pt
    }

    /// Face the particle sits on, if any.
    pub fn face(&self) -> Option<usize> {
        self.face
    }

    /// Fraction of the step completed.
    pub fn step_fraction(&self) -> f64 {
        self.step_fraction
    }

    /// Set the fraction of the step completed.
    pub fn set_step_fraction(&mut self, f: f64) {
        self.step_fraction = f;
    }

    /// Displacement accumulated behind the furthest point reached.
    pub fn behind(&self) -> f64 {
        self.behind
    }

    /// Consecutive sub-tracks that ended behind.
    pub fn n_behind(&self) -> u32 {
        self.n_behind
    }

    /// Rank the particle was created on.
    pub fn origin_proc(&self) -> usize {
        self.origin_proc
    }

    /// Sequence number on the originating rank.
    pub fn origin_id(&self) -> u64 {
        self.origin_id
    }

    /// Global identity.
    pub fn id(&self) -> ParticleId {
        ParticleId {
            proc: self.origin_proc,
            id: self.origin_id,
        }
    }

    /// Indices of the occupied tet.
    pub fn tet_indices(&self) -> TetIndices {
        TetIndices::new(self.cell, self.tet_face, self.tet_pt)
    }

    /// Whether the particle sits on a face.
    pub fn on_face(&self) -> bool {
        self.face.is_some()
    }

    /// Whether the particle sits on an internal face.
    pub fn on_internal_face(&self, mesh: &PolyMesh) -> bool {
        self.face.is_some_and(|f| mesh.is_internal_face(f))
    }

    /// Whether the particle sits on a boundary face.
    pub fn on_boundary_face(&self, mesh: &PolyMesh) -> bool {
        self.face.is_some_and(|f| !mesh.is_internal_face(f))
    }

    /// Current tracking state.
    pub fn state(&self, mesh: &PolyMesh) -> TrackState {
        match self.face {
            None => TrackState::Interior,
            Some(f) if mesh.is_internal_face(f) => TrackState::OnInternalFace,
            Some(_) => TrackState::OnBoundaryFace,
        }
    }

    /// Patch of the face the particle sits on.
    pub fn patch(&self, mesh: &PolyMesh) -> Option<usize> {
        self.face.and_then(|f| mesh.which_patch(f))
    }

    /// Whether the particle is tracked. Particles without kinematic state
    /// always are.
    pub fn active(&self) -> bool {
        self.kinematic.as_ref().map_or(true, |k| k.active)
    }

    /// Physical mass represented by the particle; zero without kinematic
    /// state.
    pub fn mass(&self) -> f64 {
        self.kinematic.as_ref().map_or(0.0, |k| k.n_particle * k.mass())
    }

    /// Zero the step bookkeeping at the start of a time step.
    pub fn reset(&mut self) {
        self.step_fraction = 0.0;
        self.behind = 0.0;
        self.n_behind = 0;
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    /// Motion fractions `(start, span)` of the remainder of the step.
    fn moving_fractions(&self, mesh: &PolyMesh, fraction: f64) -> (f64, f64) {
        let (s0, s1) = mesh.step_fraction_span();
        (s0 + self.step_fraction * s1, fraction * s1)
    }

    /// Forward transform of the occupied tet in the current geometry.
    pub fn stationary_tet_transform(&self, mesh: &PolyMesh) -> BarycentricTensor {
        self.tet_indices().stationary_transform(mesh)
    }

    /// Forward transform of the occupied tet over the next `fraction` of the
    /// step, with the sub-cycle span applied.
    pub fn moving_tet_transform(&self, mesh: &PolyMesh, fraction: f64) -> MovingTetTransform {
        let (start, span) = self.moving_fractions(mesh, fraction);
        self.tet_indices().moving_transform(mesh, start, span)
    }

    /// Forward transform at the particle's current time.
    pub fn current_tet_transform(&self, mesh: &PolyMesh) -> BarycentricTensor {
        if mesh.moving() {
            self.moving_tet_transform(mesh, 0.0).constant()
        } else {
            self.stationary_tet_transform(mesh)
        }
    }

    /// Cartesian position.
    pub fn position(&self, mesh: &PolyMesh) -> Vector {
        self.current_tet_transform(mesh).apply(&self.coordinates)
    }

    /// Fraction of the motion step reached by the particle.
    pub fn current_time_fraction(&self, mesh: &PolyMesh) -> f64 {
        let (s0, s1) = mesh.step_fraction_span();
        s0 + self.step_fraction * s1
    }

    /// Unit normal of the occupied tet's face triangle, pointing out of the
    /// occupied cell.
    pub fn normal(&self, mesh: &PolyMesh) -> Vector {
        let t = self.current_tet_transform(mesh);
        let n = (t.c - t.b).cross(&(t.d - t.b));
        let mag = n.norm();
        if mag > 0.0 {
            n / mag
        } else {
            n
        }
    }

    /// Face normal and face velocity at the particle. The velocity is zero
    /// on a static mesh.
    ///
    /// # Arguments
    /// * `mesh` - Mesh the particle is in
    /// * `delta_t` - Duration of the motion step
    pub fn patch_data(&self, mesh: &PolyMesh, delta_t: f64) -> (Vector, Vector) {
        let normal = self.normal(mesh);
        if !mesh.moving() || delta_t <= 0.0 {
            return (normal, Vector::zeros());
        }
        let tet = self.tet_indices();
        let old = tet.old_vertices(mesh);
        let new = tet.vertices(mesh);
        let w = &self.coordinates;
        let old_x = old[1] * w.b() + old[2] * w.c() + old[3] * w.d();
        let new_x = new[1] * w.b() + new[2] * w.c() + new[3] * w.d();
        let weight = w.b() + w.c() + w.d();
        let velocity = if weight > 0.0 {
            (new_x - old_x) / (weight * delta_t)
        } else {
            Vector::zeros()
        };
        (normal, velocity)
    }

    // -----------------------------------------------------------------------
    // Property transforms
    // -----------------------------------------------------------------------

    /// Rotate or reflect every vector-valued property.
    pub fn transform_properties(&mut self, t: &Matrix3<f64>) {
        if let Some(k) = self.kinematic.as_mut() {
            k.transform(t);
        }
        if let Some(c) = self.collision.as_mut() {
            c.transform(t);
        }
    }

    /// Apply a separation to position-like properties. Neither the base
    /// particle nor its attached state holds any, so nothing moves.
    pub(crate) fn translate_properties(&mut self, _separation: &Vector) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BoxMesh;
    use approx::assert_relative_eq;

    fn cube() -> PolyMesh {
        BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [1, 1, 1])
            .build()
            .expect("cube")
    }

    fn id(n: u64) -> ParticleId {
        ParticleId { proc: 0, id: n }
    }

    #[test]
    fn test_at_position() {
        let mesh = cube();
        let x = Vector::new(0.2, 0.7, 0.4);
        let p = Particle::at_position(&mesh, &x, None, id(0), &TrackingSettings::default())
            .expect("inside");
        assert_eq!(p.cell(), 0);
        assert_eq!(p.state(&mesh), TrackState::Interior);
        assert_relative_eq!(p.position(&mesh), x, epsilon = 1e-12);
        assert_relative_eq!(p.coordinates().sum(), 1.0, epsilon = 1e-12);
        assert!(p.coordinates().min() >= 0.0);
    }

    #[test]
    fn test_at_position_outside_fails() {
        let mesh = cube();
        let result = Particle::at_position(
            &mesh,
            &Vector::new(2.0, 0.5, 0.5),
            None,
            id(0),
            &TrackingSettings::default(),
        );
        assert!(matches!(result, Err(TrackingError::CellNotFound { .. })));
    }

    #[test]
    fn test_equality_is_identity() {
        let mesh = cube();
        let s = TrackingSettings::default();
        let a = Particle::at_position(&mesh, &Vector::new(0.5, 0.5, 0.5), None, id(7), &s)
            .expect("a");
        let b = Particle::at_position(&mesh, &Vector::new(0.1, 0.1, 0.1), None, id(7), &s)
            .expect("b");
        let c = Particle::at_position(&mesh, &Vector::new(0.5, 0.5, 0.5), None, id(8), &s)
            .expect("c");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_reset() {
        let mut p = Particle::from_components(Barycentric::CENTRE, 0, 0, 1, id(0));
        p.step_fraction = 0.7;
        p.behind = -0.1;
        p.n_behind = 3;
        p.reset();
        assert_eq!(p.step_fraction(), 0.0);
        assert_eq!(p.behind(), 0.0);
        assert_eq!(p.n_behind(), 0);
    }

    #[test]
    fn test_normal_points_out_of_cell() {
        let mesh = cube();
        for facei in 0..mesh.n_faces() {
            let p = Particle::from_components(Barycentric::CENTRE, 0, facei, 1, id(0));
            let n = p.normal(&mesh);
            let out = mesh.face_centres()[facei] - mesh.cell_centres()[0];
            assert!(n.dot(&out) > 0.0);
            assert_relative_eq!(n.norm(), 1.0, epsilon = 1e-12);
        }
    }
}
