//! Topology changes: moving between tets, faces and cells, locating a
//! particle from a Cartesian position, and re-expressing it across coupled
//! and processor boundaries.

use crate::barycentric::{Barycentric, Vector};
use crate::error::TrackingError;
use crate::mesh::{PatchKind, PolyMesh};
use crate::settings::TrackingSettings;

use super::Particle;

/// Warnings about particles located outside the mesh before they are
/// suppressed.
const MAX_LOCATE_WARNINGS: usize = 100;

/// Throttle for warnings about particles located outside the mesh. Each
/// cloud keeps its own.
#[derive(Debug, Clone, Default)]
pub struct LocateWarnings {
    issued: usize,
}

impl LocateWarnings {
    /// Warnings issued so far, counting suppressed ones.
    pub fn issued(&self) -> usize {
        self.issued
    }

    fn warn(&mut self, context: &str, id: super::ParticleId, face: usize, position: &Vector) {
        if self.issued < MAX_LOCATE_WARNINGS {
            tracing::warn!(
                "{}: particle {} placed on face {} at {:?}",
                context,
                id,
                face,
                position.as_slice()
            );
        } else if self.issued == MAX_LOCATE_WARNINGS {
            tracing::warn!("Suppressing further warnings about particles located outside the mesh");
        }
        self.issued += 1;
    }
}

/// What [`Particle::locate`] does when the position turns out to be outside
/// the mesh.
#[derive(Debug)]
pub enum OnBoundary<'a> {
    /// Fail with [`TrackingError::OutsideMesh`].
    Fail,
    /// Leave the particle on the boundary face and warn.
    Warn(&'a mut LocateWarnings),
}

/// Directed edge `(start, end)`.
type Edge = (usize, usize);

/// 1 when the edges match, -1 when they are reversed, 0 otherwise.
fn compare_edges(a: Edge, b: Edge) -> i32 {
    if a == b {
        1
    } else if a.0 == b.1 && a.1 == b.0 {
        -1
    } else {
        0
    }
}

fn edge_has(e: Edge, p: usize) -> bool {
    e.0 == p || e.1 == p
}

/// Whether two faces are made of the same points.
fn same_points(a: &[usize], b: &[usize]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

impl Particle {
    /// Swap the two triangle vertex weights. Needed whenever the particle is
    /// re-expressed in a tet whose triangle runs the other way round.
    pub(crate) fn reflect(&mut self) {
        self.coordinates.0.swap(2, 3);
    }

    /// Cycle the base and triangle vertex weights `(b, c, d)`.
    pub(crate) fn rotate(&mut self, reverse: bool) {
        let y = &mut self.coordinates.0;
        if reverse {
            y[1..4].rotate_right(1);
        } else {
            y[1..4].rotate_left(1);
        }
    }

    /// Move into the tet across internal triangle `tri` of the current tet.
    pub(crate) fn change_tet(&mut self, mesh: &PolyMesh, tri: usize) -> Result<(), TrackingError> {
        let is_owner = mesh.face_owner()[self.tet_face] == self.cell;
        let first = 1;
        let last = mesh.faces()[self.tet_face].len() - 2;

        match (tri, is_owner) {
            (1, _) => return self.change_face(mesh, tri),
            (2, true) | (3, false) => {
                if self.tet_pt == last {
                    return self.change_face(mesh, tri);
                }
                self.reflect();
                self.tet_pt += 1;
            }
            (2, false) | (3, true) => {
                if self.tet_pt == first {
                    return self.change_face(mesh, tri);
                }
                self.reflect();
                self.tet_pt -= 1;
            }
            _ => {
                tracing::warn!(
                    "Particle {} asked to change tet through triangle {}",
                    self.id(),
                    tri
                );
            }
        }
        Ok(())
    }

    /// Move into the tet of another face of the same cell that shares the
    /// edge crossed through triangle `tri`.
    pub(crate) fn change_face(&mut self, mesh: &PolyMesh, tri: usize) -> Result<(), TrackingError> {
        let old = self.tet_indices().face_tri_is(mesh);
        let shared: Edge = match tri {
            1 => (old[1], old[2]),
            2 => (old[2], old[0]),
            _ => (old[0], old[1]),
        };

        let mut found = None;
        for &new_face in &mesh.cells()[self.cell] {
            if new_face == self.tet_face {
                continue;
            }
            let f = &mesh.faces()[new_face];
            let n = f.len();
            // Matching the edge direction as well as its points avoids
            // coincident ACMI faces.
            let wanted = if mesh.face_owner()[new_face] == self.cell { -1 } else { 1 };
            let Some(edge) =
                (0..n).find(|&i| compare_edges(shared, (f[i], f[(i + 1) % n])) == wanted)
            else {
                continue;
            };
            let base = mesh.tet_base_pt(new_face);
            let relative = (edge + n - base) % n;
            found = Some((new_face, relative.clamp(1, n - 2)));
            break;
        }

        let Some((new_face, tet_pt)) = found else {
            return Err(TrackingError::EdgeNotFound {
                cell: self.cell,
                face: self.tet_face,
                start: shared.0,
                end: shared.1,
            });
        };
        self.tet_face = new_face;
        self.tet_pt = tet_pt;

        // Pre-rotation puts the shared edge opposite the base
        if !edge_has(shared, old[1]) {
            self.rotate(false);
        } else if !edge_has(shared, old[2]) {
            self.rotate(true);
        }

        let new = self.tet_indices().face_tri_is(mesh);

        self.reflect();

        // Post-rotation puts the shared edge back where it belongs
        if !edge_has(shared, new[1]) {
            self.rotate(true);
        } else if !edge_has(shared, new[2]) {
            self.rotate(false);
        }
        Ok(())
    }

    /// Move into the cell on the other side of the current internal face.
    pub(crate) fn change_cell(&mut self, mesh: &PolyMesh) {
        let Some(face) = self.face else { return };
        let owner = mesh.face_owner()[face];
        self.cell = if self.cell == owner {
            mesh.face_neighbour()[face]
        } else {
            owner
        };
        self.reflect();
    }

    /// On coincident boundary faces, adopt the one on the lowest-indexed
    /// patch. An ACMI face therefore wins over its non-overlap twin.
    pub fn change_to_master_patch(&mut self, mesh: &PolyMesh) {
        let Some(mut face) = self.face else { return };
        let Some(mut this_patch) = mesh.which_patch(face) else { return };

        for &other in &mesh.cells()[self.cell] {
            if other == face || mesh.is_internal_face(other) {
                continue;
            }
            if !same_points(&mesh.faces()[face], &mesh.faces()[other]) {
                continue;
            }
            if let Some(other_patch) = mesh.which_patch(other) {
                if other_patch < this_patch {
                    face = other;
                    this_patch = other_patch;
                }
            }
        }
        self.face = Some(face);
        self.tet_face = face;
    }

    // -----------------------------------------------------------------------
    // Location
    // -----------------------------------------------------------------------

    /// Place the particle at `position`, searching the tets of `cell` (or of
    /// the cell found by search when `None`).
    ///
    /// When no tet contains the position the particle is tracked from the
    /// cell centre towards it, and `on_boundary` decides what ending on a
    /// boundary face means.
    pub fn locate(
        &mut self,
        mesh: &PolyMesh,
        position: &Vector,
        cell: Option<usize>,
        on_boundary: OnBoundary<'_>,
        context: &str,
        settings: &TrackingSettings,
    ) -> Result<(), TrackingError> {
        self.cell = match cell {
            Some(c) => c,
            None => mesh.find_cell(position).ok_or(TrackingError::CellNotFound {
                x: position.x,
                y: position.y,
                z: position.z,
            })?,
        };
        self.face = None;

        let cell_faces = mesh.cells()[self.cell].clone();
        let saved_fraction = self.step_fraction;
        let mut best: Option<(f64, usize, usize)> = None;

        for &tet_face in &cell_faces {
            let n = mesh.faces()[tet_face].len();
            for tet_pt in 1..n - 1 {
                self.coordinates = Barycentric::CENTRE;
                self.tet_face = tet_face;
                self.tet_pt = tet_pt;
                self.face = None;
                let displacement = position - self.current_tet_transform(mesh).a;
                let (f, tri) = self.track_to_tri(mesh, &displacement, 0.0)?;
                self.step_fraction = saved_fraction;
                if tri.is_none() {
                    self.coordinates.clip_negative();
                    return Ok(());
                }
                if best.map_or(true, |(min_f, _, _)| f < min_f) {
                    best = Some((f, tet_face, tet_pt));
                }
            }
        }

        // The position is (hopefully only slightly) outside the cell. Track
        // into the tet that got furthest.
        if let Some((_, tet_face, tet_pt)) = best {
            self.coordinates = Barycentric::CENTRE;
            self.tet_face = tet_face;
            self.tet_pt = tet_pt;
            self.face = None;
        }
        let displacement = position - self.current_tet_transform(mesh).a;
        self.track(mesh, &displacement, 0.0, settings)?;
        self.step_fraction = saved_fraction;
        if !self.on_face() {
            self.coordinates.clip_negative();
            return Ok(());
        }

        match on_boundary {
            OnBoundary::Fail => Err(TrackingError::OutsideMesh {
                origin_proc: self.origin_proc,
                origin_id: self.origin_id,
                context: context.to_string(),
            }),
            OnBoundary::Warn(warnings) => {
                warnings.warn(context, self.id(), self.tet_face, position);
                Ok(())
            }
        }
    }

    /// Re-locate after the mesh changed underneath the particle, keeping its
    /// identity, step progress and attached state. `cell` is the expected
    /// cell on the new mesh; the cell is searched for when it is missing or
    /// invalid. Ending up outside the new mesh is an error.
    pub fn relocate(
        &mut self,
        mesh: &PolyMesh,
        position: &Vector,
        cell: Option<usize>,
        settings: &TrackingSettings,
    ) -> Result<(), TrackingError> {
        let cell = match cell {
            Some(c) if c < mesh.n_cells() => Some(c),
            _ => mesh.find_cell(position).or_else(|| mesh.find_nearest_cell(position)),
        };
        self.locate(
            mesh,
            position,
            cell,
            OnBoundary::Fail,
            "Particle mapped to a location outside of the mesh",
            settings,
        )
    }

    // -----------------------------------------------------------------------
    // Coupled and parallel transfer
    // -----------------------------------------------------------------------

    /// Move to the twin face of a conformal cyclic patch. Both sides number
    /// their face points away from their own cell, so the tet point counts
    /// backwards from the base on the other side.
    pub(crate) fn cross_to_twin_face(&mut self, mesh: &PolyMesh, twin_face: usize) {
        self.face = Some(twin_face);
        self.tet_face = twin_face;
        self.cell = mesh.face_owner()[twin_face];
        self.tet_pt = mesh.faces()[twin_face].len() - 1 - self.tet_pt;
        self.reflect();
    }

    /// Convert the face index to a patch-local index before the particle is
    /// sent to the rank across a processor patch.
    pub fn prepare_for_parallel_transfer(&mut self, mesh: &PolyMesh) {
        if let (Some(face), Some(patch)) = (self.face, self.patch(mesh)) {
            self.face = Some(mesh.boundary()[patch].which_face(face));
        }
    }

    /// Re-express a particle received through processor patch `patch`, whose
    /// face index is still local to the sending patch.
    pub fn correct_after_parallel_transfer(
        &mut self,
        mesh: &PolyMesh,
        patch: usize,
    ) -> Result<(), TrackingError> {
        let pp = mesh
            .boundary()
            .get(patch)
            .ok_or(TrackingError::NotProcessorPatch(patch))?;
        if !matches!(pp.kind, PatchKind::Processor(_)) {
            return Err(TrackingError::NotProcessorPatch(patch));
        }
        let local = self.face.unwrap_or(0);
        let face = pp.start + local;
        self.cell = mesh.face_owner()[face];
        self.face = Some(face);
        self.tet_face = face;
        self.tet_pt = mesh.faces()[face].len() - 1 - self.tet_pt;
        self.reflect();
        Ok(())
    }

    /// Tet point of the current tet as seen from another decomposition of the
    /// same face, where the face may be oriented the other way.
    ///
    /// # Arguments
    /// * `mesh` - Mesh the particle currently lives on
    /// * `proc_mesh` - Mesh the particle is being mapped onto
    /// * `proc_cell` - Cell on `proc_mesh`
    /// * `proc_tet_face` - Face on `proc_mesh` matching the current tet face
    pub fn proc_tet_pt(
        &self,
        mesh: &PolyMesh,
        proc_mesh: &PolyMesh,
        proc_cell: usize,
        proc_tet_face: usize,
    ) -> usize {
        let here = mesh.face_owner()[self.tet_face] == self.cell;
        let there = proc_mesh.face_owner()[proc_tet_face] == proc_cell;
        if here == there {
            self.tet_pt
        } else {
            proc_mesh.faces()[proc_tet_face].len() - 1 - self.tet_pt
        }
    }

    /// Copy of the particle re-expressed on `target`, another partition of
    /// the same geometry. `cell` and `tet_face` are the target indices of the
    /// current cell and tet face, `face` the target index of the face the
    /// particle sits on.
    ///
    /// When the two faces are split into tets from different base points the
    /// particle is located by position instead.
    pub fn mapped_to(
        &self,
        mesh: &PolyMesh,
        target: &PolyMesh,
        cell: usize,
        tet_face: usize,
        face: Option<usize>,
        settings: &TrackingSettings,
    ) -> Result<Particle, TrackingError> {
        let base_here = mesh.faces()[self.tet_face][mesh.tet_base_pt(self.tet_face)];
        let base_there = target.faces()[tet_face][target.tet_base_pt(tet_face)];

        let mut p = self.clone();
        if mesh.points()[base_here] == target.points()[base_there] {
            p.tet_pt = self.proc_tet_pt(mesh, target, cell, tet_face);
            p.cell = cell;
            p.tet_face = tet_face;
            p.face = face;
        } else {
            let position = self.position(mesh);
            p.relocate(target, &position, Some(cell), settings)?;
        }
        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BoxMesh;
    use crate::particle::ParticleId;
    use approx::assert_relative_eq;

    fn block(n: usize) -> PolyMesh {
        BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [n, n, n])
            .build()
            .expect("block")
    }

    fn particle(cell: usize, tet_face: usize, tet_pt: usize, y: [f64; 4]) -> Particle {
        Particle::from_components(
            Barycentric(y),
            cell,
            tet_face,
            tet_pt,
            ParticleId { proc: 0, id: 0 },
        )
    }

    #[test]
    fn test_reflect_and_rotate() {
        let mut p = particle(0, 0, 1, [0.1, 0.2, 0.3, 0.4]);
        p.reflect();
        assert_eq!(p.coordinates().0, [0.1, 0.2, 0.4, 0.3]);
        p.reflect();
        p.rotate(false);
        assert_eq!(p.coordinates().0, [0.1, 0.3, 0.4, 0.2]);
        p.rotate(true);
        assert_eq!(p.coordinates().0, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_change_tet_keeps_position() {
        let mesh = block(2);
        for cell in 0..mesh.n_cells() {
            for &tet_face in &mesh.cells()[cell] {
                let n = mesh.faces()[tet_face].len();
                for tet_pt in 1..n - 1 {
                    for tri in 1..4 {
                        let mut y = [0.25, 0.3, 0.2, 0.25];
                        let moved = y[tri];
                        y[tri] = 0.0;
                        y[0] += moved;
                        let mut p = particle(cell, tet_face, tet_pt, y);
                        let before = p.position(&mesh);
                        p.change_tet(&mesh, tri).expect("neighbouring tet");
                        assert_eq!(p.cell(), cell);
                        assert_relative_eq!(p.position(&mesh), before, epsilon = 1e-12);
                        assert_relative_eq!(p.coordinates().sum(), 1.0, epsilon = 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_change_cell_keeps_position() {
        let mesh = block(2);
        for face in 0..mesh.n_internal_faces() {
            let owner = mesh.face_owner()[face];
            let mut p = particle(owner, face, 1, [0.0, 0.3, 0.3, 0.4]);
            p.face = Some(face);
            let before = p.position(&mesh);
            p.change_cell(&mesh);
            assert_eq!(p.cell(), mesh.face_neighbour()[face]);
            assert_relative_eq!(p.position(&mesh), before, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_locate_in_every_cell() {
        let mesh = block(3);
        let settings = TrackingSettings::default();
        let mut p = particle(0, 0, 1, Barycentric::CENTRE.0);
        for cell in 0..mesh.n_cells() {
            let x = mesh.cell_centres()[cell] + Vector::new(0.05, -0.03, 0.02);
            p.locate(&mesh, &x, None, OnBoundary::Fail, "test", &settings)
                .expect("inside");
            assert_eq!(p.cell(), cell);
            assert!(!p.on_face());
            assert_relative_eq!(p.position(&mesh), x, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_locate_outside_warns_per_throttle() {
        let mesh = block(1);
        let settings = TrackingSettings::default();
        let mut warnings = LocateWarnings::default();
        let mut p = particle(0, 0, 1, Barycentric::CENTRE.0);
        for _ in 0..3 {
            p.locate(
                &mesh,
                &Vector::new(1.5, 0.5, 0.5),
                Some(0),
                OnBoundary::Warn(&mut warnings),
                "test",
                &settings,
            )
            .expect("placed on the boundary");
            assert!(p.on_face());
        }
        assert_eq!(warnings.issued(), 3);
        assert_eq!(LocateWarnings::default().issued(), 0);
    }

    #[test]
    fn test_relocate_outside_is_error() {
        let mesh = block(1);
        let settings = TrackingSettings::default();
        let mut p = particle(0, 0, 1, Barycentric::CENTRE.0);
        let result = p.relocate(&mesh, &Vector::new(1.5, 0.5, 0.5), Some(0), &settings);
        assert!(matches!(result, Err(TrackingError::OutsideMesh { .. })));
    }

    #[test]
    fn test_proc_tet_pt_same_orientation() {
        let mesh = block(2);
        let face = mesh.n_internal_faces();
        let owner = mesh.face_owner()[face];
        let p = particle(owner, face, 2, Barycentric::CENTRE.0);
        assert_eq!(p.proc_tet_pt(&mesh, &mesh, owner, face), 2);

        let internal = 0;
        let neighbour = mesh.face_neighbour()[internal];
        let p = particle(mesh.face_owner()[internal], internal, 1, Barycentric::CENTRE.0);
        let n = mesh.faces()[internal].len();
        assert_eq!(p.proc_tet_pt(&mesh, &mesh, neighbour, internal), n - 2);
    }

    #[test]
    fn test_parallel_transfer_needs_processor_patch() {
        let mesh = block(1);
        let mut p = particle(0, 0, 1, Barycentric::CENTRE.0);
        assert!(matches!(
            p.correct_after_parallel_transfer(&mesh, 0),
            Err(TrackingError::NotProcessorPatch(0))
        ));
        assert!(matches!(
            p.correct_after_parallel_transfer(&mesh, 99),
            Err(TrackingError::NotProcessorPatch(99))
        ));
    }
}
