//! Polyhedral mesh consumed by the tracker.
//!
//! Faces are stored as ordered point lists whose right-hand normal points out
//! of the owner cell. Internal faces come first; boundary faces follow,
//! grouped into contiguous [`Patch`]es. Each face carries a tet base point so
//! that every (cell, face) pair decomposes into tets deterministically. Coupled
//! faces always use base point 0 so tets on the two sides correspond.
//!
//! A mesh that has been moved with [`PolyMesh::move_points`] reports itself as
//! moving and keeps the previous points and cell centres, which the tracker
//! interpolates between.

pub mod block;
pub mod patch;

pub use block::{BoxMesh, Side, SideKind};
pub use patch::{
    AcmiCoupling, AmiCoupling, CoupledTransform, CyclicCoupling, Patch, PatchKind,
    ProcessorCoupling, ACMI_TOLERANCE,
};

use crate::barycentric::Vector;
use crate::error::MeshError;

const VSMALL: f64 = 1e-300;

/// Immutable-per-step polyhedral mesh with derived geometry.
#[derive(Debug, Clone)]
pub struct PolyMesh {
    points: Vec<Vector>,
    old_points: Option<Vec<Vector>>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    patches: Vec<Patch>,
    rank: usize,

    cells: Vec<Vec<usize>>,
    face_centres: Vec<Vector>,
    face_areas: Vec<Vector>,
    cell_centres: Vec<Vector>,
    old_cell_centres: Option<Vec<Vector>>,
    cell_volumes: Vec<f64>,
    tet_base_pts: Vec<usize>,
    /// Faces of ACMI non-overlap patches; they duplicate coupled faces and are
    /// left out of cell volume integration.
    shadow_faces: Vec<bool>,
    step_fraction_span: (f64, f64),
}

impl PolyMesh {
    /// Build a mesh from primitive connectivity and validate it.
    ///
    /// # Arguments
    /// * `points` - Point coordinates
    /// * `faces` - Point lists, normal pointing out of the owner
    /// * `owner` - Owner cell of every face
    /// * `neighbour` - Neighbour cell of every internal face
    /// * `patches` - Boundary patches covering the remaining faces in order
    pub fn new(
        points: Vec<Vector>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        patches: Vec<Patch>,
    ) -> Result<Self, MeshError> {
        if owner.len() != faces.len() {
            return Err(MeshError::Connectivity(format!(
                "{} faces but {} owners",
                faces.len(),
                owner.len()
            )));
        }
        if neighbour.len() > faces.len() {
            return Err(MeshError::Connectivity(format!(
                "{} neighbours exceed {} faces",
                neighbour.len(),
                faces.len()
            )));
        }
        for (facei, f) in faces.iter().enumerate() {
            if f.len() < 3 {
                return Err(MeshError::Connectivity(format!(
                    "face {} has {} points",
                    facei,
                    f.len()
                )));
            }
            if let Some(&p) = f.iter().find(|&&p| p >= points.len()) {
                return Err(MeshError::Connectivity(format!(
                    "face {} references point {} of {}",
                    facei,
                    p,
                    points.len()
                )));
            }
        }

        let n_cells = owner
            .iter()
            .chain(neighbour.iter())
            .max()
            .map_or(0, |&c| c + 1);
        let mut cells = vec![Vec::new(); n_cells];
        for (facei, &c) in owner.iter().enumerate() {
            cells[c].push(facei);
        }
        for (facei, &c) in neighbour.iter().enumerate() {
            if c == owner[facei] {
                return Err(MeshError::Connectivity(format!(
                    "internal face {} has owner equal to neighbour",
                    facei
                )));
            }
            cells[c].push(facei);
        }
        for cell in &mut cells {
            cell.sort_unstable();
        }

        let mut mesh = Self {
            points,
            old_points: None,
            faces,
            owner,
            neighbour,
            patches,
            rank: 0,
            cells,
            face_centres: Vec::new(),
            face_areas: Vec::new(),
            cell_centres: Vec::new(),
            old_cell_centres: None,
            cell_volumes: Vec::new(),
            tet_base_pts: Vec::new(),
            shadow_faces: Vec::new(),
            step_fraction_span: (0.0, 1.0),
        };

        mesh.check_patch_table()?;
        mesh.update_geometry()?;
        mesh.check_couplings()?;
        mesh.compute_tet_base_pts();
        mesh.compute_ami_candidates();

        tracing::debug!(
            "Mesh built: {} points, {} faces ({} internal), {} cells, {} patches",
            mesh.n_points(),
            mesh.n_faces(),
            mesh.n_internal_faces(),
            mesh.n_cells(),
            mesh.patches.len()
        );

        Ok(mesh)
    }

    /// Assign the rank that owns this mesh partition.
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    // -----------------------------------------------------------------------
    // Connectivity
    // -----------------------------------------------------------------------

    /// Rank owning this partition.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of points.
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Number of faces.
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// Number of internal faces.
    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    /// Number of cells.
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Current point positions.
    pub fn points(&self) -> &[Vector] {
        &self.points
    }

    /// Point positions at the start of the motion step. Equal to
    /// [`points`](Self::points) for a static mesh.
    pub fn old_points(&self) -> &[Vector] {
        self.old_points.as_deref().unwrap_or(&self.points)
    }

    /// Face point lists.
    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    /// Owner cell of every face.
    pub fn face_owner(&self) -> &[usize] {
        &self.owner
    }

    /// Neighbour cell of every internal face.
    pub fn face_neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    /// Faces of every cell, sorted.
    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    /// Boundary patches.
    pub fn boundary(&self) -> &[Patch] {
        &self.patches
    }

    /// Whether a face is internal.
    pub fn is_internal_face(&self, face: usize) -> bool {
        face < self.neighbour.len()
    }

    /// Patch containing a boundary face; `None` for internal faces.
    pub fn which_patch(&self, face: usize) -> Option<usize> {
        if self.is_internal_face(face) {
            return None;
        }
        self.patches.iter().position(|p| p.contains(face))
    }

    /// Tet base point of a face, as an index into the face's point list.
    pub fn tet_base_pt(&self, face: usize) -> usize {
        self.tet_base_pts[face]
    }

    /// Replace the coupled fraction of an ACMI patch.
    pub fn set_acmi_mask(&mut self, patch: usize, mask: Vec<f64>) -> Result<(), MeshError> {
        let p = self
            .patches
            .get_mut(patch)
            .ok_or_else(|| MeshError::PatchTable(format!("no patch {}", patch)))?;
        match &mut p.kind {
            PatchKind::CyclicAcmi(acmi) if mask.len() == p.size => {
                acmi.mask = mask;
                Ok(())
            }
            PatchKind::CyclicAcmi(_) => Err(MeshError::InvalidCoupling {
                patch: p.name.clone(),
                reason: format!("mask has {} entries for {} faces", mask.len(), p.size),
            }),
            _ => Err(MeshError::InvalidCoupling {
                patch: p.name.clone(),
                reason: "not a cyclicACMI patch".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Geometry
    // -----------------------------------------------------------------------

    /// Face centres.
    pub fn face_centres(&self) -> &[Vector] {
        &self.face_centres
    }

    /// Face area vectors, pointing out of the owner.
    pub fn face_areas(&self) -> &[Vector] {
        &self.face_areas
    }

    /// Current cell centres.
    pub fn cell_centres(&self) -> &[Vector] {
        &self.cell_centres
    }

    /// Cell centres at the start of the motion step.
    pub fn old_cell_centres(&self) -> &[Vector] {
        self.old_cell_centres.as_deref().unwrap_or(&self.cell_centres)
    }

    /// Cell volumes.
    pub fn cell_volumes(&self) -> &[f64] {
        &self.cell_volumes
    }

    /// Characteristic length of a cell: cube root of its volume.
    pub fn cell_length_scale(&self, cell: usize) -> f64 {
        self.cell_volumes[cell].cbrt()
    }

    /// Axis-aligned bounds of all points.
    pub fn bounds(&self) -> (Vector, Vector) {
        let mut lo = Vector::repeat(f64::INFINITY);
        let mut hi = Vector::repeat(f64::NEG_INFINITY);
        for p in &self.points {
            lo = lo.inf(p);
            hi = hi.sup(p);
        }
        (lo, hi)
    }

    /// Whether the mesh moved during the current step.
    pub fn moving(&self) -> bool {
        self.old_points.is_some()
    }

    /// Start and length of the current sub-cycle as fractions of the motion
    /// step. `(0, 1)` when not sub-cycling.
    pub fn step_fraction_span(&self) -> (f64, f64) {
        self.step_fraction_span
    }

    /// Set the sub-cycle span used to interpolate moving geometry.
    pub fn set_step_fraction_span(&mut self, start: f64, span: f64) {
        self.step_fraction_span = (start, span);
    }

    /// Move the points. The current points become the old points and the
    /// mesh reports itself as moving until [`clear_motion`](Self::clear_motion).
    pub fn move_points(&mut self, new_points: Vec<Vector>) -> Result<(), MeshError> {
        if new_points.len() != self.points.len() {
            return Err(MeshError::MotionSize {
                expected: self.points.len(),
                given: new_points.len(),
            });
        }
        let old = std::mem::replace(&mut self.points, new_points);
        let old_centres = std::mem::take(&mut self.cell_centres);
        self.old_points = Some(old);
        self.old_cell_centres = Some(old_centres);
        self.update_geometry()
    }

    /// Forget the previous point positions.
    pub fn clear_motion(&mut self) {
        self.old_points = None;
        self.old_cell_centres = None;
        self.step_fraction_span = (0.0, 1.0);
    }

    /// Whether `x` lies inside (or on the boundary of) a convex cell.
    pub fn point_in_cell(&self, x: &Vector, cell: usize) -> bool {
        let tol = 1e-10 * self.cell_length_scale(cell);
        self.cells[cell].iter().all(|&facei| {
            let mut n = self.face_areas[facei];
            if self.owner[facei] != cell {
                n = -n;
            }
            let mag = n.norm();
            mag < VSMALL || (x - self.face_centres[facei]).dot(&n) / mag <= tol
        })
    }

    /// First cell containing `x`, if any.
    pub fn find_cell(&self, x: &Vector) -> Option<usize> {
        (0..self.n_cells()).find(|&c| self.point_in_cell(x, c))
    }

    /// Nearest cell centre to `x`.
    pub fn find_nearest_cell(&self, x: &Vector) -> Option<usize> {
        self.cell_centres
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - x).norm_squared().total_cmp(&(b.1 - x).norm_squared()))
            .map(|(c, _)| c)
    }

    /// Face of an AMI patch on its twin patch that the ray from `x` along
    /// `direction` lands on, with the landing point on the twin side.
    ///
    /// # Arguments
    /// * `patch` - Sending AMI or ACMI patch
    /// * `face` - Patch-local sending face
    /// * `x` - Position on the sending face
    /// * `direction` - Direction of travel
    pub fn ami_point_face(
        &self,
        patch: usize,
        face: usize,
        x: &Vector,
        direction: &Vector,
    ) -> Option<(usize, Vector)> {
        let ami = self.patches.get(patch)?.kind.ami()?;
        let nbr = self.patches.get(ami.neighbour_patch)?;
        let xt = ami.transform.transform_position(x, face);
        let dt = ami.transform.transform_direction(direction, face);

        let candidates = ami.candidates.get(face)?;
        candidates.iter().find_map(|&j| {
            let facei = nbr.start + j;
            let n = self.face_areas[facei];
            let fc = self.face_centres[facei];
            let dn = dt.dot(&n);
            let hit = if dn.abs() > VSMALL {
                xt + dt * ((fc - xt).dot(&n) / dn)
            } else {
                xt
            };
            self.point_in_face(&hit, facei).then_some((j, hit))
        })
    }

    /// Whether a point lies on the polygon of a face, within a small
    /// tolerance relative to the face size.
    pub fn point_in_face(&self, x: &Vector, face: usize) -> bool {
        let f = &self.faces[face];
        let fc = self.face_centres[face];
        let area = self.face_areas[face];
        let mag = area.norm();
        if mag < VSMALL {
            return false;
        }
        let n = area / mag;
        let length = mag.sqrt();
        if (x - fc).dot(&n).abs() > 1e-6 * length {
            return false;
        }
        let tol = 1e-8;
        (0..f.len()).any(|i| {
            let a = self.points[f[i]];
            let b = self.points[f[(i + 1) % f.len()]];
            let total = (a - fc).cross(&(b - fc)).dot(&n);
            if total.abs() < VSMALL {
                return false;
            }
            let w0 = (a - x).cross(&(b - x)).dot(&n) / total;
            let w1 = (b - x).cross(&(fc - x)).dot(&n) / total;
            let w2 = (fc - x).cross(&(a - x)).dot(&n) / total;
            w0 >= -tol && w1 >= -tol && w2 >= -tol
        })
    }

    // -----------------------------------------------------------------------
    // Construction helpers
    // -----------------------------------------------------------------------

    fn check_patch_table(&mut self) -> Result<(), MeshError> {
        let mut next = self.neighbour.len();
        for p in &self.patches {
            if p.start != next {
                return Err(MeshError::PatchTable(format!(
                    "patch '{}' starts at face {}, expected {}",
                    p.name, p.start, next
                )));
            }
            next += p.size;
        }
        if next != self.faces.len() {
            return Err(MeshError::PatchTable(format!(
                "patches cover faces up to {}, mesh has {}",
                next,
                self.faces.len()
            )));
        }

        self.shadow_faces = vec![false; self.faces.len()];
        for p in &self.patches {
            if let PatchKind::CyclicAcmi(acmi) = &p.kind {
                let shadow = self.patches.get(acmi.non_overlap_patch).ok_or_else(|| {
                    MeshError::InvalidCoupling {
                        patch: p.name.clone(),
                        reason: format!("no non-overlap patch {}", acmi.non_overlap_patch),
                    }
                })?;
                if shadow.size != p.size || acmi.mask.len() != p.size {
                    return Err(MeshError::InvalidCoupling {
                        patch: p.name.clone(),
                        reason: "non-overlap patch or mask size differs from patch size".into(),
                    });
                }
                for facei in shadow.face_range() {
                    self.shadow_faces[facei] = true;
                }
            }
        }
        Ok(())
    }

    fn update_geometry(&mut self) -> Result<(), MeshError> {
        let (centres, areas) = face_geometry(&self.points, &self.faces);
        self.face_centres = centres;
        self.face_areas = areas;

        let n_cells = self.cells.len();
        let mut cell_centres = vec![Vector::zeros(); n_cells];
        let mut cell_volumes = vec![0.0; n_cells];
        for (celli, cfaces) in self.cells.iter().enumerate() {
            let faces: Vec<usize> = cfaces
                .iter()
                .copied()
                .filter(|&f| !self.shadow_faces[f])
                .collect();
            let estimate = faces
                .iter()
                .map(|&f| self.face_centres[f])
                .sum::<Vector>()
                / faces.len().max(1) as f64;

            let mut centre = Vector::zeros();
            let mut volume = 0.0;
            for &facei in &faces {
                let mut area = self.face_areas[facei];
                if self.owner[facei] != celli {
                    area = -area;
                }
                let pyr3_vol = area.dot(&(self.face_centres[facei] - estimate)).max(VSMALL);
                let pyr_centre = self.face_centres[facei] * 0.75 + estimate * 0.25;
                centre += pyr_centre * pyr3_vol;
                volume += pyr3_vol;
            }
            if volume <= VSMALL * faces.len() as f64 * 10.0 {
                return Err(MeshError::DegenerateCell { cell: celli, volume });
            }
            cell_centres[celli] = centre / volume;
            cell_volumes[celli] = volume / 3.0;
        }
        self.cell_centres = cell_centres;
        self.cell_volumes = cell_volumes;
        Ok(())
    }

    fn check_couplings(&self) -> Result<(), MeshError> {
        for (patchi, p) in self.patches.iter().enumerate() {
            let invalid = |reason: String| MeshError::InvalidCoupling {
                patch: p.name.clone(),
                reason,
            };
            match &p.kind {
                PatchKind::Cyclic(cyc) => {
                    let nbr = self
                        .patches
                        .get(cyc.neighbour_patch)
                        .ok_or_else(|| invalid(format!("no twin patch {}", cyc.neighbour_patch)))?;
                    match &nbr.kind {
                        PatchKind::Cyclic(back) if back.neighbour_patch == patchi => {}
                        _ => return Err(invalid(format!("twin '{}' does not point back", nbr.name))),
                    }
                    if nbr.size != p.size {
                        return Err(invalid(format!(
                            "{} faces, twin '{}' has {}",
                            p.size, nbr.name, nbr.size
                        )));
                    }
                    for i in 0..p.size {
                        let a = p.start + i;
                        let b = nbr.start + i;
                        if self.faces[a].len() != self.faces[b].len() {
                            return Err(invalid(format!("face {} and twin differ in size", i)));
                        }
                        let mapped = cyc.transform.transform_position(&self.face_centres[a], i);
                        let tol = 1e-6 * self.face_areas[a].norm().sqrt();
                        if (mapped - self.face_centres[b]).norm() > tol {
                            return Err(invalid(format!(
                                "face {} does not map onto its twin (distance {:e})",
                                i,
                                (mapped - self.face_centres[b]).norm()
                            )));
                        }
                    }
                }
                PatchKind::CyclicAmi(_) | PatchKind::CyclicAcmi(_) => {
                    let ami = p.kind.ami().ok_or_else(|| invalid("missing AMI data".into()))?;
                    let nbr = self
                        .patches
                        .get(ami.neighbour_patch)
                        .ok_or_else(|| invalid(format!("no twin patch {}", ami.neighbour_patch)))?;
                    match nbr.kind.ami() {
                        Some(back) if back.neighbour_patch == patchi => {}
                        _ => return Err(invalid(format!("twin '{}' does not point back", nbr.name))),
                    }
                }
                PatchKind::Processor(proc) => {
                    if proc.neighbour_rank == proc.my_rank {
                        return Err(invalid("processor patch couples a rank to itself".into()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn compute_tet_base_pts(&mut self) {
        let mut base_pts = vec![0; self.faces.len()];
        for (facei, base) in base_pts.iter_mut().enumerate() {
            let coupled = self
                .which_patch(facei)
                .is_some_and(|p| self.patches[p].is_coupled() || self.shadow_faces[facei]);
            if !coupled {
                *base = self.find_base_pt(facei);
            }
        }
        self.tet_base_pts = base_pts;
    }

    /// First face point from which every tet on both sides has positive volume,
    /// falling back to the point with the best worst tet.
    fn find_base_pt(&self, facei: usize) -> usize {
        let f = &self.faces[facei];
        let n = f.len();
        let mut centres = vec![self.cell_centres[self.owner[facei]]];
        if let Some(&nbr) = self.neighbour.get(facei) {
            centres.push(self.cell_centres[nbr]);
        }
        let tol = 1e-10 * self.face_areas[facei].norm().powf(1.5);

        let mut best = (0, f64::NEG_INFINITY);
        for b in 0..n {
            let mut worst = f64::INFINITY;
            for t in 1..n - 1 {
                let base = self.points[f[b]];
                let v1 = self.points[f[(b + t) % n]];
                let v2 = self.points[f[(b + t + 1) % n]];
                for (side, c) in centres.iter().enumerate() {
                    let vol = if side == 0 {
                        (base - c).dot(&(v1 - c).cross(&(v2 - c)))
                    } else {
                        (base - c).dot(&(v2 - c).cross(&(v1 - c)))
                    };
                    worst = worst.min(vol);
                }
            }
            if worst > tol {
                return b;
            }
            if worst > best.1 {
                best = (b, worst);
            }
        }
        best.0
    }

    fn compute_ami_candidates(&mut self) {
        let mut updates = Vec::new();
        for (patchi, p) in self.patches.iter().enumerate() {
            let Some(ami) = p.kind.ami() else { continue };
            let Some(nbr) = self.patches.get(ami.neighbour_patch) else { continue };

            let nbr_bounds: Vec<(Vector, Vector)> = nbr
                .face_range()
                .map(|f| self.face_bounds(f, |x| *x))
                .collect();
            let candidates: Vec<Vec<usize>> = (0..p.size)
                .map(|i| {
                    let (lo, hi) = self.face_bounds(p.start + i, |x| {
                        ami.transform.transform_position(x, i)
                    });
                    nbr_bounds
                        .iter()
                        .enumerate()
                        .filter(|(_, (nlo, nhi))| {
                            (0..3).all(|d| lo[d] <= nhi[d] && nlo[d] <= hi[d])
                        })
                        .map(|(j, _)| j)
                        .collect()
                })
                .collect();
            updates.push((patchi, candidates));
        }
        for (patchi, candidates) in updates {
            match &mut self.patches[patchi].kind {
                PatchKind::CyclicAmi(ami) => ami.candidates = candidates,
                PatchKind::CyclicAcmi(acmi) => acmi.ami.candidates = candidates,
                _ => {}
            }
        }
    }

    fn face_bounds(&self, facei: usize, map: impl Fn(&Vector) -> Vector) -> (Vector, Vector) {
        let mut lo = Vector::repeat(f64::INFINITY);
        let mut hi = Vector::repeat(f64::NEG_INFINITY);
        for &p in &self.faces[facei] {
            let x = map(&self.points[p]);
            lo = lo.inf(&x);
            hi = hi.sup(&x);
        }
        let pad = 1e-6 * (hi - lo).norm().max(VSMALL);
        (lo - Vector::repeat(pad), hi + Vector::repeat(pad))
    }
}

/// Area-weighted face centres and area vectors from a triangle fan about the
/// point average.
fn face_geometry(points: &[Vector], faces: &[Vec<usize>]) -> (Vec<Vector>, Vec<Vector>) {
    let mut centres = Vec::with_capacity(faces.len());
    let mut areas = Vec::with_capacity(faces.len());
    for f in faces {
        let n = f.len();
        if n == 3 {
            let (a, b, c) = (points[f[0]], points[f[1]], points[f[2]]);
            centres.push((a + b + c) / 3.0);
            areas.push((b - a).cross(&(c - a)) * 0.5);
            continue;
        }
        let estimate = f.iter().map(|&p| points[p]).sum::<Vector>() / n as f64;
        let mut sum_n = Vector::zeros();
        let mut sum_a = 0.0;
        let mut sum_ac = Vector::zeros();
        for i in 0..n {
            let p = points[f[i]];
            let next = points[f[(i + 1) % n]];
            let c = p + next + estimate;
            let tri_n = (next - p).cross(&(estimate - p));
            let a = tri_n.norm();
            sum_n += tri_n;
            sum_a += a;
            sum_ac += c * a;
        }
        if sum_a < VSMALL {
            centres.push(estimate);
        } else {
            centres.push(sum_ac / (3.0 * sum_a));
        }
        areas.push(sum_n * 0.5);
    }
    (centres, areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_cube() -> PolyMesh {
        BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [1, 1, 1])
            .build()
            .expect("cube")
    }

    #[test]
    fn test_cube_geometry() {
        let mesh = unit_cube();
        assert_eq!(mesh.n_cells(), 1);
        assert_eq!(mesh.n_faces(), 6);
        assert_eq!(mesh.n_internal_faces(), 0);
        assert_relative_eq!(mesh.cell_volumes()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            mesh.cell_centres()[0],
            Vector::new(0.5, 0.5, 0.5),
            epsilon = 1e-12
        );
        for (facei, area) in mesh.face_areas().iter().enumerate() {
            let outward = mesh.face_centres()[facei] - mesh.cell_centres()[0];
            assert!(area.dot(&outward) > 0.0, "face {} normal points inward", facei);
            assert_relative_eq!(area.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_find_cell() {
        let mesh = BoxMesh::new(Vector::zeros(), Vector::new(2.0, 1.0, 1.0), [2, 1, 1])
            .build()
            .expect("mesh");
        assert_eq!(mesh.find_cell(&Vector::new(0.5, 0.5, 0.5)), Some(0));
        assert_eq!(mesh.find_cell(&Vector::new(1.5, 0.5, 0.5)), Some(1));
        assert_eq!(mesh.find_cell(&Vector::new(2.5, 0.5, 0.5)), None);
        assert_eq!(mesh.find_nearest_cell(&Vector::new(2.5, 0.5, 0.5)), Some(1));
    }

    #[test]
    fn test_which_patch() {
        let mesh = BoxMesh::new(Vector::zeros(), Vector::new(2.0, 1.0, 1.0), [2, 1, 1])
            .build()
            .expect("mesh");
        assert_eq!(mesh.which_patch(0), None);
        for facei in 1..mesh.n_faces() {
            let patchi = mesh.which_patch(facei).expect("boundary face");
            assert!(mesh.boundary()[patchi].contains(facei));
        }
    }

    #[test]
    fn test_rejects_bad_patch_table() {
        let mesh = unit_cube();
        let mut patches = mesh.boundary().to_vec();
        patches[1].start += 1;
        let result = PolyMesh::new(
            mesh.points().to_vec(),
            mesh.faces().to_vec(),
            mesh.face_owner().to_vec(),
            mesh.face_neighbour().to_vec(),
            patches,
        );
        assert!(matches!(result, Err(MeshError::PatchTable(_))));
    }

    #[test]
    fn test_move_points_keeps_old_geometry() {
        let mut mesh = unit_cube();
        let shifted: Vec<Vector> = mesh
            .points()
            .iter()
            .map(|p| p + Vector::new(0.25, 0.0, 0.0))
            .collect();
        mesh.move_points(shifted).expect("motion");
        assert!(mesh.moving());
        assert_relative_eq!(
            mesh.old_cell_centres()[0],
            Vector::new(0.5, 0.5, 0.5),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            mesh.cell_centres()[0],
            Vector::new(0.75, 0.5, 0.5),
            epsilon = 1e-12
        );
        mesh.clear_motion();
        assert!(!mesh.moving());
    }

    #[test]
    fn test_move_points_size_mismatch() {
        let mut mesh = unit_cube();
        let err = mesh.move_points(vec![Vector::zeros()]).unwrap_err();
        assert!(matches!(err, MeshError::MotionSize { expected: 8, given: 1 }));
    }

    #[test]
    fn test_point_in_face() {
        let mesh = unit_cube();
        let facei = 0;
        let fc = mesh.face_centres()[facei];
        assert!(mesh.point_in_face(&fc, facei));
        let far = fc + Vector::new(0.0, 5.0, 5.0);
        assert!(!mesh.point_in_face(&far, facei));
    }
}
