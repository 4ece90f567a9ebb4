//! Tet decomposition of cells and the barycentric transforms of a single tet.
//!
//! Every (cell, face) pair is split into a fan of tets sharing the cell centre
//! and the face's base point. Tet `tet_pt` (in `1..n - 1` for an `n`-point face)
//! uses the face triangle `(base, base + tet_pt, base + tet_pt + 1)`, with the
//! last two vertices swapped when seen from the neighbour cell, so that every
//! tet has positive volume from the cell it belongs to.
//!
//! On a moving mesh the tet vertices are interpolated between the old and new
//! geometry. Interpolation uses `(1 - f) * old + f * new`, which reproduces
//! the literal old geometry at `f = 0` and the new geometry at `f = 1`.

use crate::barycentric::{lerp, BarycentricTensor, ReverseTensor, Vector};
use crate::mesh::PolyMesh;

/// Identifies one tet of the decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TetIndices {
    /// Cell containing the tet.
    pub cell: usize,
    /// Face providing the tet's base triangle.
    pub face: usize,
    /// Triangle index within the face, in `1..n - 1`.
    pub tet_pt: usize,
}

impl TetIndices {
    /// Create from indices.
    pub fn new(cell: usize, face: usize, tet_pt: usize) -> Self {
        Self { cell, face, tet_pt }
    }

    /// Mesh point indices of the face triangle `(base, vertex1, vertex2)`.
    pub fn face_tri_is(&self, mesh: &PolyMesh) -> [usize; 3] {
        let f = &mesh.faces()[self.face];
        let n = f.len();
        let base = mesh.tet_base_pt(self.face);
        let mut pt = (base + self.tet_pt) % n;
        let mut other = (pt + 1) % n;
        if mesh.face_owner()[self.face] != self.cell {
            std::mem::swap(&mut pt, &mut other);
        }
        [f[base], f[pt], f[other]]
    }

    /// Current vertices `(centre, base, vertex1, vertex2)`.
    pub fn vertices(&self, mesh: &PolyMesh) -> [Vector; 4] {
        let tri = self.face_tri_is(mesh);
        let p = mesh.points();
        [mesh.cell_centres()[self.cell], p[tri[0]], p[tri[1]], p[tri[2]]]
    }

    /// Vertices at the start of the motion step.
    pub fn old_vertices(&self, mesh: &PolyMesh) -> [Vector; 4] {
        let tri = self.face_tri_is(mesh);
        let p = mesh.old_points();
        [mesh.old_cell_centres()[self.cell], p[tri[0]], p[tri[1]], p[tri[2]]]
    }

    /// Forward transform of the current geometry.
    pub fn stationary_transform(&self, mesh: &PolyMesh) -> BarycentricTensor {
        let [c, b, v1, v2] = self.vertices(mesh);
        BarycentricTensor::new(c, b, v1, v2)
    }

    /// Reverse transform of the current geometry.
    pub fn stationary_reverse_transform(&self, mesh: &PolyMesh) -> StationaryReverse {
        StationaryReverse::from_vertices(&self.vertices(mesh))
    }

    /// Forward transform over the sub-track starting at motion fraction
    /// `start` and spanning `span` of the motion step.
    pub fn moving_transform(&self, mesh: &PolyMesh, start: f64, span: f64) -> MovingTetTransform {
        MovingTetTransform {
            old: self.old_vertices(mesh),
            new: self.vertices(mesh),
            start,
            span,
        }
    }

    /// Reverse transform over a sub-track, as polynomials in the sub-track
    /// fraction.
    pub fn moving_reverse_transform(
        &self,
        mesh: &PolyMesh,
        start: f64,
        span: f64,
    ) -> MovingReverse {
        self.moving_transform(mesh, start, span).reverse()
    }
}

// ---------------------------------------------------------------------------
// Stationary reverse transform
// ---------------------------------------------------------------------------

/// `det_a * y = det_a * e0 + (x - centre) . t`, with `det_a` six times the
/// signed tet volume.
#[derive(Debug, Clone, Copy)]
pub struct StationaryReverse {
    /// Cell-centre vertex.
    pub centre: Vector,
    /// Six times the signed volume.
    pub det_a: f64,
    /// Unnormalised reverse rows.
    pub t: ReverseTensor,
}

impl StationaryReverse {
    /// Build from `(centre, base, vertex1, vertex2)`.
    pub fn from_vertices(v: &[Vector; 4]) -> Self {
        let [centre, base, v1, v2] = *v;
        let ab = base - centre;
        let ac = v1 - centre;
        let ad = v2 - centre;
        let bc = v1 - base;
        let bd = v2 - base;
        Self {
            centre,
            det_a: ab.dot(&ac.cross(&ad)),
            t: ReverseTensor([bd.cross(&bc), ac.cross(&ad), ad.cross(&ab), ab.cross(&ac)]),
        }
    }

    /// Barycentric coordinates of `x`. Undefined for a degenerate tet.
    pub fn coordinates(&self, x: &Vector) -> crate::Barycentric {
        let mut y = self.t.apply(&(x - self.centre)) * (1.0 / self.det_a);
        y[0] += 1.0;
        y
    }
}

// ---------------------------------------------------------------------------
// Moving transforms
// ---------------------------------------------------------------------------

/// Forward transform of a tet whose vertices move linearly over a sub-track.
///
/// Motion fraction `start + lambda * span` is evaluated for sub-track fraction
/// `lambda`.
#[derive(Debug, Clone, Copy)]
pub struct MovingTetTransform {
    old: [Vector; 4],
    new: [Vector; 4],
    start: f64,
    span: f64,
}

impl MovingTetTransform {
    /// Transform at the start of the sub-track.
    pub fn constant(&self) -> BarycentricTensor {
        self.at(0.0)
    }

    /// Change of the transform per unit sub-track fraction.
    pub fn linear(&self) -> BarycentricTensor {
        let d: [Vector; 4] = std::array::from_fn(|i| (self.new[i] - self.old[i]) * self.span);
        BarycentricTensor::new(d[0], d[1], d[2], d[3])
    }

    /// Transform at sub-track fraction `lambda`, exact at the motion
    /// endpoints.
    pub fn at(&self, lambda: f64) -> BarycentricTensor {
        let f = self.start + lambda * self.span;
        let v: [Vector; 4] = std::array::from_fn(|i| lerp(&self.old[i], &self.new[i], f));
        BarycentricTensor::new(v[0], v[1], v[2], v[3])
    }

    /// Constant and linear vertex terms `(x0, x1)` with `x = x0 + lambda * x1`.
    fn vertex_pairs(&self) -> [(Vector, Vector); 4] {
        let c = self.constant();
        let l = self.linear();
        [(c.a, l.a), (c.b, l.b), (c.c, l.c), (c.d, l.d)]
    }

    /// Reverse transform as polynomials in the sub-track fraction.
    pub fn reverse(&self) -> MovingReverse {
        let [centre, base, v1, v2] = self.vertex_pairs();
        let sub = |a: (Vector, Vector), b: (Vector, Vector)| (a.0 - b.0, a.1 - b.1);
        let ab = sub(base, centre);
        let ac = sub(v1, centre);
        let ad = sub(v2, centre);
        let bc = sub(v1, base);
        let bd = sub(v2, base);

        let det_a = [
            ab.0.dot(&ac.0.cross(&ad.0)),
            ab.1.dot(&ac.0.cross(&ad.0))
                + ab.0.dot(&ac.1.cross(&ad.0))
                + ab.0.dot(&ac.0.cross(&ad.1)),
            ab.0.dot(&ac.1.cross(&ad.1))
                + ab.1.dot(&ac.0.cross(&ad.1))
                + ab.1.dot(&ac.1.cross(&ad.0)),
            ab.1.dot(&ac.1.cross(&ad.1)),
        ];

        let t0 = ReverseTensor([
            bd.0.cross(&bc.0),
            ac.0.cross(&ad.0),
            ad.0.cross(&ab.0),
            ab.0.cross(&ac.0),
        ]);
        let t1 = ReverseTensor([
            bd.1.cross(&bc.0) + bd.0.cross(&bc.1),
            ac.1.cross(&ad.0) + ac.0.cross(&ad.1),
            ad.1.cross(&ab.0) + ad.0.cross(&ab.1),
            ab.1.cross(&ac.0) + ab.0.cross(&ac.1),
        ]);
        let t2 = ReverseTensor([
            bd.1.cross(&bc.1),
            ac.1.cross(&ad.1),
            ad.1.cross(&ab.1),
            ab.1.cross(&ac.1),
        ]);

        MovingReverse {
            centre: [centre.0, centre.1],
            det_a,
            t: [t0, t1, t2],
        }
    }
}

/// Reverse transform of a moving tet: cubic determinant and quadratic rows in
/// the sub-track fraction.
#[derive(Debug, Clone, Copy)]
pub struct MovingReverse {
    /// Constant and linear centre terms.
    pub centre: [Vector; 2],
    /// Determinant coefficients, constant term first.
    pub det_a: [f64; 4],
    /// Row coefficients, constant term first.
    pub t: [ReverseTensor; 3],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BoxMesh;
    use crate::Barycentric;
    use approx::assert_relative_eq;

    fn cube() -> PolyMesh {
        BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [1, 1, 1])
            .build()
            .expect("cube")
    }

    #[test]
    fn test_all_tets_positive() {
        let mesh = cube();
        for &facei in &mesh.cells()[0] {
            let n = mesh.faces()[facei].len();
            for tet_pt in 1..n - 1 {
                let rev = TetIndices::new(0, facei, tet_pt).stationary_reverse_transform(&mesh);
                assert!(rev.det_a > 0.0, "face {} tet {} inverted", facei, tet_pt);
            }
        }
    }

    #[test]
    fn test_reverse_inverts_forward() {
        let mesh = cube();
        let tet = TetIndices::new(0, 2, 1);
        let fwd = tet.stationary_transform(&mesh);
        let rev = tet.stationary_reverse_transform(&mesh);
        let y = Barycentric::new(0.1, 0.2, 0.3, 0.4);
        let back = rev.coordinates(&fwd.apply(&y));
        for i in 0..4 {
            assert_relative_eq!(back[i], y[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_neighbour_view_swaps_vertices() {
        let mesh = BoxMesh::new(Vector::zeros(), Vector::new(2.0, 1.0, 1.0), [2, 1, 1])
            .build()
            .expect("mesh");
        let own = TetIndices::new(0, 0, 1).face_tri_is(&mesh);
        let nbr = TetIndices::new(1, 0, 1).face_tri_is(&mesh);
        assert_eq!(own[0], nbr[0]);
        assert_eq!(own[1], nbr[2]);
        assert_eq!(own[2], nbr[1]);
        let rev = TetIndices::new(1, 0, 1).stationary_reverse_transform(&mesh);
        assert!(rev.det_a > 0.0);
    }

    #[test]
    fn test_moving_transform_endpoints_exact() {
        let mut mesh = cube();
        let moved: Vec<Vector> = mesh
            .points()
            .iter()
            .map(|p| Vector::new(p.x * 1.3 + 0.1, p.y, p.z - 0.07))
            .collect();
        let before = TetIndices::new(0, 3, 2).stationary_transform(&mesh);
        mesh.move_points(moved).expect("motion");
        let after = TetIndices::new(0, 3, 2).stationary_transform(&mesh);

        let tet = TetIndices::new(0, 3, 2);
        assert_eq!(tet.moving_transform(&mesh, 0.0, 1.0).constant(), before);
        assert_eq!(tet.moving_transform(&mesh, 0.0, 1.0).at(1.0), after);
    }

    #[test]
    fn test_moving_reverse_matches_stationary_at_start() {
        let mut mesh = cube();
        let moved: Vec<Vector> = mesh.points().iter().map(|p| p * 1.5).collect();
        mesh.move_points(moved).expect("motion");
        let tet = TetIndices::new(0, 1, 1);
        let moving = tet.moving_reverse_transform(&mesh, 0.0, 0.0);
        let fixed = StationaryReverse::from_vertices(&tet.old_vertices(&mesh));
        assert_relative_eq!(moving.det_a[0], fixed.det_a, epsilon = 1e-14);
        assert_eq!(moving.det_a[1], 0.0);
        assert_eq!(moving.det_a[3], 0.0);
    }
}
