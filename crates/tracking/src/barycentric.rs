//! Barycentric coordinates and the affine tensors that map them to and from
//! Cartesian space.
//!
//! A tet is stored as its four vertices `(centre, base, vertex1, vertex2)`.
//! The forward map is `x = a*centre + b*base + c*vertex1 + d*vertex2`. The
//! reverse map is expressed unnormalised, as rows `T` with
//! `det_a * y = det_a * e0 + (x - centre) . T`, so that tracking can work with
//! signed volumes and never divide by a vanishing determinant.

use std::ops::{Add, Index, IndexMut, Mul, Sub};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Cartesian vector type used throughout the crate.
pub type Vector = Vector3<f64>;

/// Four barycentric weights `(a, b, c, d)` relative to `(centre, base,
/// vertex1, vertex2)` of a tet. A valid position sums to one.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Barycentric(pub [f64; 4]);

impl Barycentric {
    /// Coordinates of the tet's first vertex (the cell centre).
    pub const CENTRE: Barycentric = Barycentric([1.0, 0.0, 0.0, 0.0]);

    /// Create from four weights.
    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self([a, b, c, d])
    }

    /// Weight of the cell centre.
    pub fn a(&self) -> f64 {
        self.0[0]
    }

    /// Weight of the face base point.
    pub fn b(&self) -> f64 {
        self.0[1]
    }

    /// Weight of the first triangle vertex.
    pub fn c(&self) -> f64 {
        self.0[2]
    }

    /// Weight of the second triangle vertex.
    pub fn d(&self) -> f64 {
        self.0[3]
    }

    /// Sum of the four weights.
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Smallest weight. Negative when the point lies outside the tet.
    pub fn min(&self) -> f64 {
        self.0.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Rescale so the weights sum to one.
    pub fn normalise(&mut self) {
        let s = self.sum();
        for y in &mut self.0 {
            *y /= s;
        }
    }

    /// Zero any negative weights and renormalise. Only meant for round-off,
    /// a point well outside the tet is moved onto its nearest face or edge.
    pub fn clip_negative(&mut self) {
        if self.min() >= 0.0 {
            return;
        }
        for y in &mut self.0 {
            *y = y.max(0.0);
        }
        self.normalise();
    }

    /// Component-wise product.
    pub fn cmpt_mul(&self, other: &Barycentric) -> Barycentric {
        let mut out = *self;
        for (y, o) in out.0.iter_mut().zip(other.0) {
            *y *= o;
        }
        out
    }
}

impl Index<usize> for Barycentric {
    type Output = f64;
    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl IndexMut<usize> for Barycentric {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.0[i]
    }
}

impl Add for Barycentric {
    type Output = Barycentric;
    fn add(self, rhs: Barycentric) -> Barycentric {
        let mut out = self;
        for (y, r) in out.0.iter_mut().zip(rhs.0) {
            *y += r;
        }
        out
    }
}

impl Sub for Barycentric {
    type Output = Barycentric;
    fn sub(self, rhs: Barycentric) -> Barycentric {
        let mut out = self;
        for (y, r) in out.0.iter_mut().zip(rhs.0) {
            *y -= r;
        }
        out
    }
}

impl Mul<f64> for Barycentric {
    type Output = Barycentric;
    fn mul(self, s: f64) -> Barycentric {
        Barycentric(self.0.map(|y| y * s))
    }
}

// ---------------------------------------------------------------------------
// Forward tensor
// ---------------------------------------------------------------------------

/// Forward barycentric-to-Cartesian map, one vertex per barycentric weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarycentricTensor {
    /// Vertex weighted by `a` (cell centre).
    pub a: Vector,
    /// Vertex weighted by `b` (face base point).
    pub b: Vector,
    /// Vertex weighted by `c`.
    pub c: Vector,
    /// Vertex weighted by `d`.
    pub d: Vector,
}

impl BarycentricTensor {
    /// Build from the four tet vertices.
    pub fn new(a: Vector, b: Vector, c: Vector, d: Vector) -> Self {
        Self { a, b, c, d }
    }

    /// A tensor with all vertices at the origin.
    pub fn zero() -> Self {
        Self::new(Vector::zeros(), Vector::zeros(), Vector::zeros(), Vector::zeros())
    }

    /// Cartesian position of the barycentric point `y`.
    pub fn apply(&self, y: &Barycentric) -> Vector {
        self.a * y.a() + self.b * y.b() + self.c * y.c() + self.d * y.d()
    }
}

impl Add for BarycentricTensor {
    type Output = BarycentricTensor;
    fn add(self, rhs: BarycentricTensor) -> BarycentricTensor {
        BarycentricTensor::new(self.a + rhs.a, self.b + rhs.b, self.c + rhs.c, self.d + rhs.d)
    }
}

impl Mul<f64> for BarycentricTensor {
    type Output = BarycentricTensor;
    fn mul(self, s: f64) -> BarycentricTensor {
        BarycentricTensor::new(self.a * s, self.b * s, self.c * s, self.d * s)
    }
}

// ---------------------------------------------------------------------------
// Reverse tensor
// ---------------------------------------------------------------------------

/// Rows of the unnormalised Cartesian-to-barycentric map. Applying it to a
/// displacement `dx` gives `det_a * dy`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverseTensor(pub [Vector; 4]);

impl ReverseTensor {
    /// A tensor whose rows are all zero.
    pub fn zero() -> Self {
        Self([Vector::zeros(); 4])
    }

    /// `x . T`: one dot product per row.
    pub fn apply(&self, x: &Vector) -> Barycentric {
        Barycentric(self.0.map(|row| x.dot(&row)))
    }
}

impl Add for ReverseTensor {
    type Output = ReverseTensor;
    fn add(self, rhs: ReverseTensor) -> ReverseTensor {
        let mut rows = self.0;
        for (r, o) in rows.iter_mut().zip(rhs.0) {
            *r += o;
        }
        ReverseTensor(rows)
    }
}

impl Mul<f64> for ReverseTensor {
    type Output = ReverseTensor;
    fn mul(self, s: f64) -> ReverseTensor {
        ReverseTensor(self.0.map(|row| row * s))
    }
}

/// Linear interpolation written so both endpoints are reproduced exactly.
pub fn lerp(from: &Vector, to: &Vector, t: f64) -> Vector {
    from * (1.0 - t) + to * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_apply_returns_vertices() {
        let t = BarycentricTensor::new(
            Vector::new(0.0, 0.0, 0.0),
            Vector::new(1.0, 0.0, 0.0),
            Vector::new(0.0, 1.0, 0.0),
            Vector::new(0.0, 0.0, 1.0),
        );
        assert_eq!(t.apply(&Barycentric::CENTRE), t.a);
        assert_eq!(t.apply(&Barycentric::new(0.0, 0.0, 0.0, 1.0)), t.d);
        let mid = t.apply(&Barycentric::new(0.25, 0.25, 0.25, 0.25));
        assert_relative_eq!(mid, Vector::new(0.25, 0.25, 0.25), epsilon = 1e-15);
    }

    #[test]
    fn test_normalise() {
        let mut y = Barycentric::new(2.0, 1.0, 1.0, 0.0);
        y.normalise();
        assert_relative_eq!(y.sum(), 1.0, epsilon = 1e-15);
        assert_relative_eq!(y.a(), 0.5, epsilon = 1e-15);
    }

    #[test]
    fn test_clip_negative_round_off() {
        let mut y = Barycentric::new(0.6, 0.3, -8.7e-17, 0.1);
        y.clip_negative();
        assert_eq!(y.c(), 0.0);
        assert!(y.min() >= 0.0);
        assert_relative_eq!(y.sum(), 1.0, epsilon = 1e-15);

        let mut inside = Barycentric::new(0.4, 0.3, 0.2, 0.1);
        inside.clip_negative();
        assert_eq!(inside, Barycentric::new(0.4, 0.3, 0.2, 0.1));
    }

    #[test]
    fn test_lerp_endpoints_exact() {
        let a = Vector::new(0.1, 0.7, 1.0 / 3.0);
        let b = Vector::new(-2.3, 5.0e-7, 11.0);
        assert_eq!(lerp(&a, &b, 0.0), a);
        assert_eq!(lerp(&a, &b, 1.0), b);
    }

    #[test]
    fn test_reverse_tensor_rows() {
        let t = ReverseTensor([
            Vector::new(1.0, 0.0, 0.0),
            Vector::new(0.0, 1.0, 0.0),
            Vector::new(0.0, 0.0, 1.0),
            Vector::new(1.0, 1.0, 1.0),
        ]);
        let y = t.apply(&Vector::new(1.0, 2.0, 3.0));
        assert_eq!(y, Barycentric::new(1.0, 2.0, 3.0, 6.0));
    }
}
