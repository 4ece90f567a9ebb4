//! Boundary patches.
//!
//! The set of patch kinds is closed: [`PatchKind`] enumerates every topology
//! the tracker knows how to cross, and anything else is carried as
//! [`PatchKind::Generic`] so the dispatcher can drop particles that reach it.

use std::ops::Range;

use nalgebra::Matrix3;

use crate::barycentric::Vector;

/// Default mask tolerance for partially overlapping (ACMI) couplings.
///
/// A face with `mask >= 1 - ACMI_TOLERANCE` is fully coupled; a face with
/// `mask <= ACMI_TOLERANCE` behaves as the non-overlap patch.
pub const ACMI_TOLERANCE: f64 = 1e-10;

/// A contiguous range of boundary faces sharing one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Patch name, unique within the mesh.
    pub name: String,
    /// First mesh face of the patch.
    pub start: usize,
    /// Number of faces.
    pub size: usize,
    /// Patch kind and coupling data.
    pub kind: PatchKind,
}

impl Patch {
    /// Create a patch.
    pub fn new(name: impl Into<String>, start: usize, size: usize, kind: PatchKind) -> Self {
        Self {
            name: name.into(),
            start,
            size,
            kind,
        }
    }

    /// Mesh face indices of the patch.
    pub fn face_range(&self) -> Range<usize> {
        self.start..self.start + self.size
    }

    /// Whether the mesh face belongs to this patch.
    pub fn contains(&self, face: usize) -> bool {
        self.face_range().contains(&face)
    }

    /// Patch-local index of a mesh face of this patch.
    pub fn which_face(&self, face: usize) -> usize {
        face - self.start
    }

    /// Whether particles cross this patch into another part of the domain.
    pub fn is_coupled(&self) -> bool {
        matches!(
            self.kind,
            PatchKind::Cyclic(_)
                | PatchKind::CyclicAmi(_)
                | PatchKind::CyclicAcmi(_)
                | PatchKind::Processor(_)
        )
    }
}

/// Closed set of boundary topologies.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchKind {
    /// Solid wall. Crossing is delegated to the cloud's wall interaction.
    Wall,
    /// Plane of symmetry; vector properties are mirrored.
    Symmetry,
    /// Wedge plane of an axisymmetric case; treated as a mirror.
    Wedge,
    /// Conformal periodic pairing with one twin face per face.
    Cyclic(CyclicCoupling),
    /// Non-conformal periodic or sliding pairing.
    CyclicAmi(AmiCoupling),
    /// Partially overlapping non-conformal pairing with a fallback patch.
    CyclicAcmi(AcmiCoupling),
    /// Boundary with a neighbouring rank.
    Processor(ProcessorCoupling),
    /// Any other patch type, by name. Particles reaching it are removed.
    Generic(String),
}

impl PatchKind {
    /// Type name as it appears in case files and diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            PatchKind::Wall => "wall",
            PatchKind::Symmetry => "symmetry",
            PatchKind::Wedge => "wedge",
            PatchKind::Cyclic(_) => "cyclic",
            PatchKind::CyclicAmi(_) => "cyclicAMI",
            PatchKind::CyclicAcmi(_) => "cyclicACMI",
            PatchKind::Processor(_) => "processor",
            PatchKind::Generic(name) => name,
        }
    }

    /// The AMI coupling of an AMI or ACMI patch.
    pub fn ami(&self) -> Option<&AmiCoupling> {
        match self {
            PatchKind::CyclicAmi(ami) => Some(ami),
            PatchKind::CyclicAcmi(acmi) => Some(&acmi.ami),
            _ => None,
        }
    }
}

/// Conformal cyclic pairing. Face `i` of this patch matches face `i` of the
/// twin, with the point order reversed about point 0.
#[derive(Debug, Clone, PartialEq)]
pub struct CyclicCoupling {
    /// Index of the twin patch.
    pub neighbour_patch: usize,
    /// Maps this side onto the twin side.
    pub transform: CoupledTransform,
}

/// Non-conformal pairing resolved by geometric search.
#[derive(Debug, Clone, PartialEq)]
pub struct AmiCoupling {
    /// Index of the twin patch.
    pub neighbour_patch: usize,
    /// Maps this side onto the twin side, possibly per face.
    pub transform: CoupledTransform,
    /// For every face, the twin faces whose bounds overlap it. Filled in when
    /// the mesh is built.
    pub candidates: Vec<Vec<usize>>,
}

impl AmiCoupling {
    /// New coupling; candidate addressing is computed by the mesh.
    pub fn new(neighbour_patch: usize, transform: CoupledTransform) -> Self {
        Self {
            neighbour_patch,
            transform,
            candidates: Vec::new(),
        }
    }
}

/// AMI pairing covering only a fraction of each face.
#[derive(Debug, Clone, PartialEq)]
pub struct AcmiCoupling {
    /// Coupled part.
    pub ami: AmiCoupling,
    /// Patch that receives particles through the uncoupled part.
    pub non_overlap_patch: usize,
    /// Coupled fraction of each face, in `[0, 1]`.
    pub mask: Vec<f64>,
    /// Threshold below which (or above `1 - tolerance`) a face is treated as
    /// fully uncoupled (coupled).
    pub tolerance: f64,
}

impl AcmiCoupling {
    /// New coupling with a uniform mask and the default tolerance.
    pub fn uniform(ami: AmiCoupling, non_overlap_patch: usize, size: usize, mask: f64) -> Self {
        Self {
            ami,
            non_overlap_patch,
            mask: vec![mask; size],
            tolerance: ACMI_TOLERANCE,
        }
    }
}

/// Boundary with a neighbouring rank. Face `i` matches face `i` of the
/// neighbour's patch `neighbour_patch`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorCoupling {
    /// This rank.
    pub my_rank: usize,
    /// Rank on the other side.
    pub neighbour_rank: usize,
    /// Index of the matching patch on the neighbour rank.
    pub neighbour_patch: usize,
}

// ---------------------------------------------------------------------------
// Coupled transforms
// ---------------------------------------------------------------------------

/// Geometric map from one side of a coupled pair to the other. Per-face data
/// of length one applies to every face.
#[derive(Debug, Clone, PartialEq)]
pub enum CoupledTransform {
    /// The two sides coincide.
    Identity,
    /// `x' = x + s`.
    Translational {
        /// Separation vectors.
        separation: Vec<Vector>,
    },
    /// `x' = R (x - c) + c`.
    Rotational {
        /// Rotation tensors.
        rotation: Vec<Matrix3<f64>>,
        /// Centre of rotation.
        centre: Vector,
    },
}

impl CoupledTransform {
    /// Uniform translation.
    pub fn translation(separation: Vector) -> Self {
        CoupledTransform::Translational {
            separation: vec![separation],
        }
    }

    /// Uniform rotation about `centre`.
    pub fn rotation(rotation: Matrix3<f64>, centre: Vector) -> Self {
        CoupledTransform::Rotational {
            rotation: vec![rotation],
            centre,
        }
    }

    /// Separation for a patch face, if translational.
    pub fn separation(&self, face: usize) -> Option<Vector> {
        match self {
            CoupledTransform::Translational { separation } => pick(separation, face).copied(),
            _ => None,
        }
    }

    /// Rotation for a patch face, if rotational.
    pub fn rotation_tensor(&self, face: usize) -> Option<Matrix3<f64>> {
        match self {
            CoupledTransform::Rotational { rotation, .. } => pick(rotation, face).copied(),
            _ => None,
        }
    }

    /// Map a position across the coupling.
    pub fn transform_position(&self, x: &Vector, face: usize) -> Vector {
        match self {
            CoupledTransform::Identity => *x,
            CoupledTransform::Translational { separation } => {
                x + pick(separation, face).copied().unwrap_or_else(Vector::zeros)
            }
            CoupledTransform::Rotational { rotation, centre } => {
                let r = pick(rotation, face).copied().unwrap_or_else(Matrix3::identity);
                r * (x - centre) + centre
            }
        }
    }

    /// Map a direction across the coupling. Translations leave it unchanged.
    pub fn transform_direction(&self, v: &Vector, face: usize) -> Vector {
        match self.rotation_tensor(face) {
            Some(r) => r * v,
            None => *v,
        }
    }

    /// The map from the other side back to this one.
    pub fn inverse(&self) -> CoupledTransform {
        match self {
            CoupledTransform::Identity => CoupledTransform::Identity,
            CoupledTransform::Translational { separation } => CoupledTransform::Translational {
                separation: separation.iter().map(|s| -s).collect(),
            },
            CoupledTransform::Rotational { rotation, centre } => CoupledTransform::Rotational {
                rotation: rotation.iter().map(|r| r.transpose()).collect(),
                centre: *centre,
            },
        }
    }
}

fn pick<T>(values: &[T], face: usize) -> Option<&T> {
    if values.len() == 1 {
        values.first()
    } else {
        values.get(face)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_translation_inverse_round_trip() {
        let t = CoupledTransform::translation(Vector::new(2.0, 0.0, 0.0));
        let x = Vector::new(0.5, 0.25, 0.125);
        let y = t.transform_position(&x, 3);
        assert_eq!(y, Vector::new(2.5, 0.25, 0.125));
        assert_eq!(t.inverse().transform_position(&y, 3), x);
        assert_eq!(t.transform_direction(&x, 0), x);
    }

    #[test]
    fn test_rotation_about_centre() {
        let quarter = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let t = CoupledTransform::rotation(quarter, Vector::new(1.0, 0.0, 0.0));
        let y = t.transform_position(&Vector::new(2.0, 0.0, 0.0), 0);
        assert_relative_eq!(y, Vector::new(1.0, 1.0, 0.0), epsilon = 1e-15);
        let back = t.inverse().transform_position(&y, 0);
        assert_relative_eq!(back, Vector::new(2.0, 0.0, 0.0), epsilon = 1e-15);
        let v = t.transform_direction(&Vector::new(1.0, 0.0, 0.0), 0);
        assert_relative_eq!(v, Vector::new(0.0, 1.0, 0.0), epsilon = 1e-15);
    }

    #[test]
    fn test_per_face_separation() {
        let t = CoupledTransform::Translational {
            separation: vec![Vector::new(1.0, 0.0, 0.0), Vector::new(0.0, 1.0, 0.0)],
        };
        assert_eq!(t.separation(1), Some(Vector::new(0.0, 1.0, 0.0)));
        assert_eq!(t.separation(2), None);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(PatchKind::Wall.type_name(), "wall");
        assert_eq!(PatchKind::Generic("outlet".into()).type_name(), "outlet");
        let p = Patch::new("walls", 10, 4, PatchKind::Wall);
        assert!(p.contains(13));
        assert!(!p.contains(14));
        assert_eq!(p.which_face(12), 2);
        assert!(!p.is_coupled());
    }
}
