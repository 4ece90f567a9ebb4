//! Cartesian box meshes with one patch per side.
//!
//! Used to set up cases without an external mesher. Opposite sides may be
//! paired as cyclic, cyclic-AMI or cyclic-ACMI couplings; an ACMI side gets an
//! extra wall patch `<side>_nonOverlap` duplicating its faces.

use serde::{Deserialize, Serialize};

use crate::barycentric::Vector;
use crate::error::MeshError;

use super::patch::{AcmiCoupling, AmiCoupling, CoupledTransform, CyclicCoupling, Patch, PatchKind};
use super::PolyMesh;

/// One of the six sides of a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// x = min
    XMin,
    /// x = max
    XMax,
    /// y = min
    YMin,
    /// y = max
    YMax,
    /// z = min
    ZMin,
    /// z = max
    ZMax,
}

impl Side {
    /// All sides in patch order.
    pub const ALL: [Side; 6] = [
        Side::XMin,
        Side::XMax,
        Side::YMin,
        Side::YMax,
        Side::ZMin,
        Side::ZMax,
    ];

    /// Coordinate axis normal to the side.
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    /// Whether the side is at the upper end of its axis.
    pub fn is_max(self) -> bool {
        self.index() % 2 == 1
    }

    /// Position in [`Side::ALL`], which is also the patch index.
    pub fn index(self) -> usize {
        match self {
            Side::XMin => 0,
            Side::XMax => 1,
            Side::YMin => 2,
            Side::YMax => 3,
            Side::ZMin => 4,
            Side::ZMax => 5,
        }
    }

    /// The side across the box.
    pub fn opposite(self) -> Side {
        Side::ALL[self.index() ^ 1]
    }

    /// Patch name.
    pub fn name(self) -> &'static str {
        match self {
            Side::XMin => "xMin",
            Side::XMax => "xMax",
            Side::YMin => "yMin",
            Side::YMax => "yMax",
            Side::ZMin => "zMin",
            Side::ZMax => "zMax",
        }
    }
}

/// Boundary kind of a box side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideKind {
    /// Solid wall.
    Wall,
    /// Symmetry plane.
    Symmetry,
    /// Wedge plane.
    Wedge,
    /// Conformal cyclic pairing with the opposite side.
    Cyclic,
    /// AMI pairing with the opposite side.
    CyclicAmi,
    /// ACMI pairing with the opposite side and a uniform coupled fraction.
    CyclicAcmi {
        /// Coupled fraction of every face.
        mask: f64,
    },
    /// Patch of any other type, given by name.
    Patch(String),
}

impl SideKind {
    fn pairing(&self) -> Option<&'static str> {
        match self {
            SideKind::Cyclic => Some("cyclic"),
            SideKind::CyclicAmi => Some("cyclicAMI"),
            SideKind::CyclicAcmi { .. } => Some("cyclicACMI"),
            _ => None,
        }
    }
}

/// Builder for a block of hexahedra.
#[derive(Debug, Clone)]
pub struct BoxMesh {
    origin: Vector,
    lengths: Vector,
    divisions: [usize; 3],
    sides: [SideKind; 6],
}

impl BoxMesh {
    /// Box with lower corner `origin`, edge `lengths` and `divisions` cells per
    /// axis. Every side starts as a wall.
    pub fn new(origin: Vector, lengths: Vector, divisions: [usize; 3]) -> Self {
        Self {
            origin,
            lengths,
            divisions,
            sides: std::array::from_fn(|_| SideKind::Wall),
        }
    }

    /// Set the boundary kind of one side.
    pub fn side(mut self, side: Side, kind: SideKind) -> Self {
        self.sides[side.index()] = kind;
        self
    }

    /// Set both sides of an axis to the same kind.
    pub fn axis_pair(self, axis: usize, kind: SideKind) -> Self {
        let lo = Side::ALL[2 * axis];
        self.side(lo, kind.clone()).side(lo.opposite(), kind)
    }

    /// Generate the mesh.
    pub fn build(&self) -> Result<PolyMesh, MeshError> {
        let [nx, ny, nz] = self.divisions;
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(MeshError::Connectivity(format!(
                "box divisions must be positive, got {:?}",
                self.divisions
            )));
        }
        if (0..3).any(|d| self.lengths[d] <= 0.0) {
            return Err(MeshError::Connectivity(format!(
                "box lengths must be positive, got {:?}",
                self.lengths
            )));
        }
        for side in [Side::XMin, Side::YMin, Side::ZMin] {
            let a = &self.sides[side.index()];
            let b = &self.sides[side.opposite().index()];
            if a.pairing() != b.pairing() {
                return Err(MeshError::InvalidCoupling {
                    patch: side.name().to_string(),
                    reason: format!(
                        "{:?} paired with {:?} on '{}'",
                        a,
                        b,
                        side.opposite().name()
                    ),
                });
            }
        }

        let n = self.divisions;
        let spacing = Vector::new(
            self.lengths.x / nx as f64,
            self.lengths.y / ny as f64,
            self.lengths.z / nz as f64,
        );

        let point_id = |ijk: [usize; 3]| ijk[0] + (nx + 1) * (ijk[1] + (ny + 1) * ijk[2]);
        let cell_id = |ijk: [usize; 3]| ijk[0] + nx * (ijk[1] + ny * ijk[2]);

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    points.push(
                        self.origin
                            + Vector::new(
                                i as f64 * spacing.x,
                                j as f64 * spacing.y,
                                k as f64 * spacing.z,
                            ),
                    );
                }
            }
        }

        // Quad normal to `axis` at `level`, spanning cells (a, b) along the two
        // following axes. Positive orientation points along +axis.
        let quad = |axis: usize, level: usize, a: usize, b: usize, positive: bool| -> Vec<usize> {
            let u = (axis + 1) % 3;
            let v = (axis + 2) % 3;
            let corner = |du: usize, dv: usize| {
                let mut ijk = [0; 3];
                ijk[axis] = level;
                ijk[u] = a + du;
                ijk[v] = b + dv;
                point_id(ijk)
            };
            let q = [corner(0, 0), corner(1, 0), corner(1, 1), corner(0, 1)];
            if positive {
                q.to_vec()
            } else {
                vec![q[0], q[3], q[2], q[1]]
            }
        };

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let ijk = [i, j, k];
                    for axis in 0..3 {
                        if ijk[axis] + 1 >= n[axis] {
                            continue;
                        }
                        let mut next = ijk;
                        next[axis] += 1;
                        let u = (axis + 1) % 3;
                        let v = (axis + 2) % 3;
                        faces.push(quad(axis, ijk[axis] + 1, ijk[u], ijk[v], true));
                        owner.push(cell_id(ijk));
                        neighbour.push(cell_id(next));
                    }
                }
            }
        }

        let mut side_faces: Vec<(Vec<Vec<usize>>, Vec<usize>)> = Vec::with_capacity(6);
        for side in Side::ALL {
            let axis = side.axis();
            let u = (axis + 1) % 3;
            let v = (axis + 2) % 3;
            let level = if side.is_max() { n[axis] } else { 0 };
            let layer = if side.is_max() { n[axis] - 1 } else { 0 };
            let mut fs = Vec::new();
            let mut os = Vec::new();
            for b in 0..n[v] {
                for a in 0..n[u] {
                    fs.push(quad(axis, level, a, b, side.is_max()));
                    let mut ijk = [0; 3];
                    ijk[axis] = layer;
                    ijk[u] = a;
                    ijk[v] = b;
                    os.push(cell_id(ijk));
                }
            }
            side_faces.push((fs, os));
        }

        let acmi_sides: Vec<Side> = Side::ALL
            .into_iter()
            .filter(|s| matches!(self.sides[s.index()], SideKind::CyclicAcmi { .. }))
            .collect();

        let mut patches = Vec::new();
        let mut start = faces.len();
        for side in Side::ALL {
            let size = side_faces[side.index()].0.len();
            let axis = side.axis();
            let mut separation = Vector::zeros();
            separation[axis] = if side.is_max() {
                -self.lengths[axis]
            } else {
                self.lengths[axis]
            };
            let twin = side.opposite().index();
            let kind = match &self.sides[side.index()] {
                SideKind::Wall => PatchKind::Wall,
                SideKind::Symmetry => PatchKind::Symmetry,
                SideKind::Wedge => PatchKind::Wedge,
                SideKind::Patch(name) => PatchKind::Generic(name.clone()),
                SideKind::Cyclic => PatchKind::Cyclic(CyclicCoupling {
                    neighbour_patch: twin,
                    transform: CoupledTransform::translation(separation),
                }),
                SideKind::CyclicAmi => PatchKind::CyclicAmi(AmiCoupling::new(
                    twin,
                    CoupledTransform::translation(separation),
                )),
                SideKind::CyclicAcmi { mask } => {
                    let shadow = 6 + acmi_sides.iter().position(|s| *s == side).unwrap_or(0);
                    PatchKind::CyclicAcmi(AcmiCoupling::uniform(
                        AmiCoupling::new(twin, CoupledTransform::translation(separation)),
                        shadow,
                        size,
                        *mask,
                    ))
                }
            };
            patches.push(Patch::new(side.name(), start, size, kind));
            start += size;
        }
        for side in &acmi_sides {
            let size = side_faces[side.index()].0.len();
            patches.push(Patch::new(
                format!("{}_nonOverlap", side.name()),
                start,
                size,
                PatchKind::Wall,
            ));
            start += size;
        }

        for (fs, os) in &side_faces {
            faces.extend(fs.iter().cloned());
            owner.extend(os.iter().copied());
        }
        for side in &acmi_sides {
            let (fs, os) = &side_faces[side.index()];
            faces.extend(fs.iter().cloned());
            owner.extend(os.iter().copied());
        }

        PolyMesh::new(points, faces, owner, neighbour, patches)
    }
}
