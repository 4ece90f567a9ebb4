//! Mesh decomposition into per-rank partitions.
//!
//! Every cell is assigned a rank. Each partition keeps its cells and points
//! in ascending global order and lays its faces out as
//!
//! 1. internal faces with both cells on the rank,
//! 2. the faces of every original patch owned by the rank (patches are kept
//!    even when empty, so patch indices agree across ranks),
//! 3. one processor patch per neighbouring rank, in ascending rank order.
//!
//! A processor patch lists the shared faces in global face order on both
//! sides, so face `i` on one side matches face `i` on the other. The
//! neighbour's copy is reversed about point 0 so its normal points out of
//! its own cell. Face addressing records this as `+(g + 1)` for a face kept
//! as is and `-(g + 1)` for a reversed one.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracking::mesh::{
    AcmiCoupling, AmiCoupling, CoupledTransform, CyclicCoupling, ProcessorCoupling,
};
use tracking::{MeshError, Patch, PatchKind, PolyMesh};

/// Errors raised while decomposing a mesh.
#[derive(Debug, Error)]
pub enum DecomposeError {
    /// The cell-to-rank map does not fit the mesh.
    #[error("cell {cell} assigned to rank {rank} of {n_ranks}")]
    CellRank {
        /// Global cell.
        cell: usize,
        /// Assigned rank.
        rank: usize,
        /// Number of ranks.
        n_ranks: usize,
    },

    /// The cell-to-rank map has the wrong length.
    #[error("{found} cell ranks for {expected} cells")]
    CellCount {
        /// Cells in the mesh.
        expected: usize,
        /// Entries in the map.
        found: usize,
    },

    /// A rank received no cells.
    #[error("rank {0} has no cells")]
    EmptyRank(usize),

    /// A coupled face and its partner ended up on different ranks.
    #[error("face {face} of coupled patch '{patch}' and its partner are on different ranks")]
    SplitCoupling {
        /// Patch name.
        patch: String,
        /// Patch-local face.
        face: usize,
    },

    /// The input mesh is itself a partition.
    #[error("patch '{0}' is a processor patch; only undecomposed meshes can be split")]
    AlreadyDecomposed(String),

    /// A partition failed to build.
    #[error("partition of rank {rank}: {source}")]
    Mesh {
        /// Rank of the partition.
        rank: usize,
        /// Underlying mesh error.
        source: MeshError,
    },
}

/// Map from one partition back to the undecomposed mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcAddressing {
    /// Global cell of every local cell.
    pub cell: Vec<usize>,
    /// `+(g + 1)` or, for a face reversed on this rank, `-(g + 1)`, where `g`
    /// is the global face of every local face.
    pub face: Vec<i64>,
    /// Global point of every local point.
    pub point: Vec<usize>,
    /// Global patch of every local patch; processor patches have none.
    pub patch: Vec<Option<usize>>,
}

impl ProcAddressing {
    /// Global face of a local face.
    pub fn global_face(&self, local: usize) -> usize {
        (self.face[local].unsigned_abs() - 1) as usize
    }

    /// Whether a local face is reversed relative to its global face.
    pub fn is_flipped(&self, local: usize) -> bool {
        self.face[local] < 0
    }
}

/// A mesh split over ranks, with the addressing back to the whole.
#[derive(Debug, Clone)]
pub struct Decomposition {
    meshes: Vec<PolyMesh>,
    addressing: Vec<ProcAddressing>,
    cell_rank: Vec<usize>,
    local_cell: Vec<usize>,
    local_faces: Vec<HashMap<usize, usize>>,
}

impl Decomposition {
    /// Number of ranks.
    pub fn n_ranks(&self) -> usize {
        self.meshes.len()
    }

    /// Partition of every rank.
    pub fn meshes(&self) -> &[PolyMesh] {
        &self.meshes
    }

    /// Addressing of every rank.
    pub fn addressing(&self) -> &[ProcAddressing] {
        &self.addressing
    }

    /// Rank of every global cell.
    pub fn cell_rank(&self) -> &[usize] {
        &self.cell_rank
    }

    /// Rank and local index of a global cell.
    pub fn local_cell(&self, global: usize) -> Option<(usize, usize)> {
        Some((*self.cell_rank.get(global)?, *self.local_cell.get(global)?))
    }

    /// Local index of a global face on a rank, if the rank holds it.
    pub fn local_face(&self, rank: usize, global: usize) -> Option<usize> {
        self.local_faces.get(rank)?.get(&global).copied()
    }

    /// Take the partitions, dropping the addressing.
    pub fn into_meshes(self) -> Vec<PolyMesh> {
        self.meshes
    }
}

/// Assign cells to ranks by slicing the bounding box of the mesh into
/// `splits[0] x splits[1] x splits[2]` slabs. Rank `ix + sx * (iy + sy * iz)`
/// gets the cells whose centres fall in slab `(ix, iy, iz)`.
pub fn box_cell_ranks(mesh: &PolyMesh, splits: [usize; 3]) -> Vec<usize> {
    let (lo, hi) = mesh.bounds();
    mesh.cell_centres()
        .iter()
        .map(|c| {
            let mut slab = [0; 3];
            for d in 0..3 {
                let span = hi[d] - lo[d];
                let s = splits[d].max(1);
                let t = if span > 0.0 { (c[d] - lo[d]) / span } else { 0.0 };
                slab[d] = ((t * s as f64).floor().max(0.0) as usize).min(s - 1);
            }
            slab[0] + splits[0].max(1) * (slab[1] + splits[1].max(1) * slab[2])
        })
        .collect()
}

/// Split `mesh` into `n_ranks` partitions following `cell_rank`.
///
/// Coupled patches (cyclic, AMI, ACMI) may be cut only where every face stays
/// on the same rank as its partner face.
pub fn decompose(
    mesh: &PolyMesh,
    cell_rank: &[usize],
    n_ranks: usize,
) -> Result<Decomposition, DecomposeError> {
    if cell_rank.len() != mesh.n_cells() {
        return Err(DecomposeError::CellCount {
            expected: mesh.n_cells(),
            found: cell_rank.len(),
        });
    }
    if let Some((cell, &rank)) = cell_rank.iter().enumerate().find(|(_, &r)| r >= n_ranks) {
        return Err(DecomposeError::CellRank {
            cell,
            rank,
            n_ranks,
        });
    }
    if let Some(p) = mesh
        .boundary()
        .iter()
        .find(|p| matches!(p.kind, PatchKind::Processor(_)))
    {
        return Err(DecomposeError::AlreadyDecomposed(p.name.clone()));
    }
    check_couplings(mesh, cell_rank)?;

    let mut rank_cells: Vec<Vec<usize>> = vec![Vec::new(); n_ranks];
    let mut local_cell = vec![0; mesh.n_cells()];
    for (celli, &rank) in cell_rank.iter().enumerate() {
        local_cell[celli] = rank_cells[rank].len();
        rank_cells[rank].push(celli);
    }
    if let Some(rank) = rank_cells.iter().position(Vec::is_empty) {
        return Err(DecomposeError::EmptyRank(rank));
    }

    let owner = mesh.face_owner();
    let neighbour = mesh.face_neighbour();
    let n_internal = mesh.n_internal_faces();

    let mut neighbours: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n_ranks];
    for facei in 0..n_internal {
        let (a, b) = (cell_rank[owner[facei]], cell_rank[neighbour[facei]]);
        if a != b {
            neighbours[a].insert(b);
            neighbours[b].insert(a);
        }
    }
    let neighbours: Vec<Vec<usize>> = neighbours.into_iter().map(|s| s.into_iter().collect()).collect();
    let n_orig = mesh.boundary().len();

    let mut meshes = Vec::with_capacity(n_ranks);
    let mut addressing = Vec::with_capacity(n_ranks);
    let mut local_faces = Vec::with_capacity(n_ranks);

    for rank in 0..n_ranks {
        let mut faces: Vec<Vec<usize>> = Vec::new();
        let mut face_owner = Vec::new();
        let mut face_neighbour = Vec::new();
        let mut face_addr: Vec<i64> = Vec::new();
        let mut push = |face: Vec<usize>, o: usize, addr: i64| {
            faces.push(face);
            face_owner.push(o);
            face_addr.push(addr);
        };

        for facei in 0..n_internal {
            if cell_rank[owner[facei]] == rank && cell_rank[neighbour[facei]] == rank {
                push(mesh.faces()[facei].clone(), local_cell[owner[facei]], addr(facei));
                face_neighbour.push(local_cell[neighbour[facei]]);
            }
        }

        let mut patches = Vec::with_capacity(n_orig + neighbours[rank].len());
        for pp in mesh.boundary() {
            let start = face_neighbour.len() + patch_faces(&patches);
            let selected: Vec<usize> = (0..pp.size)
                .filter(|&i| cell_rank[owner[pp.start + i]] == rank)
                .collect();
            for &i in &selected {
                let facei = pp.start + i;
                push(mesh.faces()[facei].clone(), local_cell[owner[facei]], addr(facei));
            }
            patches.push(Patch::new(
                pp.name.clone(),
                start,
                selected.len(),
                slice_kind(&pp.kind, &selected),
            ));
        }

        for &nbr in &neighbours[rank] {
            let start = face_neighbour.len() + patch_faces(&patches);
            let mut size = 0;
            for facei in 0..n_internal {
                let (o, n) = (owner[facei], neighbour[facei]);
                if cell_rank[o] == rank && cell_rank[n] == nbr {
                    push(mesh.faces()[facei].clone(), local_cell[o], addr(facei));
                } else if cell_rank[n] == rank && cell_rank[o] == nbr {
                    push(reversed(&mesh.faces()[facei]), local_cell[n], -addr(facei));
                } else {
                    continue;
                }
                size += 1;
            }
            let neighbour_patch = n_orig
                + neighbours[nbr]
                    .iter()
                    .position(|&r| r == rank)
                    .unwrap_or_default();
            patches.push(Patch::new(
                format!("procBoundary{}to{}", rank, nbr),
                start,
                size,
                PatchKind::Processor(ProcessorCoupling {
                    my_rank: rank,
                    neighbour_rank: nbr,
                    neighbour_patch,
                }),
            ));
        }

        let used: BTreeSet<usize> = faces.iter().flatten().copied().collect();
        let point: Vec<usize> = used.into_iter().collect();
        let local_point: HashMap<usize, usize> =
            point.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let points = point.iter().map(|&g| mesh.points()[g]).collect();
        let faces = faces
            .into_iter()
            .map(|f| f.into_iter().map(|g| local_point[&g]).collect())
            .collect();

        let proc_mesh = PolyMesh::new(points, faces, face_owner, face_neighbour, patches)
            .map_err(|source| DecomposeError::Mesh { rank, source })?
            .with_rank(rank);

        let addressing_r = ProcAddressing {
            cell: rank_cells[rank].clone(),
            point,
            patch: (0..n_orig)
                .map(Some)
                .chain(neighbours[rank].iter().map(|_| None))
                .collect(),
            face: face_addr,
        };
        local_faces.push(
            (0..addressing_r.face.len())
                .map(|l| (addressing_r.global_face(l), l))
                .collect(),
        );

        tracing::debug!(
            "Rank {}: {} cells, {} faces, {} processor patches",
            rank,
            proc_mesh.n_cells(),
            proc_mesh.n_faces(),
            neighbours[rank].len()
        );
        meshes.push(proc_mesh);
        addressing.push(addressing_r);
    }

    tracing::info!(
        "Decomposed {} cells into {} ranks",
        mesh.n_cells(),
        n_ranks
    );

    Ok(Decomposition {
        meshes,
        addressing,
        cell_rank: cell_rank.to_vec(),
        local_cell,
        local_faces,
    })
}

fn addr(facei: usize) -> i64 {
    facei as i64 + 1
}

fn patch_faces(patches: &[Patch]) -> usize {
    patches.iter().map(|p| p.size).sum()
}

/// The face as seen from the other side: reversed about point 0.
fn reversed(face: &[usize]) -> Vec<usize> {
    let mut f = Vec::with_capacity(face.len());
    f.push(face[0]);
    f.extend(face[1..].iter().rev());
    f
}

fn slice_transform(t: &CoupledTransform, selected: &[usize]) -> CoupledTransform {
    fn pick<T: Clone>(values: &[T], selected: &[usize]) -> Vec<T> {
        if values.len() == 1 {
            values.to_vec()
        } else {
            selected.iter().filter_map(|&i| values.get(i).cloned()).collect()
        }
    }
    match t {
        CoupledTransform::Identity => CoupledTransform::Identity,
        CoupledTransform::Translational { separation } => CoupledTransform::Translational {
            separation: pick(separation, selected),
        },
        CoupledTransform::Rotational { rotation, centre } => CoupledTransform::Rotational {
            rotation: pick(rotation, selected),
            centre: *centre,
        },
    }
}

fn slice_kind(kind: &PatchKind, selected: &[usize]) -> PatchKind {
    match kind {
        PatchKind::Cyclic(cyc) => PatchKind::Cyclic(CyclicCoupling {
            neighbour_patch: cyc.neighbour_patch,
            transform: slice_transform(&cyc.transform, selected),
        }),
        PatchKind::CyclicAmi(ami) => PatchKind::CyclicAmi(AmiCoupling::new(
            ami.neighbour_patch,
            slice_transform(&ami.transform, selected),
        )),
        PatchKind::CyclicAcmi(acmi) => PatchKind::CyclicAcmi(AcmiCoupling {
            ami: AmiCoupling::new(
                acmi.ami.neighbour_patch,
                slice_transform(&acmi.ami.transform, selected),
            ),
            non_overlap_patch: acmi.non_overlap_patch,
            mask: selected.iter().map(|&i| acmi.mask[i]).collect(),
            tolerance: acmi.tolerance,
        }),
        other => other.clone(),
    }
}

/// Every coupled face must land on the same rank as its partner.
fn check_couplings(mesh: &PolyMesh, cell_rank: &[usize]) -> Result<(), DecomposeError> {
    let owner = mesh.face_owner();
    let rank_of = |facei: usize| cell_rank[owner[facei]];
    for pp in mesh.boundary() {
        let split = |face: usize| DecomposeError::SplitCoupling {
            patch: pp.name.clone(),
            face,
        };
        match &pp.kind {
            PatchKind::Cyclic(cyc) => {
                let twin = &mesh.boundary()[cyc.neighbour_patch];
                for i in 0..pp.size {
                    if rank_of(pp.start + i) != rank_of(twin.start + i) {
                        return Err(split(i));
                    }
                }
            }
            PatchKind::CyclicAmi(_) | PatchKind::CyclicAcmi(_) => {
                let Some(ami) = pp.kind.ami() else { continue };
                let twin = &mesh.boundary()[ami.neighbour_patch];
                for i in 0..pp.size {
                    let x = ami
                        .transform
                        .transform_position(&mesh.face_centres()[pp.start + i], i);
                    let partner = ami.candidates.get(i).and_then(|c| {
                        c.iter()
                            .map(|&j| twin.start + j)
                            .find(|&f| mesh.point_in_face(&x, f))
                    });
                    if let Some(f) = partner {
                        if rank_of(pp.start + i) != rank_of(f) {
                            return Err(split(i));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracking::{BoxMesh, SideKind, Vector};

    fn slab_mesh(kind: SideKind) -> PolyMesh {
        BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [4, 2, 2])
            .axis_pair(1, kind)
            .build()
            .unwrap()
    }

    #[test]
    fn test_box_cell_ranks() {
        let mesh = slab_mesh(SideKind::Wall);
        let ranks = box_cell_ranks(&mesh, [2, 1, 1]);
        for (c, &r) in mesh.cell_centres().iter().zip(&ranks) {
            assert_eq!(r, usize::from(c.x > 0.5));
        }
        let ranks = box_cell_ranks(&mesh, [2, 2, 1]);
        assert_eq!(ranks.iter().collect::<BTreeSet<_>>().len(), 4);
    }

    #[test]
    fn test_two_rank_split() {
        let mesh = slab_mesh(SideKind::Wall);
        let ranks = box_cell_ranks(&mesh, [2, 1, 1]);
        let d = decompose(&mesh, &ranks, 2).unwrap();

        assert_eq!(d.n_ranks(), 2);
        let total: usize = d.meshes().iter().map(PolyMesh::n_cells).sum();
        assert_eq!(total, mesh.n_cells());

        for (rank, (m, a)) in d.meshes().iter().zip(d.addressing()).enumerate() {
            assert_eq!(m.rank(), rank);
            assert_eq!(m.boundary().len(), 7);
            let proc = &m.boundary()[6];
            assert_eq!(proc.size, 4);
            match &proc.kind {
                PatchKind::Processor(pc) => {
                    assert_eq!(pc.my_rank, rank);
                    assert_eq!(pc.neighbour_rank, 1 - rank);
                    assert_eq!(pc.neighbour_patch, 6);
                }
                other => panic!("expected processor patch, got {:?}", other),
            }
            assert_eq!(a.patch[6], None);
            assert_eq!(a.patch[0], Some(0));

            // Every local cell centre matches its global cell
            for (l, &g) in a.cell.iter().enumerate() {
                assert!((m.cell_centres()[l] - mesh.cell_centres()[g]).norm() < 1e-12);
            }
            for (l, &g) in a.point.iter().enumerate() {
                assert_eq!(m.points()[l], mesh.points()[g]);
            }
        }

        // Processor faces pair up in order, flipped on one side only
        let (a0, a1) = (&d.addressing()[0], &d.addressing()[1]);
        let p0 = &d.meshes()[0].boundary()[6];
        let p1 = &d.meshes()[1].boundary()[6];
        for i in 0..p0.size {
            let (f0, f1) = (p0.start + i, p1.start + i);
            assert_eq!(a0.global_face(f0), a1.global_face(f1));
            assert_ne!(a0.is_flipped(f0), a1.is_flipped(f1));
            let n0 = d.meshes()[0].face_areas()[f0];
            let n1 = d.meshes()[1].face_areas()[f1];
            assert!((n0 + n1).norm() < 1e-12);
        }
    }

    #[test]
    fn test_local_lookup() {
        let mesh = slab_mesh(SideKind::Wall);
        let ranks = box_cell_ranks(&mesh, [2, 2, 1]);
        let d = decompose(&mesh, &ranks, 4).unwrap();
        for g in 0..mesh.n_cells() {
            let (rank, local) = d.local_cell(g).unwrap();
            assert_eq!(d.addressing()[rank].cell[local], g);
            for &facei in &mesh.cells()[g] {
                let lf = d.local_face(rank, facei).unwrap();
                assert_eq!(d.addressing()[rank].global_face(lf), facei);
            }
        }
    }

    #[test]
    fn test_cyclic_kept_whole_across_axis() {
        let mesh = slab_mesh(SideKind::Cyclic);
        let ranks = box_cell_ranks(&mesh, [2, 1, 1]);
        let d = decompose(&mesh, &ranks, 2).unwrap();
        for m in d.meshes() {
            assert_eq!(m.boundary()[2].size, m.boundary()[3].size);
            assert_eq!(m.boundary()[2].size, 4);
        }
    }

    #[test]
    fn test_split_coupling_rejected() {
        let mesh = slab_mesh(SideKind::Cyclic);
        let ranks = box_cell_ranks(&mesh, [1, 2, 1]);
        assert!(matches!(
            decompose(&mesh, &ranks, 2),
            Err(DecomposeError::SplitCoupling { .. })
        ));

        let ami = slab_mesh(SideKind::CyclicAmi);
        let ranks = box_cell_ranks(&ami, [1, 2, 1]);
        assert!(matches!(
            decompose(&ami, &ranks, 2),
            Err(DecomposeError::SplitCoupling { .. })
        ));
    }

    #[test]
    fn test_bad_rank_maps() {
        let mesh = slab_mesh(SideKind::Wall);
        assert!(matches!(
            decompose(&mesh, &[0; 3], 1),
            Err(DecomposeError::CellCount { .. })
        ));
        let ranks = vec![0; mesh.n_cells()];
        assert!(matches!(
            decompose(&mesh, &ranks, 2),
            Err(DecomposeError::EmptyRank(1))
        ));
        let mut ranks = vec![0; mesh.n_cells()];
        ranks[3] = 5;
        assert!(matches!(
            decompose(&mesh, &ranks, 2),
            Err(DecomposeError::CellRank { cell: 3, rank: 5, .. })
        ));
    }

    #[test]
    fn test_redecompose_rejected() {
        let mesh = slab_mesh(SideKind::Wall);
        let d = decompose(&mesh, &box_cell_ranks(&mesh, [2, 1, 1]), 2).unwrap();
        let part = &d.meshes()[0];
        let ranks = vec![0; part.n_cells()];
        assert!(matches!(
            decompose(part, &ranks, 1),
            Err(DecomposeError::AlreadyDecomposed(_))
        ));
    }
}
