//! Moving clouds between a whole mesh and its partitions.
//!
//! Particles are carried across by index: cell, tet face and face go through
//! the decomposition's addressing and the tet point is re-expressed for the
//! face orientation on the other side. Particles keep their identities and
//! attached state. A particle whose cell or face has no counterpart means the
//! addressing is corrupt, and the whole operation fails.
//!
//! The case-level functions do the same on disk, for every object in the
//! cloud directory: the positions object is mapped particle by particle and
//! every other field object follows the same permutation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracking::io::cloud_io::{
    cloud_dir, list_objects, read_cloud_properties, write_cloud_properties, POSITIONS,
};
use tracking::io::fields::{read_object, write_object, Field, Object};
use tracking::{Cloud, Particle, PolyMesh, TrackingError, TrackingSettings, WireError, WriteFormat};

use crate::decompose::Decomposition;

/// Errors raised while redistributing particles.
#[derive(Debug, Error)]
pub enum RedistributeError {
    /// A particle's cell has no entry in the addressing.
    #[error("cell {cell} on rank {rank} has no counterpart in the decomposition")]
    MissingCell {
        /// Rank the particle came from.
        rank: usize,
        /// Cell on that rank.
        cell: usize,
    },

    /// A particle's face has no entry in the addressing.
    #[error("face {face} has no counterpart on rank {rank}")]
    MissingFace {
        /// Rank being looked up.
        rank: usize,
        /// Face being mapped.
        face: usize,
    },

    /// The number of clouds does not match the number of partitions.
    #[error("{found} clouds for {expected} ranks")]
    RankCount {
        /// Partitions in the decomposition.
        expected: usize,
        /// Clouds supplied.
        found: usize,
    },

    /// Two ranks hold a field of the same name with different classes.
    #[error("field '{name}' has different classes on different ranks")]
    FieldKind {
        /// Field object name.
        name: String,
    },

    /// A field present on some ranks is missing where particles exist.
    #[error("field '{name}' has {len} entries for {expected} particles")]
    MissingField {
        /// Field object name.
        name: String,
        /// Entries gathered.
        len: usize,
        /// Particles gathered.
        expected: usize,
    },

    /// A cloud directory has no positions object.
    #[error("no positions object in {0}")]
    NoPositions(PathBuf),

    /// A particle could not be re-expressed on the target mesh.
    #[error(transparent)]
    Tracking(#[from] TrackingError),

    /// An object could not be read or written.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Directory of rank `rank`'s part of the case.
pub fn processor_dir(case: &Path, rank: usize) -> PathBuf {
    case.join(format!("processor{}", rank))
}

/// Particles of each rank, with their indices in the input.
type RankParticles = Vec<(Vec<usize>, Vec<Particle>)>;

fn split_particles(
    mesh: &PolyMesh,
    decomposition: &Decomposition,
    particles: &[Particle],
    settings: &TrackingSettings,
) -> Result<RankParticles, RedistributeError> {
    let mut out: RankParticles = vec![(Vec::new(), Vec::new()); decomposition.n_ranks()];
    for (i, p) in particles.iter().enumerate() {
        let (rank, cell) =
            decomposition
                .local_cell(p.cell())
                .ok_or(RedistributeError::MissingCell {
                    rank: mesh.rank(),
                    cell: p.cell(),
                })?;
        let local_face = |face: usize| {
            decomposition
                .local_face(rank, face)
                .ok_or(RedistributeError::MissingFace { rank, face })
        };
        let tet_face = local_face(p.tet_face())?;
        let face = p.face().map(&local_face).transpose()?;

        let mapped = p.mapped_to(
            mesh,
            &decomposition.meshes()[rank],
            cell,
            tet_face,
            face,
            settings,
        )?;
        out[rank].0.push(i);
        out[rank].1.push(mapped);
    }
    Ok(out)
}

fn gather_particles(
    mesh: &PolyMesh,
    decomposition: &Decomposition,
    rank: usize,
    particles: &[Particle],
    settings: &TrackingSettings,
) -> Result<Vec<Particle>, RedistributeError> {
    let addressing = &decomposition.addressing()[rank];
    let proc_mesh = &decomposition.meshes()[rank];
    let global_face = |face: usize| {
        if face < addressing.face.len() {
            Ok(addressing.global_face(face))
        } else {
            Err(RedistributeError::MissingFace { rank, face })
        }
    };

    particles
        .iter()
        .map(|p| -> Result<Particle, RedistributeError> {
            let cell = *addressing
                .cell
                .get(p.cell())
                .ok_or(RedistributeError::MissingCell { rank, cell: p.cell() })?;
            let tet_face = global_face(p.tet_face())?;
            let face = p.face().map(&global_face).transpose()?;
            Ok(p.mapped_to(proc_mesh, mesh, cell, tet_face, face, settings)?)
        })
        .collect()
}

/// Next id of every rank after a split: rank 0 continues the whole cloud's
/// sequence, other ranks continue after the largest id they minted before.
fn split_next_ids(next_id: u64, parts: &RankParticles) -> Vec<u64> {
    let all = parts.iter().flat_map(|(_, ps)| ps.iter());
    let mut next = vec![0; parts.len()];
    for p in all {
        if let Some(n) = next.get_mut(p.origin_proc()) {
            *n = (*n).max(p.origin_id() + 1);
        }
    }
    if let Some(n0) = next.first_mut() {
        *n0 = (*n0).max(next_id);
    }
    next
}

/// Next id of a whole cloud gathered from ranks whose rank 0 had `next_id`.
fn gathered_next_id(next_id: u64, particles: &[Particle]) -> u64 {
    particles
        .iter()
        .filter(|p| p.origin_proc() == 0)
        .map(|p| p.origin_id() + 1)
        .max()
        .unwrap_or(0)
        .max(next_id)
}

/// Split a cloud on the whole `mesh` into one cloud per partition.
pub fn decompose_cloud(
    mesh: &PolyMesh,
    decomposition: &Decomposition,
    cloud: &Cloud,
) -> Result<Vec<Cloud>, RedistributeError> {
    let parts = split_particles(mesh, decomposition, cloud.particles(), cloud.settings())?;
    let next_ids = split_next_ids(cloud.next_id(), &parts);

    let clouds = parts
        .into_iter()
        .zip(next_ids)
        .map(|((_, particles), next)| {
            let mut c = Cloud::new(cloud.name(), cloud.settings().clone())
                .with_wall_interaction(cloud.wall_interaction().clone());
            c.set_next_id(next);
            for p in particles {
                c.add(p);
            }
            c
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        "Decomposed cloud '{}': {:?} particles per rank",
        cloud.name(),
        clouds.iter().map(Cloud::len).collect::<Vec<_>>()
    );
    Ok(clouds)
}

/// Gather the clouds of every partition into one cloud on the whole `mesh`.
/// Particles are ordered by rank, then by their order on the rank.
pub fn reconstruct_cloud(
    mesh: &PolyMesh,
    decomposition: &Decomposition,
    clouds: &[Cloud],
) -> Result<Cloud, RedistributeError> {
    if clouds.len() != decomposition.n_ranks() {
        return Err(RedistributeError::RankCount {
            expected: decomposition.n_ranks(),
            found: clouds.len(),
        });
    }
    let Some(first) = clouds.first() else {
        return Err(RedistributeError::RankCount {
            expected: decomposition.n_ranks(),
            found: 0,
        });
    };

    let mut whole = Cloud::new(first.name(), first.settings().clone())
        .with_wall_interaction(first.wall_interaction().clone());
    for (rank, cloud) in clouds.iter().enumerate() {
        for p in gather_particles(mesh, decomposition, rank, cloud.particles(), cloud.settings())? {
            whole.add(p);
        }
    }
    whole.set_next_id(gathered_next_id(first.next_id(), whole.particles()));

    tracing::debug!(
        "Reconstructed cloud '{}' with {} particles",
        whole.name(),
        whole.len()
    );
    Ok(whole)
}

/// Move the clouds of one decomposition of `mesh` onto another.
pub fn redistribute_cloud(
    mesh: &PolyMesh,
    from: &Decomposition,
    clouds: &[Cloud],
    to: &Decomposition,
) -> Result<Vec<Cloud>, RedistributeError> {
    let whole = reconstruct_cloud(mesh, from, clouds)?;
    decompose_cloud(mesh, to, &whole)
}

/// Contents of one cloud directory.
#[derive(Debug, Default)]
struct CloudObjects {
    particles: Vec<Particle>,
    fields: BTreeMap<String, Field>,
}

fn read_objects(dir: &Path) -> Result<CloudObjects, RedistributeError> {
    let mut objects = CloudObjects::default();
    let mut found_positions = false;
    for name in list_objects(dir)? {
        match read_object(&dir.join(&name))? {
            (_, Object::Positions(p)) => {
                objects.particles = p;
                found_positions = true;
            }
            (obj_name, Object::Field(f)) => {
                objects.fields.insert(obj_name, f);
            }
        }
    }
    if !found_positions {
        return Err(RedistributeError::NoPositions(dir.to_path_buf()));
    }
    for (name, field) in &objects.fields {
        if field.len() != objects.particles.len() {
            return Err(WireError::FieldLength {
                name: name.clone(),
                len: field.len(),
                expected: objects.particles.len(),
            }
            .into());
        }
    }
    Ok(objects)
}

fn write_objects(
    dir: &Path,
    particles: Vec<Particle>,
    fields: &BTreeMap<String, Field>,
    format: WriteFormat,
) -> Result<(), RedistributeError> {
    fs::create_dir_all(dir)?;
    write_object(&dir.join(POSITIONS), POSITIONS, &Object::Positions(particles), format)?;
    for (name, field) in fields {
        write_object(&dir.join(name), name, &Object::Field(field.clone()), format)?;
    }
    Ok(())
}

impl From<std::io::Error> for RedistributeError {
    fn from(e: std::io::Error) -> Self {
        RedistributeError::Wire(WireError::Io(e))
    }
}

/// Split cloud `name` of `case` into `case/processor<N>` directories, one
/// per partition, carrying every field object along. Every rank gets every
/// object, empty where it has no particles.
///
/// Returns the number of particles written to each rank.
pub fn decompose_case(
    case: &Path,
    name: &str,
    mesh: &PolyMesh,
    decomposition: &Decomposition,
    settings: &TrackingSettings,
    format: WriteFormat,
) -> Result<Vec<usize>, RedistributeError> {
    let dir = cloud_dir(case, name);
    if !dir.exists() {
        tracing::warn!("No cloud '{}' in {}; nothing to decompose", name, case.display());
        return Ok(vec![0; decomposition.n_ranks()]);
    }
    let objects = read_objects(&dir)?;
    let parts = split_particles(mesh, decomposition, &objects.particles, settings)?;

    let whole_next = read_cloud_properties(case, name)?
        .get(&0)
        .copied()
        .unwrap_or(0);
    let next_ids = split_next_ids(whole_next, &parts);

    let mut counts = Vec::with_capacity(parts.len());
    for (rank, ((indices, particles), next)) in parts.into_iter().zip(next_ids).enumerate() {
        let proc_case = processor_dir(case, rank);
        let fields: BTreeMap<String, Field> = objects
            .fields
            .iter()
            .map(|(n, f)| (n.clone(), f.select(&indices)))
            .collect();
        counts.push(particles.len());
        write_objects(&cloud_dir(&proc_case, name), particles, &fields, format)?;
        write_cloud_properties(&proc_case, name, &BTreeMap::from([(rank, next)]))?;
    }

    tracing::info!(
        "Decomposed cloud '{}' ({} particles, {} fields) into {} ranks",
        name,
        objects.particles.len(),
        objects.fields.len(),
        counts.len()
    );
    Ok(counts)
}

/// Gather cloud `name` from the `case/processor<N>` directories into
/// `case`, concatenating every field object in rank order. Ranks without a
/// cloud directory contribute nothing.
///
/// Returns the number of particles written.
pub fn reconstruct_case(
    case: &Path,
    name: &str,
    mesh: &PolyMesh,
    decomposition: &Decomposition,
    settings: &TrackingSettings,
    format: WriteFormat,
) -> Result<usize, RedistributeError> {
    let mut particles = Vec::new();
    let mut fields: BTreeMap<String, Field> = BTreeMap::new();
    let mut next_id = 0;

    for rank in 0..decomposition.n_ranks() {
        let proc_case = processor_dir(case, rank);
        let dir = cloud_dir(&proc_case, name);
        if !dir.exists() {
            continue;
        }
        let objects = read_objects(&dir)?;
        if rank == 0 {
            next_id = read_cloud_properties(&proc_case, name)?
                .get(&0)
                .copied()
                .unwrap_or(0);
        }

        let offset = particles.len();
        particles.extend(gather_particles(
            mesh,
            decomposition,
            rank,
            &objects.particles,
            settings,
        )?);
        for (field_name, field) in objects.fields {
            match fields.get_mut(&field_name) {
                Some(existing) => {
                    if !existing.extend(&field) {
                        return Err(RedistributeError::FieldKind { name: field_name });
                    }
                }
                None => {
                    if offset > 0 && !field.is_empty() {
                        return Err(RedistributeError::MissingField {
                            name: field_name,
                            len: field.len(),
                            expected: offset + field.len(),
                        });
                    }
                    let mut gathered = field.empty_like();
                    gathered.extend(&field);
                    fields.insert(field_name, gathered);
                }
            }
        }
    }

    for (field_name, field) in &fields {
        if field.len() != particles.len() {
            return Err(RedistributeError::MissingField {
                name: field_name.clone(),
                len: field.len(),
                expected: particles.len(),
            });
        }
    }

    let count = particles.len();
    let next = gathered_next_id(next_id, &particles);
    write_objects(&cloud_dir(case, name), particles, &fields, format)?;
    write_cloud_properties(case, name, &BTreeMap::from([(0, next)]))?;

    tracing::info!(
        "Reconstructed cloud '{}' ({} particles, {} fields) from {} ranks",
        name,
        count,
        fields.len(),
        decomposition.n_ranks()
    );
    Ok(count)
}
