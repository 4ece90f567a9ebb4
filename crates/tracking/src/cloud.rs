//! A named collection of particles on one mesh partition, and the per-step
//! move and transfer protocol.
//!
//! Each call to [`Cloud::move_particles`] runs rounds until no rank has
//! anything left to send:
//!
//! 1. every resident particle is moved until it completes the step, is
//!    removed, or reaches a processor patch;
//! 2. particles on processor patches are grouped by neighbour rank, encoded
//!    together with the neighbour's patch index and sent;
//! 3. the collective byte-count exchange decides whether another round is
//!    needed, and received particles are re-expressed on the local mesh.
//!
//! The number of rounds is capped by
//! [`TrackingSettings::max_transfer_rounds`]. Every rank sees the same count
//! matrix, so every rank hits the cap in the same round.

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::barycentric::Vector;
use crate::boundary::{TrackContext, TrackingData};
use crate::error::TrackingError;
use crate::io::wire;
use crate::mesh::{PatchKind, PolyMesh};
use crate::motion::Motion;
use crate::parcel::KinematicState;
use crate::particle::{LocateWarnings, Particle, ParticleId};
use crate::settings::TrackingSettings;
use crate::transport::Transport;
use crate::wall::WallInteraction;

const SMALL: f64 = 1e-15;
const ROOT_VSMALL: f64 = 1e-150;

/// Counters of one [`Cloud::move_particles`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveReport {
    /// Transfer rounds run.
    pub rounds: usize,
    /// Particles sent to other ranks.
    pub sent: usize,
    /// Particles received from other ranks.
    pub received: usize,
    /// Particles removed from the cloud, for any reason.
    pub deleted: usize,
    /// Particles removed because they could not be tracked or coupled.
    pub lost: usize,
    /// Mass of the lost particles.
    pub lost_mass: f64,
    /// Particles removed by the wall model.
    pub escaped: usize,
    /// Mass of the escaped particles.
    pub escaped_mass: f64,
    /// Sub-tracks abandoned after repeatedly ending behind.
    pub stuck: usize,
    /// Steps abandoned after repeated face hits without progress.
    pub stalled: usize,
}

impl MoveReport {
    /// Accumulate another rank's or step's counters. Rounds take the
    /// maximum.
    pub fn merge(&mut self, other: &MoveReport) {
        self.rounds = self.rounds.max(other.rounds);
        self.sent += other.sent;
        self.received += other.received;
        self.deleted += other.deleted;
        self.lost += other.lost;
        self.lost_mass += other.lost_mass;
        self.escaped += other.escaped;
        self.escaped_mass += other.escaped_mass;
        self.stuck += other.stuck;
        self.stalled += other.stalled;
    }
}

/// Cell correspondence across a topology change.
#[derive(Debug, Clone, Default)]
pub struct TopoChangeMap {
    /// New cell of every old cell, if it survived.
    pub reverse_cell_map: Vec<Option<usize>>,
}

/// Named, ordered collection of particles bound to one mesh partition.
#[derive(Debug, Clone)]
pub struct Cloud {
    name: String,
    particles: Vec<Particle>,
    next_id: u64,
    settings: TrackingSettings,
    wall: WallInteraction,
    locate_warnings: LocateWarnings,
}

impl Cloud {
    /// Empty cloud.
    pub fn new(name: impl Into<String>, settings: TrackingSettings) -> Self {
        Self {
            name: name.into(),
            particles: Vec::new(),
            next_id: 0,
            settings,
            wall: WallInteraction::default(),
            locate_warnings: LocateWarnings::default(),
        }
    }

    /// Set the wall model.
    pub fn with_wall_interaction(mut self, wall: WallInteraction) -> Self {
        self.wall = wall;
        self
    }

    /// Cloud name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tracking settings.
    pub fn settings(&self) -> &TrackingSettings {
        &self.settings
    }

    /// Wall model.
    pub fn wall_interaction(&self) -> &WallInteraction {
        &self.wall
    }

    /// Out-of-mesh placements warned about by this cloud.
    pub fn locate_warnings(&self) -> &LocateWarnings {
        &self.locate_warnings
    }

    /// Number of resident particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Whether the cloud has no particles.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Resident particles.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Resident particles, mutably.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Iterate over the resident particles.
    pub fn iter(&self) -> impl Iterator<Item = &Particle> {
        self.particles.iter()
    }

    /// Next sequence number to be minted.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Restore the sequence counter, never moving it backwards.
    pub fn set_next_id(&mut self, next: u64) {
        self.next_id = self.next_id.max(next);
    }

    /// Mint a fresh identity on the mesh's rank.
    pub fn mint_id(&mut self, mesh: &PolyMesh) -> ParticleId {
        let id = ParticleId {
            proc: mesh.rank(),
            id: self.next_id,
        };
        self.next_id += 1;
        id
    }

    /// Append a particle. Its identity is kept as is.
    pub fn add(&mut self, p: Particle) {
        self.particles.push(p);
    }

    /// Remove a particle by identity.
    pub fn remove(&mut self, id: ParticleId) -> Option<Particle> {
        let i = self.particles.iter().position(|p| p.id() == id)?;
        Some(self.particles.remove(i))
    }

    /// Remove every particle.
    pub fn clear(&mut self) {
        self.particles.clear();
    }

    /// Total mass represented by the cloud.
    pub fn total_mass(&self) -> f64 {
        self.particles.iter().map(Particle::mass).sum()
    }

    /// Create a particle at `position` and append it.
    ///
    /// # Arguments
    /// * `mesh` - Mesh partition of this cloud
    /// * `position` - Cartesian position
    /// * `cell` - Cell expected to contain the position, if known
    /// * `kinematic` - Parcel state to attach
    pub fn inject(
        &mut self,
        mesh: &PolyMesh,
        position: &Vector,
        cell: Option<usize>,
        kinematic: Option<KinematicState>,
    ) -> Result<ParticleId, TrackingError> {
        let id = self.mint_id(mesh);
        let mut p =
            Particle::placed(mesh, position, cell, id, &self.settings, &mut self.locate_warnings)?;
        p.kinematic = kinematic;
        self.particles.push(p);
        Ok(id)
    }

    /// Check that every coupled patch can be tracked through on this
    /// partition. AMI pairs must have both sides on the same rank.
    pub fn check_patches(&self, mesh: &PolyMesh) -> Result<(), TrackingError> {
        for pp in mesh.boundary() {
            let Some(ami) = pp.kind.ami() else { continue };
            let twin = &mesh.boundary()[ami.neighbour_patch];
            if pp.size > 0 && twin.size == 0 {
                return Err(TrackingError::UnsupportedPatch {
                    cloud: self.name.clone(),
                    patch: pp.name.clone(),
                    reason: format!(
                        "its twin '{}' is not on this rank; AMI pairs must not be decomposed",
                        twin.name
                    ),
                });
            }
        }
        Ok(())
    }

    /// Move every particle through one step of `delta_t`, exchanging
    /// particles with other ranks until none are left in transit.
    ///
    /// Particles that fail to track are removed and counted as lost. Only
    /// transport failures, corrupt transfers and the round limit fail the
    /// call.
    pub fn move_particles(
        &mut self,
        mesh: &PolyMesh,
        transport: &mut dyn Transport,
        motion: &dyn Motion,
        delta_t: f64,
    ) -> Result<MoveReport, TrackingError> {
        self.check_patches(mesh)?;

        let mut report = MoveReport::default();
        for p in &mut self.particles {
            p.reset();
        }

        let my_rank = transport.rank();
        loop {
            report.rounds += 1;
            if report.rounds > self.settings.max_transfer_rounds {
                tracing::error!(
                    "Cloud '{}' on rank {}: particle transfer still active after {} rounds",
                    self.name,
                    my_rank,
                    self.settings.max_transfer_rounds
                );
                return Err(TrackingError::TransferRoundLimit {
                    rounds: self.settings.max_transfer_rounds,
                });
            }

            let mut outgoing: BTreeMap<usize, (Vec<usize>, Vec<Particle>)> = BTreeMap::new();
            let resident = std::mem::take(&mut self.particles);
            let mut kept = Vec::with_capacity(resident.len());
            for mut p in resident {
                let mut td = TrackingData::default();
                let mut ctx = TrackContext {
                    mesh,
                    settings: &self.settings,
                    wall: &self.wall,
                    delta_t,
                    report: &mut report,
                    locate_warnings: &mut self.locate_warnings,
                };
                if let Err(e) = move_step(&mut p, motion, &mut ctx, &mut td) {
                    tracing::warn!("Removing particle {} from cloud '{}': {}", p.id(), self.name, e);
                    report.lost += 1;
                    report.lost_mass += p.mass();
                    report.deleted += 1;
                    continue;
                }
                if !td.keep_particle {
                    report.deleted += 1;
                    continue;
                }
                if td.switch_processor {
                    let coupling = p.patch(mesh).and_then(|patch| match &mesh.boundary()[patch].kind {
                        PatchKind::Processor(pc) => Some((pc.neighbour_rank, pc.neighbour_patch)),
                        _ => None,
                    });
                    let Some((rank, patch)) = coupling else {
                        tracing::warn!(
                            "Particle {} flagged for transfer off a processor patch; removing it",
                            p.id()
                        );
                        report.lost += 1;
                        report.lost_mass += p.mass();
                        report.deleted += 1;
                        continue;
                    };
                    p.prepare_for_parallel_transfer(mesh);
                    let entry = outgoing.entry(rank).or_default();
                    entry.0.push(patch);
                    entry.1.push(p);
                    continue;
                }
                kept.push(p);
            }
            self.particles = kept;

            if transport.n_ranks() == 1 {
                for (rank, (_, particles)) in outgoing {
                    for p in particles {
                        tracing::warn!(
                            "Particle {} of cloud '{}' reached a processor patch to rank {} \
                             on a single-rank run; removing it",
                            p.id(),
                            self.name,
                            rank
                        );
                        report.lost += 1;
                        report.lost_mass += p.mass();
                        report.deleted += 1;
                    }
                }
                break;
            }

            for (rank, (patches, particles)) in outgoing {
                report.sent += particles.len();
                transport.send(rank, wire::encode_transfer(&patches, &particles))?;
            }
            let all_n_trans = transport.finished_sends()?;
            if all_n_trans.iter().flatten().all(|&n| n == 0) {
                break;
            }

            for (from, row) in all_n_trans.iter().enumerate() {
                if row.get(my_rank).copied().unwrap_or(0) == 0 {
                    continue;
                }
                let bytes = transport.receive(from)?;
                let (patches, particles) = wire::decode_transfer(&bytes)?;
                for (patch, mut p) in patches.into_iter().zip(particles) {
                    p.correct_after_parallel_transfer(mesh, patch)?;
                    report.received += 1;
                    self.particles.push(p);
                }
            }
            tracing::debug!(
                "Cloud '{}' rank {}: round {} done, {} resident",
                self.name,
                my_rank,
                report.rounds,
                self.particles.len()
            );
        }

        Ok(report)
    }

    /// Cartesian positions of every particle, in order. Taken before a
    /// topology change for [`auto_map`](Self::auto_map).
    pub fn store_positions(&self, mesh: &PolyMesh) -> Vec<Vector> {
        self.particles.iter().map(|p| p.position(mesh)).collect()
    }

    /// Re-locate every particle on `new_mesh` after a topology change.
    /// Particles that end up outside the new mesh are removed.
    ///
    /// Returns the number of particles removed.
    pub fn auto_map(
        &mut self,
        new_mesh: &PolyMesh,
        positions: &[Vector],
        map: &TopoChangeMap,
    ) -> Result<usize, TrackingError> {
        if positions.len() != self.particles.len() {
            return Err(TrackingError::PositionCount {
                positions: positions.len(),
                particles: self.particles.len(),
            });
        }
        let particles = std::mem::take(&mut self.particles);
        let mut removed = 0;
        for (mut p, x) in particles.into_iter().zip(positions) {
            let cell = map.reverse_cell_map.get(p.cell()).copied().flatten();
            match p.relocate(new_mesh, x, cell, &self.settings) {
                Ok(()) => self.particles.push(p),
                Err(e) => {
                    tracing::warn!("Removing particle {} during mapping: {}", p.id(), e);
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Write particle positions as OBJ vertices.
    pub fn write_positions_obj(&self, mesh: &PolyMesh, out: &mut impl Write) -> std::io::Result<()> {
        for p in &self.particles {
            let x = p.position(mesh);
            writeln!(out, "v {} {} {}", x.x, x.y, x.z)?;
        }
        Ok(())
    }
}

/// Move one particle until it completes the step, is removed, or has to
/// change rank.
///
/// Each sub-track covers at most `max_co` of the step and of the cell length
/// scale. Inactive particles only advance in time.
pub(crate) fn move_step(
    p: &mut Particle,
    motion: &dyn Motion,
    ctx: &mut TrackContext<'_>,
    td: &mut TrackingData,
) -> Result<(), TrackingError> {
    let mesh = ctx.mesh;
    let max_co = ctx.settings.max_co;
    let mut stalled = 0;

    while td.keep_particle && !td.switch_processor && p.step_fraction < 1.0 {
        let sf0 = p.step_fraction;
        let s = motion.displacement(p, mesh, ctx.delta_t);
        let l = mesh.cell_length_scale(p.cell);

        let f = (1.0 - sf0)
            .min(max_co)
            .min(max_co * l / (SMALL * l).max(s.norm()));

        if p.active() {
            let (_, stuck) = p.track_to_face_checked(mesh, &(s * f), f, ctx.settings)?;
            if stuck {
                ctx.report.stuck += 1;
            }
        } else {
            p.step_fraction += f;
        }

        let dt = (p.step_fraction - sf0) * ctx.delta_t;
        if dt > ROOT_VSMALL {
            motion.advance(p, dt);
        }
        if let Some(k) = p.kinematic.as_mut() {
            k.age += dt;
        }

        if p.active() && p.on_face() {
            p.hit_face(&s, ctx, td)?;
        }

        if p.step_fraction > sf0 {
            stalled = 0;
        } else {
            stalled += 1;
            if stalled >= ctx.settings.max_stalled_hits {
                tracing::warn!(
                    "Particle {} made no progress in {} face hits at {:?}; ending its step",
                    p.id(),
                    stalled,
                    p.position(mesh).as_slice()
                );
                p.step_fraction = 1.0;
                ctx.report.stalled += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BoxMesh;
    use crate::motion::Convected;
    use crate::transport::SingleRank;

    fn cube(n: usize) -> PolyMesh {
        BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [n, n, n])
            .build()
            .unwrap()
    }

    #[test]
    fn test_mint_ids_are_unique() {
        let mesh = cube(1);
        let mut cloud = Cloud::new("c", TrackingSettings::default());
        let a = cloud.inject(&mesh, &Vector::new(0.5, 0.5, 0.5), None, None).unwrap();
        let b = cloud.inject(&mesh, &Vector::new(0.2, 0.5, 0.5), None, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(cloud.next_id(), 2);
        assert!(cloud.remove(a).is_some());
        assert_eq!(cloud.len(), 1);
    }

    #[test]
    fn test_locate_warnings_belong_to_their_cloud() {
        let mesh = cube(1);
        let mut a = Cloud::new("a", TrackingSettings::default());
        let b = Cloud::new("b", TrackingSettings::default());
        a.inject(&mesh, &Vector::new(1.2, 0.5, 0.5), Some(0), None).unwrap();
        a.inject(&mesh, &Vector::new(0.5, 0.5, 0.5), Some(0), None).unwrap();
        assert_eq!(a.locate_warnings().issued(), 1);
        assert_eq!(b.locate_warnings().issued(), 0);
        assert!(a.particles()[0].on_face());
    }

    #[test]
    fn test_single_rank_is_one_round() {
        let mesh = cube(3);
        let mut cloud = Cloud::new("c", TrackingSettings::default());
        for i in 0..5 {
            let x = Vector::new(0.1 + 0.15 * i as f64, 0.5, 0.5);
            cloud.inject(&mesh, &x, None, None).unwrap();
        }
        let motion = Convected {
            velocity: Vector::new(0.0, 0.3, 0.1),
        };
        let report = cloud
            .move_particles(&mesh, &mut SingleRank::new(), &motion, 1.0)
            .unwrap();
        assert_eq!(report.rounds, 1);
        assert_eq!(cloud.len(), 5);
        for p in cloud.iter() {
            assert_eq!(p.step_fraction(), 1.0);
        }
    }

    #[test]
    fn test_passive_wall_stall_is_bounded() {
        let mesh = cube(1);
        let mut cloud = Cloud::new("c", TrackingSettings::default());
        cloud.inject(&mesh, &Vector::new(0.9, 0.4, 0.3), None, None).unwrap();
        let motion = Convected {
            velocity: Vector::new(1.0, 0.0, 0.0),
        };
        let report = cloud
            .move_particles(&mesh, &mut SingleRank::new(), &motion, 1.0)
            .unwrap();
        assert_eq!(report.stalled, 1);
        assert_eq!(cloud.len(), 1);
        let x = cloud.particles()[0].position(&mesh);
        assert!((x.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_merge() {
        let mut a = MoveReport {
            rounds: 2,
            sent: 1,
            ..Default::default()
        };
        let b = MoveReport {
            rounds: 3,
            sent: 4,
            lost: 1,
            lost_mass: 0.5,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.rounds, 3);
        assert_eq!(a.sent, 5);
        assert_eq!(a.lost, 1);
        assert_eq!(a.lost_mass, 0.5);
    }

    #[test]
    fn test_write_positions_obj() {
        let mesh = cube(1);
        let mut cloud = Cloud::new("c", TrackingSettings::default());
        cloud.inject(&mesh, &Vector::new(0.5, 0.25, 0.75), None, None).unwrap();
        let mut out = Vec::new();
        cloud.write_positions_obj(&mesh, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("v "));
        let values: Vec<f64> = text[2..]
            .split_whitespace()
            .map(|t| t.parse().unwrap())
            .collect();
        assert!((values[0] - 0.5).abs() < 1e-12);
        assert!((values[1] - 0.25).abs() < 1e-12);
        assert!((values[2] - 0.75).abs() < 1e-12);
    }
}
