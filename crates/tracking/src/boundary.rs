//! Face interactions.
//!
//! When a sub-track ends on a face, [`Particle::hit_face`] either moves the
//! particle into the neighbouring cell (internal faces) or dispatches on the
//! kind of the boundary patch. The set of patch kinds is closed; kinds with no
//! handler remove the particle.

use nalgebra::Matrix3;

use crate::barycentric::Vector;
use crate::cloud::MoveReport;
use crate::error::TrackingError;
use crate::mesh::{AcmiCoupling, AmiCoupling, CyclicCoupling, PatchKind, PolyMesh};
use crate::particle::{LocateWarnings, OnBoundary, Particle};
use crate::settings::TrackingSettings;
use crate::wall::WallInteraction;

/// Per-move flags set by face interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingData {
    /// False once the particle is to be removed.
    pub keep_particle: bool,
    /// True once the particle is to be sent across a processor patch.
    pub switch_processor: bool,
}

impl Default for TrackingData {
    fn default() -> Self {
        Self {
            keep_particle: true,
            switch_processor: false,
        }
    }
}

/// Everything a face interaction may consult or record.
pub struct TrackContext<'a> {
    /// Mesh being tracked through.
    pub mesh: &'a PolyMesh,
    /// Tracking limits.
    pub settings: &'a TrackingSettings,
    /// Wall model of the cloud.
    pub wall: &'a WallInteraction,
    /// Duration of the step.
    pub delta_t: f64,
    /// Counters of the current move.
    pub report: &'a mut MoveReport,
    /// Throttle of the cloud's out-of-mesh warnings.
    pub locate_warnings: &'a mut LocateWarnings,
}

impl Particle {
    /// Interact with the face the particle sits on. Does nothing for a
    /// particle inside its cell.
    ///
    /// # Arguments
    /// * `direction` - Displacement of the step, used to search coupled faces
    /// * `ctx` - Mesh, models and counters of the move
    /// * `td` - Flags for the owning cloud
    pub fn hit_face(
        &mut self,
        direction: &Vector,
        ctx: &mut TrackContext<'_>,
        td: &mut TrackingData,
    ) -> Result<(), TrackingError> {
        if !self.on_face() {
            return Ok(());
        }
        if self.on_internal_face(ctx.mesh) {
            self.change_cell(ctx.mesh);
            return Ok(());
        }
        self.change_to_master_patch(ctx.mesh);
        match self.patch(ctx.mesh) {
            Some(patch) => self.hit_patch(patch, direction, ctx, td),
            None => Ok(()),
        }
    }

    /// Dispatch on the kind of boundary patch `patch`.
    fn hit_patch(
        &mut self,
        patch: usize,
        direction: &Vector,
        ctx: &mut TrackContext<'_>,
        td: &mut TrackingData,
    ) -> Result<(), TrackingError> {
        let mesh = ctx.mesh;
        let pp = &mesh.boundary()[patch];
        match &pp.kind {
            PatchKind::Wedge | PatchKind::Symmetry => {
                self.hit_symmetry_patch(mesh);
                Ok(())
            }
            PatchKind::Cyclic(cyc) => {
                self.hit_cyclic_patch(mesh, patch, cyc);
                Ok(())
            }
            PatchKind::CyclicAmi(ami) => self.hit_cyclic_ami_patch(patch, ami, direction, ctx, td),
            PatchKind::CyclicAcmi(acmi) => {
                self.hit_cyclic_acmi_patch(patch, acmi, direction, ctx, td)
            }
            PatchKind::Processor(_) => {
                td.switch_processor = true;
                Ok(())
            }
            PatchKind::Wall => {
                ctx.wall.apply(self, mesh, ctx.delta_t, td, ctx.report);
                Ok(())
            }
            PatchKind::Generic(type_name) => {
                tracing::warn!(
                    "Particle {} reached patch '{}' of unsupported type '{}'; removing it",
                    self.id(),
                    pp.name,
                    type_name
                );
                self.mark_lost(td, ctx.report);
                Ok(())
            }
        }
    }

    /// Mirror vector properties in the plane of the face.
    fn hit_symmetry_patch(&mut self, mesh: &PolyMesh) {
        let n = self.normal(mesh);
        let t = Matrix3::identity() - 2.0 * n * n.transpose();
        self.transform_properties(&t);
    }

    /// Jump to the twin face of a conformal cyclic pair.
    fn hit_cyclic_patch(&mut self, mesh: &PolyMesh, patch: usize, cyc: &CyclicCoupling) {
        let Some(face) = self.face else { return };
        let local = mesh.boundary()[patch].which_face(face);
        let receive = &mesh.boundary()[cyc.neighbour_patch];
        self.cross_to_twin_face(mesh, receive.start + local);
        self.transform_across(&cyc.transform, local);
    }

    /// Search the twin patch for the receiving face and re-locate there.
    fn hit_cyclic_ami_patch(
        &mut self,
        patch: usize,
        ami: &AmiCoupling,
        direction: &Vector,
        ctx: &mut TrackContext<'_>,
        td: &mut TrackingData,
    ) -> Result<(), TrackingError> {
        let mesh = ctx.mesh;
        let Some(face) = self.face else { return Ok(()) };
        let pp = &mesh.boundary()[patch];
        let send = pp.which_face(face);
        let position = self.position(mesh);

        let Some((receive, hit)) = mesh.ami_point_face(patch, send, &position, direction) else {
            tracing::warn!(
                "Particle {} at {:?} on patch '{}' found no receiving face on the other side; \
                 removing it",
                self.id(),
                position.as_slice(),
                pp.name
            );
            self.mark_lost(td, ctx.report);
            return Ok(());
        };

        let receive_face = mesh.boundary()[ami.neighbour_patch].start + receive;
        self.tet_face = receive_face;
        self.face = Some(receive_face);
        self.locate(
            mesh,
            &hit,
            Some(mesh.face_owner()[receive_face]),
            OnBoundary::Warn(&mut *ctx.locate_warnings),
            "Particle crossed between cyclic AMI patches to a location outside of the mesh",
            ctx.settings,
        )?;
        // Still on a face so that the move registers as incomplete
        self.face = Some(self.tet_face);

        self.transform_across(&ami.transform, send);
        Ok(())
    }

    /// Route through the coupled or the uncoupled part of an ACMI face.
    fn hit_cyclic_acmi_patch(
        &mut self,
        patch: usize,
        acmi: &AcmiCoupling,
        direction: &Vector,
        ctx: &mut TrackContext<'_>,
        td: &mut TrackingData,
    ) -> Result<(), TrackingError> {
        let mesh = ctx.mesh;
        let Some(face) = self.face else { return Ok(()) };
        let local = mesh.boundary()[patch].which_face(face);
        let mask = acmi.mask.get(local).copied().unwrap_or(0.0);

        let couple = if mask >= 1.0 - acmi.tolerance {
            true
        } else if mask <= acmi.tolerance {
            false
        } else {
            let position = self.position(mesh);
            mesh.ami_point_face(patch, local, &position, direction).is_some()
        };

        if couple {
            return self.hit_cyclic_ami_patch(patch, &acmi.ami, direction, ctx, td);
        }

        // Re-dispatch on the non-overlap twin directly. Resolving the master
        // patch again would lead straight back here.
        let non_overlap = acmi.non_overlap_patch;
        let shadow = mesh.boundary()[non_overlap].start + local;
        self.face = Some(shadow);
        self.tet_face = shadow;
        self.hit_patch(non_overlap, direction, ctx, td)
    }

    /// Rotate or translate properties across a coupled transform.
    fn transform_across(&mut self, transform: &crate::mesh::CoupledTransform, face: usize) {
        if let Some(r) = transform.rotation_tensor(face) {
            self.transform_properties(&r);
        } else if let Some(s) = transform.separation(face) {
            self.translate_properties(&s);
        }
    }

    fn mark_lost(&mut self, td: &mut TrackingData, report: &mut MoveReport) {
        td.keep_particle = false;
        report.lost += 1;
        report.lost_mass += self.mass();
    }
}
