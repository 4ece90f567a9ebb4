//! Tracking through tets, faces and cells.
//!
//! A sub-track in one tet solves for the first of its four triangles that the
//! displacement crosses, using the unnormalised reverse transform so that
//! degenerate and inverted tets never cause a division by zero. Crossings of
//! internal tet triangles hand over to the adjacent tet with
//! [`change_tet`](Particle::change_tet) until a face of the cell is reached.
//!
//! Inverted tets can make a sub-track end behind where it started. Such
//! sub-tracks are counted, and after `max_n_behind` of them in a row the
//! track is abandoned for the rest of the step. The threshold is a tuned
//! tolerance, not a termination proof.

use crate::barycentric::{Barycentric, Vector};
use crate::cubic::CubicEqn;
use crate::error::TrackingError;
use crate::mesh::PolyMesh;
use crate::settings::TrackingSettings;

use super::Particle;

const SMALL: f64 = 1e-15;

impl Particle {
    /// Track along `displacement` for `fraction` of the step, crossing
    /// internal faces, until the displacement is used up or a boundary face
    /// is hit.
    ///
    /// Returns the unconsumed proportion of the displacement: zero when the
    /// track completed, positive when it stopped on a boundary face.
    pub fn track(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
        settings: &TrackingSettings,
    ) -> Result<f64, TrackingError> {
        let mut f = self.track_to_face(mesh, displacement, fraction, settings)?;
        while self.on_internal_face(mesh) {
            self.change_cell(mesh);
            f *= self.track_to_face(mesh, &(displacement * f), fraction * f, settings)?;
        }
        Ok(f)
    }

    /// Track until the cell is left or the displacement is used up. On an
    /// internal face the particle moves into the neighbouring cell.
    pub fn track_to_cell(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
        settings: &TrackingSettings,
    ) -> Result<f64, TrackingError> {
        let f = self.track_to_face(mesh, displacement, fraction, settings)?;
        if self.on_internal_face(mesh) {
            self.change_cell(mesh);
        }
        Ok(f)
    }

    /// Track within the current cell until one of its faces is hit or the
    /// displacement is used up.
    pub fn track_to_face(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
        settings: &TrackingSettings,
    ) -> Result<f64, TrackingError> {
        self.track_to_face_checked(mesh, displacement, fraction, settings)
            .map(|(f, _)| f)
    }

    /// As [`track_to_face`](Self::track_to_face), also reporting whether the
    /// track was abandoned because it kept ending behind.
    pub(crate) fn track_to_face_checked(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
        settings: &TrackingSettings,
    ) -> Result<(f64, bool), TrackingError> {
        let mut f = 1.0;
        self.face = None;

        while self.n_behind < settings.max_n_behind {
            let (g, tri) = self.track_to_tri(mesh, &(displacement * f), fraction * f)?;
            f *= g;
            match tri {
                None => return Ok((0.0, false)),
                Some(0) => {
                    self.face = Some(self.tet_face);
                    return Ok((f, false));
                }
                Some(tri) => self.change_tet(mesh, tri)?,
            }
        }

        tracing::warn!(
            "Particle {} got stuck at {:?} in cell {}, tet face {}, tet point {}; \
             abandoning the remaining {:.3e} of the step",
            self.id(),
            self.position(mesh).as_slice(),
            self.cell,
            self.tet_face,
            self.tet_pt,
            f * fraction
        );
        self.step_fraction += f * fraction;
        self.behind = 0.0;
        self.n_behind = 0;
        Ok((0.0, true))
    }

    /// Track within the current tet. Returns the unconsumed proportion and the
    /// triangle hit (0 is the face triangle, 1 to 3 are internal), or `None`
    /// when the displacement ended inside the tet.
    pub fn track_to_tri(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
    ) -> Result<(f64, Option<usize>), TrackingError> {
        if mesh.moving() {
            self.track_to_moving_tri(mesh, displacement, fraction)
        } else {
            Ok(self.track_to_stationary_tri(mesh, displacement, fraction))
        }
    }

    /// Sub-track within the current tet of a static mesh.
    pub fn track_to_stationary_tri(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
    ) -> (f64, Option<usize>) {
        if displacement.norm_squared() == 0.0 {
            self.step_fraction += fraction;
            return (0.0, None);
        }

        let y0 = self.coordinates;
        let rev = self.tet_indices().stationary_reverse_transform(mesh);
        let det_a = rev.det_a;
        let tx1 = rev.t.apply(displacement);

        let mut hit = None;
        let mut mu_h = if det_a.is_normal() && det_a > 0.0 {
            1.0 / det_a
        } else {
            f64::MAX
        };
        for i in 0..4 {
            if tx1[i] < -det_a * SMALL {
                // A weight already at or below zero and falling is hit at once
                let mu = (-y0[i] / tx1[i]).max(0.0);
                if (0.0..mu_h).contains(&mu) {
                    hit = Some(i);
                    mu_h = mu;
                }
            }
        }

        let mut y_h = y0 + tx1 * mu_h;
        if let Some(i) = hit {
            y_h[i] = 0.0;
        }
        self.coordinates = y_h;

        self.advance(mu_h, det_a, fraction, displacement);
        (if hit.is_some() { 1.0 - mu_h * det_a } else { 0.0 }, hit)
    }

    /// Sub-track within the current tet of a moving mesh. The tet vertices
    /// move linearly over the sub-track, so the hit conditions are cubics in
    /// the sub-track fraction.
    pub fn track_to_moving_tri(
        &mut self,
        mesh: &PolyMesh,
        displacement: &Vector,
        fraction: f64,
    ) -> Result<(f64, Option<usize>), TrackingError> {
        let x0 = self.position(mesh);
        let y0 = self.coordinates;
        let (start, span) = self.moving_fractions(mesh, fraction);
        let rev = self.tet_indices().moving_reverse_transform(mesh, start, span);
        let det_a = rev.det_a;
        let t = rev.t;

        let x0_rel = x0 - rev.centre[0];
        let x1_rel = displacement - rev.centre[1];

        let det_a_eqn = CubicEqn::new(det_a[0] * det_a[0] * det_a[3], det_a[0] * det_a[2], det_a[1], 1.0);
        let y_c = Barycentric::CENTRE;
        let eqn_a = (t[2].apply(&x1_rel) + y_c * det_a[3]) * (det_a[0] * det_a[0]);
        let eqn_b = (t[1].apply(&x1_rel) + t[2].apply(&x0_rel) + y_c * det_a[2]) * det_a[0];
        let eqn_c = t[0].apply(&x1_rel) + t[1].apply(&x0_rel) + y_c * det_a[1];
        let hit_eqn: [CubicEqn; 4] =
            std::array::from_fn(|i| CubicEqn::new(eqn_a[i], eqn_b[i], eqn_c[i], y0[i]));

        let mut hit = None;
        let mut mu_h = if det_a[0].is_normal() && det_a[0] > 0.0 {
            1.0 / det_a[0]
        } else {
            f64::MAX
        };
        for (i, eqn) in hit_eqn.iter().enumerate() {
            let immediate = (y0[i] <= 0.0).then_some(0.0);
            for mu in eqn.roots().into_iter().chain(immediate) {
                if eqn.derivative(mu) < -det_a[0] * SMALL && (0.0..mu_h).contains(&mu) {
                    hit = Some(i);
                    mu_h = mu;
                }
            }
        }

        let det_a_h = det_a_eqn.value(mu_h);
        if !det_a_h.is_normal() {
            return Err(TrackingError::CollapsedTet {
                origin_proc: self.origin_proc,
                origin_id: self.origin_id,
            });
        }
        let mut y_h = Barycentric(std::array::from_fn(|i| hit_eqn[i].value(mu_h) / det_a_h));
        if let Some(i) = hit {
            y_h[i] = 0.0;
        }
        self.coordinates = y_h;

        self.advance(mu_h, det_a[0], fraction, displacement);
        Ok((if hit.is_some() { 1.0 - mu_h * det_a[0] } else { 0.0 }, hit))
    }

    /// Book-keep a sub-track that covered `mu * det_a` of its displacement.
    fn advance(&mut self, mu: f64, det_a: f64, fraction: f64, displacement: &Vector) {
        let advance = mu * det_a;
        self.step_fraction += fraction * advance;

        if det_a <= 0.0 || self.n_behind > 0 {
            self.behind += advance * displacement.norm();
            if self.behind > 0.0 {
                self.behind = 0.0;
                self.n_behind = 0;
            } else {
                self.n_behind += 1;
            }
        }
    }
}
