//! Fixed-layout particle records.
//!
//! Binary streams are a `u64` particle count followed by one block per
//! particle: a [`ParticleRecord`], then (when components are included) a
//! `u64` component flags word and the records of the flagged components in
//! key order. Records are `#[repr(C)]` with 8-byte fields only, so the bytes
//! are the in-memory representation and decode bit-for-bit.
//!
//! ASCII streams carry the same fields as text, one particle per line:
//!
//! ```text
//! 2
//! (
//! (0.25 0.25 0.25 0.25) 0 1 1 -1 0 0 0 0 0 1 1 -1 1 0.001 1000 (1 0 0) 0
//! (1 0 0 0) 3 7 2 7 0.5 0 0 0 1 0
//! )
//! ```
//!
//! Floats are written in their shortest round-trip form. Records with a cell
//! of `-1` are lost particles; they are dropped with a warning on read.

use bytemuck::{Pod, Zeroable};

use crate::barycentric::{Barycentric, Vector};
use crate::error::WireError;
use crate::io::WriteFormat;
use crate::parcel::{CollisionState, ComponentKey, KinematicState};
use crate::particle::Particle;

/// Tracked state of one particle.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    /// Barycentric coordinates.
    pub coordinates: [f64; 4],
    /// Cell, or -1 for a lost particle.
    pub cell: i64,
    /// Face of the tet.
    pub tet_face: i64,
    /// Triangle of the tet within its face.
    pub tet_pt: i64,
    /// Face the particle sits on, or -1.
    pub face: i64,
    /// Completed fraction of the step.
    pub step_fraction: f64,
    /// Distance tracked behind.
    pub behind: f64,
    /// Consecutive sub-tracks behind.
    pub n_behind: i64,
    /// Originating rank.
    pub origin_proc: i64,
    /// Sequence number on the originating rank.
    pub origin_id: i64,
}

/// Kinematic component record.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct KinematicRecord {
    /// 1 if active.
    pub active: i64,
    /// User type id.
    pub type_id: i64,
    /// Particles per parcel.
    pub n_particle: f64,
    /// Diameter.
    pub diameter: f64,
    /// Density.
    pub density: f64,
    /// Velocity.
    pub velocity: [f64; 3],
    /// Age.
    pub age: f64,
}

/// Collision component record.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct CollisionRecord {
    /// Contact force.
    pub force: [f64; 3],
    /// Angular momentum.
    pub angular_momentum: [f64; 3],
    /// Torque.
    pub torque: [f64; 3],
}

fn to_array(v: &Vector) -> [f64; 3] {
    [v.x, v.y, v.z]
}

fn to_vector(a: [f64; 3]) -> Vector {
    Vector::new(a[0], a[1], a[2])
}

impl ParticleRecord {
    /// Record of a particle's tracked state.
    pub fn from_particle(p: &Particle) -> Self {
        Self {
            coordinates: p.coordinates.0,
            cell: p.cell as i64,
            tet_face: p.tet_face as i64,
            tet_pt: p.tet_pt as i64,
            face: p.face.map_or(-1, |f| f as i64),
            step_fraction: p.step_fraction,
            behind: p.behind,
            n_behind: i64::from(p.n_behind),
            origin_proc: p.origin_proc as i64,
            origin_id: p.origin_id as i64,
        }
    }

    /// Particle with this tracked state, or `None` for a lost record.
    pub fn to_particle(&self) -> Option<Particle> {
        if self.cell < 0 {
            return None;
        }
        Some(Particle {
            coordinates: Barycentric(self.coordinates),
            cell: self.cell as usize,
            tet_face: self.tet_face.max(0) as usize,
            tet_pt: self.tet_pt.max(0) as usize,
            face: usize::try_from(self.face).ok(),
            step_fraction: self.step_fraction,
            behind: self.behind,
            n_behind: self.n_behind.max(0) as u32,
            origin_proc: self.origin_proc.max(0) as usize,
            origin_id: self.origin_id.max(0) as u64,
            kinematic: None,
            collision: None,
        })
    }
}

impl From<&KinematicState> for KinematicRecord {
    fn from(k: &KinematicState) -> Self {
        Self {
            active: i64::from(k.active),
            type_id: k.type_id,
            n_particle: k.n_particle,
            diameter: k.diameter,
            density: k.density,
            velocity: to_array(&k.velocity),
            age: k.age,
        }
    }
}

impl From<KinematicRecord> for KinematicState {
    fn from(r: KinematicRecord) -> Self {
        Self {
            active: r.active != 0,
            type_id: r.type_id,
            n_particle: r.n_particle,
            diameter: r.diameter,
            density: r.density,
            velocity: to_vector(r.velocity),
            age: r.age,
        }
    }
}

impl From<&CollisionState> for CollisionRecord {
    fn from(c: &CollisionState) -> Self {
        Self {
            force: to_array(&c.force),
            angular_momentum: to_array(&c.angular_momentum),
            torque: to_array(&c.torque),
        }
    }
}

impl From<CollisionRecord> for CollisionState {
    fn from(r: CollisionRecord) -> Self {
        Self {
            force: to_vector(r.force),
            angular_momentum: to_vector(r.angular_momentum),
            torque: to_vector(r.torque),
        }
    }
}

/// Component flags word of a particle.
pub fn component_flags(p: &Particle) -> u64 {
    let mut flags = 0;
    if p.kinematic.is_some() {
        flags |= ComponentKey::Kinematic.bit();
    }
    if p.collision.is_some() {
        flags |= ComponentKey::Collision.bit();
    }
    flags
}

const KNOWN_FLAGS: u64 = 0b11;

// ---------------------------------------------------------------------------
// Binary
// ---------------------------------------------------------------------------

/// Bounds-checked reader over a byte stream.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        let available = self.bytes.len() - self.pos;
        if n > available {
            return Err(WireError::Truncated {
                what,
                needed: n,
                available,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read<T: Pod>(&mut self, what: &'static str) -> Result<T, WireError> {
        let bytes = self.take(std::mem::size_of::<T>(), what)?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

fn write_binary_particle(out: &mut Vec<u8>, p: &Particle, components: bool) {
    out.extend_from_slice(bytemuck::bytes_of(&ParticleRecord::from_particle(p)));
    if !components {
        return;
    }
    out.extend_from_slice(bytemuck::bytes_of(&component_flags(p)));
    if let Some(k) = &p.kinematic {
        out.extend_from_slice(bytemuck::bytes_of(&KinematicRecord::from(k)));
    }
    if let Some(c) = &p.collision {
        out.extend_from_slice(bytemuck::bytes_of(&CollisionRecord::from(c)));
    }
}

fn read_binary_particle(r: &mut Reader<'_>, components: bool) -> Result<Option<Particle>, WireError> {
    let record: ParticleRecord = r.read("particle record")?;
    let mut kinematic = None;
    let mut collision = None;
    if components {
        let flags: u64 = r.read("component flags")?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(WireError::UnknownComponent(flags & !KNOWN_FLAGS));
        }
        if flags & ComponentKey::Kinematic.bit() != 0 {
            kinematic = Some(KinematicState::from(r.read::<KinematicRecord>("kinematic record")?));
        }
        if flags & ComponentKey::Collision.bit() != 0 {
            collision = Some(CollisionState::from(r.read::<CollisionRecord>("collision record")?));
        }
    }
    Ok(record.to_particle().map(|mut p| {
        p.kinematic = kinematic;
        p.collision = collision;
        p
    }))
}

/// Encode particles as a binary stream.
pub fn encode_binary(particles: &[Particle], components: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + particles.len() * std::mem::size_of::<ParticleRecord>());
    out.extend_from_slice(bytemuck::bytes_of(&(particles.len() as u64)));
    for p in particles {
        write_binary_particle(&mut out, p, components);
    }
    out
}

fn read_binary_stream(
    r: &mut Reader<'_>,
    components: bool,
) -> Result<Vec<Option<Particle>>, WireError> {
    let n: u64 = r.read("particle count")?;
    (0..n).map(|_| read_binary_particle(r, components)).collect()
}

/// Decode a binary stream, dropping lost records.
pub fn decode_binary(bytes: &[u8], components: bool) -> Result<Vec<Particle>, WireError> {
    let mut r = Reader::new(bytes);
    let records = read_binary_stream(&mut r, components)?;
    Ok(drop_lost(records))
}

fn drop_lost(records: Vec<Option<Particle>>) -> Vec<Particle> {
    let n = records.len();
    let particles: Vec<Particle> = records.into_iter().flatten().collect();
    if particles.len() < n {
        tracing::warn!("Dropped {} lost particle records", n - particles.len());
    }
    particles
}

// ---------------------------------------------------------------------------
// ASCII
// ---------------------------------------------------------------------------

fn write_ascii_particle(out: &mut String, p: &Particle, components: bool) {
    use std::fmt::Write;

    let r = ParticleRecord::from_particle(p);
    let c = r.coordinates;
    // Writing into a String cannot fail
    let _ = write!(
        out,
        "({} {} {} {}) {} {} {} {} {} {} {} {} {}",
        c[0],
        c[1],
        c[2],
        c[3],
        r.cell,
        r.tet_face,
        r.tet_pt,
        r.face,
        r.step_fraction,
        r.behind,
        r.n_behind,
        r.origin_proc,
        r.origin_id
    );
    if components {
        let _ = write!(out, " {}", component_flags(p));
        if let Some(k) = &p.kinematic {
            let _ = write!(
                out,
                " {} {} {} {} {} ({} {} {}) {}",
                i64::from(k.active),
                k.type_id,
                k.n_particle,
                k.diameter,
                k.density,
                k.velocity.x,
                k.velocity.y,
                k.velocity.z,
                k.age
            );
        }
        if let Some(col) = &p.collision {
            for v in [&col.force, &col.angular_momentum, &col.torque] {
                let _ = write!(out, " ({} {} {})", v.x, v.y, v.z);
            }
        }
    }
    out.push('\n');
}

/// Encode particles as an ASCII list.
pub fn encode_ascii(particles: &[Particle], components: bool) -> String {
    let mut out = format!("{}\n(\n", particles.len());
    for p in particles {
        write_ascii_particle(&mut out, p, components);
    }
    out.push_str(")\n");
    out
}

/// Tokens of one ASCII line with list parentheses stripped.
struct Tokens<'a> {
    iter: std::vec::IntoIter<&'a str>,
    line: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        let tokens: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            iter: tokens.into_iter(),
            line,
        }
    }

    fn next<T: std::str::FromStr>(&mut self, what: &str) -> Result<T, WireError> {
        let token = self.iter.next().ok_or_else(|| WireError::Malformed {
            position: self.line,
            reason: format!("missing {}", what),
        })?;
        token.parse().map_err(|_| WireError::Malformed {
            position: self.line,
            reason: format!("cannot parse {} from '{}'", what, token),
        })
    }

    fn vector(&mut self, what: &str) -> Result<Vector, WireError> {
        Ok(Vector::new(self.next(what)?, self.next(what)?, self.next(what)?))
    }
}

fn read_ascii_particle(text: &str, line: usize, components: bool) -> Result<Option<Particle>, WireError> {
    let mut t = Tokens::new(text, line);
    let record = ParticleRecord {
        coordinates: [
            t.next("coordinate")?,
            t.next("coordinate")?,
            t.next("coordinate")?,
            t.next("coordinate")?,
        ],
        cell: t.next("cell")?,
        tet_face: t.next("tet face")?,
        tet_pt: t.next("tet point")?,
        face: t.next("face")?,
        step_fraction: t.next("step fraction")?,
        behind: t.next("behind")?,
        n_behind: t.next("behind count")?,
        origin_proc: t.next("origin processor")?,
        origin_id: t.next("origin id")?,
    };

    let mut kinematic = None;
    let mut collision = None;
    if components {
        let flags: u64 = t.next("component flags")?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(WireError::UnknownComponent(flags & !KNOWN_FLAGS));
        }
        if flags & ComponentKey::Kinematic.bit() != 0 {
            kinematic = Some(KinematicState {
                active: t.next::<i64>("active")? != 0,
                type_id: t.next("type id")?,
                n_particle: t.next("particle count")?,
                diameter: t.next("diameter")?,
                density: t.next("density")?,
                velocity: t.vector("velocity")?,
                age: t.next("age")?,
            });
        }
        if flags & ComponentKey::Collision.bit() != 0 {
            collision = Some(CollisionState {
                force: t.vector("force")?,
                angular_momentum: t.vector("angular momentum")?,
                torque: t.vector("torque")?,
            });
        }
    }
    Ok(record.to_particle().map(|mut p| {
        p.kinematic = kinematic;
        p.collision = collision;
        p
    }))
}

/// Decode an ASCII list, dropping lost records.
pub fn decode_ascii(text: &str, components: bool) -> Result<Vec<Particle>, WireError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let malformed = |position: usize, reason: &str| WireError::Malformed {
        position,
        reason: reason.to_string(),
    };

    let (line, count) = lines.next().ok_or_else(|| malformed(0, "empty particle list"))?;
    let count: usize = count
        .parse()
        .map_err(|_| malformed(line, "expected particle count"))?;
    match lines.next() {
        Some((_, "(")) => {}
        Some((line, _)) => return Err(malformed(line, "expected '('")),
        None => return Err(malformed(line, "missing particle list")),
    }

    // The count is untrusted, so the list grows as records are read
    let mut records = Vec::new();
    for _ in 0..count {
        let (line, text) = lines
            .next()
            .ok_or_else(|| malformed(line, "particle list shorter than its count"))?;
        records.push(read_ascii_particle(text, line, components)?);
    }
    match lines.next() {
        Some((_, ")")) => {}
        Some((line, _)) => return Err(malformed(line, "expected ')'")),
        None => return Err(malformed(line, "unterminated particle list")),
    }
    Ok(drop_lost(records))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Encode particles with all attached components.
pub fn encode(particles: &[Particle], format: WriteFormat) -> Vec<u8> {
    match format {
        WriteFormat::Ascii => encode_ascii(particles, true).into_bytes(),
        WriteFormat::Binary => encode_binary(particles, true),
    }
}

/// Decode particles with all attached components.
pub fn decode(bytes: &[u8], format: WriteFormat) -> Result<Vec<Particle>, WireError> {
    match format {
        WriteFormat::Ascii => {
            let text = std::str::from_utf8(bytes).map_err(|e| WireError::Malformed {
                position: 0,
                reason: e.to_string(),
            })?;
            decode_ascii(text, true)
        }
        WriteFormat::Binary => decode_binary(bytes, true),
    }
}

// ---------------------------------------------------------------------------
// Transfer messages
// ---------------------------------------------------------------------------

/// Encode a transfer message: the receiving patch of every particle, then
/// the particles with their components.
pub fn encode_transfer(patches: &[usize], particles: &[Particle]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(bytemuck::bytes_of(&(patches.len() as u64)));
    for &patch in patches {
        out.extend_from_slice(bytemuck::bytes_of(&(patch as u64)));
    }
    out.extend_from_slice(&encode_binary(particles, true));
    out
}

/// Decode a transfer message into receiving patches and particles.
pub fn decode_transfer(bytes: &[u8]) -> Result<(Vec<usize>, Vec<Particle>), WireError> {
    let mut r = Reader::new(bytes);
    let n: u64 = r.read("patch count")?;
    let patches = (0..n)
        .map(|_| r.read::<u64>("patch index").map(|p| p as usize))
        .collect::<Result<Vec<_>, _>>()?;
    let records = read_binary_stream(&mut r, true)?;
    if records.len() != patches.len() {
        return Err(WireError::Malformed {
            position: 0,
            reason: format!("{} patches for {} particles", patches.len(), records.len()),
        });
    }
    if !r.rest().is_empty() {
        return Err(WireError::Malformed {
            position: r.pos,
            reason: "trailing bytes after transfer".into(),
        });
    }

    let mut kept_patches = Vec::with_capacity(patches.len());
    let mut particles = Vec::with_capacity(patches.len());
    for (patch, record) in patches.into_iter().zip(records) {
        match record {
            Some(p) => {
                kept_patches.push(patch);
                particles.push(p);
            }
            None => tracing::warn!("Dropped lost particle record from transfer"),
        }
    }
    Ok((kept_patches, particles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleId;

    fn sample() -> Vec<Particle> {
        let mut a = Particle::from_components(
            Barycentric([0.1, 0.2, 0.3, 0.4]),
            3,
            7,
            2,
            ParticleId { proc: 1, id: 42 },
        );
        a.face = Some(7);
        a.step_fraction = 1.0 / 3.0;
        a.behind = -1e-17;
        a.n_behind = 2;
        let a = a
            .with_kinematic(KinematicState::new(Vector::new(0.1, -2.5, 1e-9), 1e-4, 998.2))
            .with_collision(CollisionState {
                force: Vector::new(1.0, 2.0, 3.0),
                angular_momentum: Vector::new(-1.0, 0.0, 0.5),
                torque: Vector::new(0.0, 0.0, 7.25),
            });
        let b = Particle::from_components(Barycentric::CENTRE, 0, 0, 1, ParticleId { proc: 0, id: 0 });
        vec![a, b]
    }

    fn assert_same(a: &Particle, b: &Particle) {
        assert_eq!(ParticleRecord::from_particle(a), ParticleRecord::from_particle(b));
        assert_eq!(a.kinematic, b.kinematic);
        assert_eq!(a.collision, b.collision);
    }

    #[test]
    fn test_record_size() {
        assert_eq!(std::mem::size_of::<ParticleRecord>(), 104);
        assert_eq!(std::mem::size_of::<KinematicRecord>(), 72);
        assert_eq!(std::mem::size_of::<CollisionRecord>(), 72);
    }

    #[test]
    fn test_binary_is_exact() {
        let ps = sample();
        let back = decode(&encode(&ps, WriteFormat::Binary), WriteFormat::Binary).unwrap();
        assert_eq!(back.len(), 2);
        for (a, b) in ps.iter().zip(&back) {
            assert_same(a, b);
        }
    }

    #[test]
    fn test_ascii_round_trips_values() {
        let ps = sample();
        let text = encode_ascii(&ps, true);
        assert!(text.starts_with("2\n(\n(0.1 0.2 0.3 0.4) 3 7 2 7 "));
        let back = decode_ascii(&text, true).unwrap();
        for (a, b) in ps.iter().zip(&back) {
            assert_same(a, b);
        }
    }

    #[test]
    fn test_positions_strip_components() {
        let ps = sample();
        let back = decode_binary(&encode_binary(&ps, false), false).unwrap();
        assert!(back[0].kinematic.is_none());
        assert_eq!(back[0].id(), ps[0].id());
    }

    #[test]
    fn test_lost_records_dropped() {
        let text = "2\n(\n(1 0 0 0) -1 0 1 -1 0 0 0 0 5\n(1 0 0 0) 0 0 1 -1 0 0 0 0 6\n)\n";
        let ps = decode_ascii(text, false).unwrap();
        assert_eq!(ps.len(), 1);
        assert_eq!(ps[0].origin_id(), 6);
    }

    #[test]
    fn test_truncated_binary() {
        let bytes = encode_binary(&sample(), true);
        let err = decode_binary(&bytes[..bytes.len() - 8], true).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn test_malformed_ascii() {
        let err = decode_ascii("1\n(\n(1 0 0) 0\n)\n", false).unwrap_err();
        assert!(matches!(err, WireError::Malformed { position: 3, .. }));
    }

    #[test]
    fn test_oversized_counts_are_errors() {
        let err = decode_ascii("100000000000000000\n(\n)\n", false).unwrap_err();
        assert!(matches!(err, WireError::Malformed { .. }));

        let mut bytes = bytemuck::bytes_of(&u64::MAX).to_vec();
        bytes.extend_from_slice(&[0; 16]);
        let err = decode_binary(&bytes, true).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn test_transfer_message() {
        let ps = sample();
        let (patches, back) = decode_transfer(&encode_transfer(&[6, 9], &ps)).unwrap();
        assert_eq!(patches, vec![6, 9]);
        assert_same(&ps[1], &back[1]);
    }
}
