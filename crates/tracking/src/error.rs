//! Error types for mesh construction, particle tracking, transport and I/O.
//!
//! Per-particle failures raised while tracking (a failed edge search, a
//! collapsed moving tet) are returned as [`TrackingError`] and contained by
//! the cloud: the offending particle is removed and counted as lost. Mesh and
//! wire errors are configuration or data failures and propagate to the caller.

use thiserror::Error;

/// Errors raised while building or validating a [`PolyMesh`](crate::PolyMesh).
#[derive(Debug, Error)]
pub enum MeshError {
    /// Connectivity arrays disagree in length or reference missing entities.
    #[error("inconsistent mesh connectivity: {0}")]
    Connectivity(String),

    /// The boundary patch table does not tile the boundary faces.
    #[error("invalid patch table: {0}")]
    PatchTable(String),

    /// A coupled patch has no valid twin or its faces do not correspond.
    #[error("invalid coupling on patch '{patch}': {reason}")]
    InvalidCoupling {
        /// Name of the offending patch.
        patch: String,
        /// What went wrong.
        reason: String,
    },

    /// Point motion supplied with the wrong number of points.
    #[error("motion supplies {given} points, mesh has {expected}")]
    MotionSize {
        /// Points in the mesh.
        expected: usize,
        /// Points supplied.
        given: usize,
    },

    /// A cell with a non-positive volume.
    #[error("cell {cell} has non-positive volume {volume}")]
    DegenerateCell {
        /// Cell index.
        cell: usize,
        /// Computed volume.
        volume: f64,
    },
}

/// Errors raised while encoding or decoding particle records.
#[derive(Debug, Error)]
pub enum WireError {
    /// The byte stream ended before a complete record was read.
    #[error("truncated {what}: needed {needed} bytes, {available} available")]
    Truncated {
        /// What was being decoded.
        what: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },

    /// A token in the ASCII stream could not be parsed.
    #[error("malformed ASCII record at token {position}: {reason}")]
    Malformed {
        /// Token index in the stream.
        position: usize,
        /// What went wrong.
        reason: String,
    },

    /// A component key or flag not known to this build.
    #[error("unknown component key {0}")]
    UnknownComponent(u64),

    /// A field object whose length disagrees with the particle count.
    #[error("field '{name}' has {len} entries, cloud has {expected} particles")]
    FieldLength {
        /// Field object name.
        name: String,
        /// Entries in the field.
        len: usize,
        /// Particles in the cloud.
        expected: usize,
    },

    /// Underlying file system failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A rank outside `0..n_ranks` was addressed.
    #[error("rank {rank} out of range for {n_ranks} ranks")]
    BadRank {
        /// Addressed rank.
        rank: usize,
        /// Number of ranks.
        n_ranks: usize,
    },

    /// The peer hung up before the exchange completed.
    #[error("rank {0} disconnected")]
    Disconnected(usize),

    /// The collective could not complete.
    #[error("collective exchange failed: {0}")]
    Collective(String),

    /// A rank left the group while others still waited on it.
    #[error("rank {0} left the exchange")]
    Aborted(usize),
}

/// Errors raised while tracking particles or moving a cloud.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// No cell contains the requested position.
    #[error("position ({x}, {y}, {z}) is not inside any cell")]
    CellNotFound {
        /// x coordinate.
        x: f64,
        /// y coordinate.
        y: f64,
        /// z coordinate.
        z: f64,
    },

    /// `change_face` could not find the cell face sharing the crossed edge.
    #[error("no face of cell {cell} shares edge ({start}, {end}) with face {face}")]
    EdgeNotFound {
        /// Cell being searched.
        cell: usize,
        /// Face being left.
        face: usize,
        /// Edge start point.
        start: usize,
        /// Edge end point.
        end: usize,
    },

    /// The moving tet degenerated onto the particle during a sub-track.
    #[error("moving tet collapsed onto particle {origin_proc}:{origin_id}")]
    CollapsedTet {
        /// Originating processor of the particle.
        origin_proc: usize,
        /// Originating id of the particle.
        origin_id: u64,
    },

    /// A position was located outside the mesh with `boundary_fail` set.
    #[error("particle {origin_proc}:{origin_id} located outside the mesh: {context}")]
    OutsideMesh {
        /// Originating processor of the particle.
        origin_proc: usize,
        /// Originating id of the particle.
        origin_id: u64,
        /// Caller-supplied description.
        context: String,
    },

    /// A transfer addressed a patch that is not a processor patch.
    #[error("patch {0} is not a processor patch")]
    NotProcessorPatch(usize),

    /// The transfer protocol exceeded its round limit.
    #[error("particle transfer did not converge after {rounds} rounds")]
    TransferRoundLimit {
        /// Rounds attempted.
        rounds: usize,
    },

    /// The cloud is bound to a mesh that violates a cloud-level requirement.
    #[error("cloud '{cloud}' cannot use patch '{patch}': {reason}")]
    UnsupportedPatch {
        /// Cloud name.
        cloud: String,
        /// Patch name.
        patch: String,
        /// What went wrong.
        reason: String,
    },

    /// Stored positions do not match the particles being mapped.
    #[error("{positions} stored positions for {particles} particles")]
    PositionCount {
        /// Stored positions.
        positions: usize,
        /// Particles in the cloud.
        particles: usize,
    },

    /// Mesh failure.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// Encoding or decoding failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
