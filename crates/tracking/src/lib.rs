//! Lagrangian Particle Tracking Kernel
//!
//! This crate tracks point particles through a polyhedral finite-volume mesh.
//! Each cell is decomposed into tetrahedra and a particle's position is held
//! as barycentric coordinates in one of them, so a track is a sequence of
//! exact tet-to-tet hops rather than a search. Meshes may move during a step.
//!
//! # Modules
//! - [`barycentric`] -- Barycentric coordinates and the tensors mapping to them.
//! - [`tet`] -- Tet decomposition of cells and (moving) tet transforms.
//! - [`cubic`] -- Cubic root finder used by moving-mesh hit fractions.
//! - [`mesh`] -- Polyhedral mesh, boundary patches and a box mesh builder.
//! - [`particle`] -- The tracked particle, tracking and topology changes.
//! - [`boundary`] -- Per-patch handling of particles that reach the boundary.
//! - [`wall`] -- Wall interaction models.
//! - [`parcel`] -- Optional physics state carried with a particle.
//! - [`motion`] -- Displacement and state update models.
//! - [`cloud`] -- Particle collections and the parallel move loop.
//! - [`transport`] -- Rank-to-rank message exchange.
//! - [`io`] -- Particle records, field objects and cloud directories.
//! - [`settings`] -- Tracking tolerances and limits.
//! - [`error`] -- Error types.

#![warn(missing_docs)]

pub mod barycentric;
pub mod boundary;
pub mod cloud;
pub mod cubic;
pub mod error;
pub mod io;
pub mod mesh;
pub mod motion;
pub mod parcel;
pub mod particle;
pub mod settings;
pub mod tet;
pub mod transport;
pub mod wall;

pub use barycentric::{Barycentric, Vector};
pub use boundary::TrackingData;
pub use cloud::{Cloud, MoveReport, TopoChangeMap};
pub use error::{MeshError, TrackingError, TransportError, WireError};
pub use io::WriteFormat;
pub use mesh::{BoxMesh, Patch, PatchKind, PolyMesh, Side, SideKind};
pub use motion::{Ballistic, Convected, Motion};
pub use parcel::{CollisionState, ComponentKey, KinematicState};
pub use particle::{LocateWarnings, OnBoundary, Particle, ParticleId, TrackState};
pub use settings::TrackingSettings;
pub use transport::{SingleRank, Transport};
pub use wall::WallInteraction;
