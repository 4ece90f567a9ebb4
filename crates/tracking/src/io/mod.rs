//! Particle serialisation.
//!
//! - [`wire`] -- fixed-layout particle records, in binary or ASCII, used for
//!   inter-rank transfer and for the positions object on disk.
//! - [`fields`] -- self-describing field objects (scalar, vector, label).
//! - [`cloud_io`] -- the per-cloud directory of objects under `lagrangian/`.

pub mod cloud_io;
pub mod fields;
pub mod wire;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Encoding of particle and field data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFormat {
    /// Human-readable text; floats round-trip exactly.
    #[default]
    Ascii,
    /// Raw native-endian records.
    Binary,
}

impl fmt::Display for WriteFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFormat::Ascii => write!(f, "ascii"),
            WriteFormat::Binary => write!(f, "binary"),
        }
    }
}

impl FromStr for WriteFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ascii" => Ok(WriteFormat::Ascii),
            "binary" => Ok(WriteFormat::Binary),
            other => Err(format!("unknown write format '{}'", other)),
        }
    }
}
