//! Reference scenarios
//!
//! Each case runs one configuration from `configs/` and states which
//! invariants its final cloud must satisfy.

use std::path::Path;

use crate::{
    AgreementCheck, BarycentricCheck, CountCheck, ExpectedResult, PositionBoundsCheck,
    ReferenceTest,
};

/// Allowed drift of a particle between distributed and single-rank runs
const AGREEMENT_TOLERANCE: f64 = 1e-8;

/// Allowed barycentric sum error and negative coordinate
const BARYCENTRIC_TOLERANCE: f64 = 1e-9;

fn config(config_dir: &Path, file: &str) -> String {
    config_dir.join(file).to_string_lossy().to_string()
}

/// Periodic channel
///
/// Tracers convected through a channel that is periodic in the flow
/// direction and bounded by escape walls across it, on a 2x2 rank grid.
/// Particles cycle through the periodic pair, cross processor patches and
/// escape through the far wall, and the distributed run must match a
/// single-rank run.
pub fn periodic_channel_test(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Periodic Channel".to_string(),
        config_path: config(config_dir, "periodic-channel.json"),
        expected: ExpectedResult {
            count: Some(CountCheck {
                allow_deleted: true,
                // Open sides are escape walls, so leaving is never a loss
                max_lost: 0,
            }),
            position_bounds: Some(PositionBoundsCheck {
                min: [0.0, 0.0, 0.0],
                max: [2.0, 1.0, 1.0],
            }),
            barycentric: Some(BarycentricCheck {
                tolerance: BARYCENTRIC_TOLERANCE,
            }),
            agreement: Some(AgreementCheck {
                tolerance: AGREEMENT_TOLERANCE,
            }),
        },
    }
}

/// Rebound box
///
/// Heavy parcels thrown around a closed box under gravity with elastic
/// walls, on four ranks. Nothing may leave the box or get lost.
pub fn rebound_box_test(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Rebound Box".to_string(),
        config_path: config(config_dir, "rebound-box.json"),
        expected: ExpectedResult {
            count: Some(CountCheck {
                allow_deleted: false,
                max_lost: 0,
            }),
            position_bounds: Some(PositionBoundsCheck {
                min: [-1e-9, -1e-9, -1e-9],
                max: [1.0 + 1e-9, 1.0 + 1e-9, 1.0 + 1e-9],
            }),
            barycentric: Some(BarycentricCheck {
                tolerance: BARYCENTRIC_TOLERANCE,
            }),
            agreement: Some(AgreementCheck {
                tolerance: AGREEMENT_TOLERANCE,
            }),
        },
    }
}

/// Outlet relay
///
/// Tracers pushed along a long duct split into four slabs, with steps long
/// enough to cross several ranks at once. Every particle either stays in
/// the duct or escapes through its end wall; none may be lost.
pub fn outlet_relay_test(config_dir: &Path) -> ReferenceTest {
    ReferenceTest {
        name: "Outlet Relay".to_string(),
        config_path: config(config_dir, "outlet-relay.json"),
        expected: ExpectedResult {
            count: Some(CountCheck {
                allow_deleted: true,
                max_lost: 0,
            }),
            position_bounds: Some(PositionBoundsCheck {
                min: [0.0, 0.0, 0.0],
                max: [4.0, 1.0, 1.0],
            }),
            barycentric: Some(BarycentricCheck {
                tolerance: BARYCENTRIC_TOLERANCE,
            }),
            agreement: Some(AgreementCheck {
                tolerance: AGREEMENT_TOLERANCE,
            }),
        },
    }
}

/// Get all reference tests
pub fn all_tests(config_dir: &Path) -> Vec<ReferenceTest> {
    vec![
        periodic_channel_test(config_dir),
        rebound_box_test(config_dir),
        outlet_relay_test(config_dir),
    ]
}
