//! Orchestration Layer
//!
//! This crate drives particle clouds through decomposed meshes, including:
//! - Case configuration and validation
//! - Box mesh and initial cloud setup
//! - Mesh decomposition with processor patches and addressing maps
//! - Cloud decomposition, reconstruction and redistribution, in memory and
//!   on disk
//! - A threaded rank-to-rank transport and distributed parallel execution

#![warn(missing_docs)]

pub mod config;
pub mod decompose;
pub mod distributed;
pub mod domain;
pub mod redistribute;
pub mod transport;

pub use config::SimulationConfig;
pub use decompose::{DecomposeError, Decomposition, ProcAddressing};
pub use distributed::DistributedResult;
pub use redistribute::RedistributeError;
pub use transport::ThreadTransport;

use std::path::Path;

use thiserror::Error;
use tracking::{Cloud, MeshError, MoveReport, PolyMesh, TrackingError, WireError};

/// Errors raised while setting up or running a case
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration could not be loaded or failed validation
    #[error("configuration error: {0}")]
    Config(String),

    /// Mesh construction failed
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// Mesh decomposition failed
    #[error(transparent)]
    Decompose(#[from] DecomposeError),

    /// Cloud decomposition or reconstruction failed
    #[error(transparent)]
    Redistribute(#[from] RedistributeError),

    /// A rank failed to move its cloud
    #[error(transparent)]
    Tracking(#[from] TrackingError),

    /// Writing the output case failed
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A rank's thread panicked
    #[error("rank {0} panicked")]
    RankPanicked(usize),

    /// A rank finished without reporting a result
    #[error("rank {0} produced no result")]
    MissingResult(usize),
}

/// A configured case, ready to run
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Validated configuration
    pub config: SimulationConfig,
    /// Whole, undecomposed mesh
    pub mesh: PolyMesh,
    /// Initial cloud on the whole mesh
    pub cloud: Cloud,
}

/// Create a complete simulation from a configuration file
///
/// This function performs the full case setup pipeline:
/// 1. Load and validate the configuration
/// 2. Build the box mesh
/// 3. Create the cloud and inject its parcels
///
/// # Arguments
/// * `config_path` - Path to the JSON configuration file
///
/// # Example
/// ```no_run
/// use orchestrator::create_simulation;
///
/// let sim = create_simulation("configs/channel.json")?;
/// let result = sim.run()?;
/// println!("{} particles left", result.cloud.len());
/// # Ok::<(), orchestrator::OrchestratorError>(())
/// ```
pub fn create_simulation(config_path: &str) -> Result<Simulation, OrchestratorError> {
    tracing::info!("Creating simulation from config: {}", config_path);

    // 1. Load and validate configuration
    let config = SimulationConfig::load(config_path).map_err(OrchestratorError::Config)?;
    tracing::info!("Configuration loaded: {}", config.name);

    // 2. Build mesh
    let mesh = domain::setup_mesh(&config)?;

    // 3. Inject cloud
    let cloud = domain::setup_cloud(&config, &mesh);

    tracing::info!("Simulation ready to start");
    Ok(Simulation { config, mesh, cloud })
}

impl Simulation {
    /// Run the case on as many ranks as the decomposition asks for and write
    /// the final clouds when an output directory is configured.
    pub fn run(&self) -> Result<DistributedResult, OrchestratorError> {
        let result = if self.config.n_ranks() > 1 {
            distributed::run_distributed(&self.config, &self.mesh, &self.cloud)?
        } else {
            distributed::run_single_instance(&self.config, &self.mesh, &self.cloud)?
        };

        let total = total_report(&result.reports);
        tracing::info!(
            "Case '{}' done: {} particles, {} sent, {} deleted, {} lost ({:.3e} kg)",
            self.config.name,
            result.cloud.len(),
            total.sent,
            total.deleted,
            total.lost,
            total.lost_mass
        );

        if let Some(dir) = &self.config.output_dir {
            self.write_output(Path::new(dir), &result)?;
        }
        Ok(result)
    }

    fn write_output(&self, case: &Path, result: &DistributedResult) -> Result<(), WireError> {
        let format = self.config.write_format;
        tracking::io::cloud_io::write_cloud(case, &result.cloud, 0, format)?;
        if result.rank_clouds.len() > 1 {
            for (rank, cloud) in result.rank_clouds.iter().enumerate() {
                let proc_case = redistribute::processor_dir(case, rank);
                tracking::io::cloud_io::write_cloud(&proc_case, cloud, rank, format)?;
            }
        }
        Ok(())
    }
}

// ===========================================================================
// Result Aggregation Utilities
// ===========================================================================

/// Aggregate move reports from multiple ranks by merging the counters of
/// each timestep.
///
/// # Arguments
/// * `reports` - A slice of per-rank report vectors. Each inner vector
///   contains one report per timestep of one rank.
///
/// # Returns
/// One merged report per timestep. If ranks have different numbers of
/// reports, the result length equals the minimum across all ranks.
pub fn aggregate_reports(reports: &[Vec<MoveReport>]) -> Vec<MoveReport> {
    if reports.is_empty() {
        return Vec::new();
    }

    // Find minimum report count
    let min_len = reports.iter().map(|r| r.len()).min().unwrap_or(0);
    let mut combined = Vec::with_capacity(min_len);

    for t in 0..min_len {
        let mut total = MoveReport::default();
        for rank_reports in reports {
            total.merge(&rank_reports[t]);
        }
        combined.push(total);
    }

    combined
}

/// Sum the reports of a whole run. Rounds hold the largest count of any
/// step.
pub fn total_report(reports: &[MoveReport]) -> MoveReport {
    reports.iter().fold(MoveReport::default(), |mut acc, r| {
        acc.merge(r);
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn report(sent: usize, lost: usize, lost_mass: f64, rounds: usize) -> MoveReport {
        MoveReport {
            rounds,
            sent,
            received: sent,
            deleted: lost,
            lost,
            lost_mass,
            ..MoveReport::default()
        }
    }

    #[test]
    fn test_aggregate_reports_empty() {
        let result = aggregate_reports(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_aggregate_reports_single() {
        let reports = vec![vec![report(3, 1, 0.5, 2)]];
        let result = aggregate_reports(&reports);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], reports[0][0]);
    }

    #[test]
    fn test_aggregate_reports_two_ranks() {
        let reports = vec![
            vec![report(1, 0, 0.0, 2), report(2, 1, 0.25, 3)],
            vec![report(4, 2, 1.0, 2), report(0, 0, 0.0, 3), report(9, 9, 9.0, 9)],
        ];

        let result = aggregate_reports(&reports);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].sent, 5);
        assert_eq!(result[0].lost, 2);
        assert_eq!(result[0].rounds, 2);
        assert_eq!(result[1].sent, 2);
        assert_relative_eq!(result[1].lost_mass, 0.25);
        assert_eq!(result[1].rounds, 3);
    }

    #[test]
    fn test_total_report() {
        let total = total_report(&[report(1, 1, 0.5, 1), report(2, 0, 0.0, 4)]);
        assert_eq!(total.sent, 3);
        assert_eq!(total.received, 3);
        assert_eq!(total.lost, 1);
        assert_eq!(total.rounds, 4);
        assert_relative_eq!(total.lost_mass, 0.5);
    }

    #[test]
    fn test_create_simulation_rejects_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "name": "" }"#).unwrap();

        let err = create_simulation(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }
}
