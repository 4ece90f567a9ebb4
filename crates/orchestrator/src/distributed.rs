//! Distributed parallel execution coordinator
//!
//! Runs a cloud on a decomposed mesh with one thread per rank. The whole
//! cloud is split over the partitions, every rank steps its own cloud and
//! exchanges particles crossing processor patches through a
//! [`ThreadTransport`], and the partitions are gathered back into one cloud
//! at the end.
//!
//! Ranks stay in lock step: every step of every rank runs the same transfer
//! rounds, since each round ends in a collective exchange.

use std::sync::{Arc, Mutex};
use std::thread;

use tracking::{
    Cloud, MoveReport, PolyMesh, SingleRank, TrackingError, Transport, TransportError,
};

use crate::config::SimulationConfig;
use crate::decompose::{box_cell_ranks, decompose};
use crate::redistribute::{decompose_cloud, reconstruct_cloud};
use crate::transport::ThreadTransport;
use crate::{aggregate_reports, OrchestratorError};

/// Result of a distributed simulation run
#[derive(Debug, Clone)]
pub struct DistributedResult {
    /// Final cloud on the whole mesh
    pub cloud: Cloud,
    /// Final cloud of every rank
    pub rank_clouds: Vec<Cloud>,
    /// Move counters of every step, summed over ranks
    pub reports: Vec<MoveReport>,
    /// Number of timesteps executed
    pub timesteps: u64,
    /// Total simulation time (seconds)
    pub sim_time: f64,
}

/// Outcome of one rank's thread
type RankOutcome = Result<(Cloud, Vec<MoveReport>), TrackingError>;

/// Step a cloud `n_steps` times on one partition.
fn run_rank(
    mesh: &PolyMesh,
    cloud: &mut Cloud,
    transport: &mut dyn Transport,
    config: &SimulationConfig,
) -> Result<Vec<MoveReport>, TrackingError> {
    let motion = config.motion.build();
    let mut reports = Vec::with_capacity(config.n_steps as usize);
    for step in 0..config.n_steps {
        let report = cloud.move_particles(mesh, transport, motion.as_ref(), config.delta_t)?;
        if (step + 1) % 100 == 0 {
            tracing::debug!(
                "Rank {} step {}/{}: {} particles, {} rounds",
                transport.rank(),
                step + 1,
                config.n_steps,
                cloud.len(),
                report.rounds
            );
        }
        reports.push(report);
    }
    Ok(reports)
}

/// Run a distributed parallel simulation.
///
/// This function:
/// 1. Splits the mesh into the configured slabs
/// 2. Splits the cloud over the partitions
/// 3. Runs every rank in its own thread, exchanging particles each step
/// 4. Merges the per-rank clouds back onto the whole mesh
///
/// # Arguments
/// * `config` - Validated case configuration
/// * `mesh` - Whole, undecomposed mesh
/// * `cloud` - Initial cloud on the whole mesh
///
/// # Returns
/// A `DistributedResult` with the merged final state.
pub fn run_distributed(
    config: &SimulationConfig,
    mesh: &PolyMesh,
    cloud: &Cloud,
) -> Result<DistributedResult, OrchestratorError> {
    let n = config.n_ranks();

    // 1. Decompose mesh
    let cell_rank = box_cell_ranks(mesh, config.decomposition.splits);
    let decomposition = decompose(mesh, &cell_rank, n)?;

    // 2. Decompose cloud
    let clouds = decompose_cloud(mesh, &decomposition, cloud)?;

    tracing::info!(
        "Distributed simulation: {} ranks, {} total particles",
        n,
        cloud.len()
    );
    for (i, c) in clouds.iter().enumerate() {
        tracing::debug!(
            "  Rank {}: {} cells, {} particles",
            i,
            decomposition.meshes()[i].n_cells(),
            c.len()
        );
    }

    // 3. Run every rank in its own thread
    let results: Arc<Mutex<Vec<Option<RankOutcome>>>> =
        Arc::new(Mutex::new((0..n).map(|_| None).collect()));
    let mut handles = Vec::with_capacity(n);

    for ((rank, mut transport), mut rank_cloud) in ThreadTransport::group(n)
        .into_iter()
        .enumerate()
        .zip(clouds)
    {
        let rank_mesh = decomposition.meshes()[rank].clone();
        let rank_config = config.clone();
        let results = Arc::clone(&results);

        let handle = thread::spawn(move || {
            let outcome = run_rank(&rank_mesh, &mut rank_cloud, &mut transport, &rank_config)
                .map(|reports| (rank_cloud, reports));
            if let Err(e) = &outcome {
                tracing::error!("Rank {} failed: {}", rank, e);
            }

            // Store result
            if let Ok(mut slots) = results.lock() {
                slots[rank] = Some(outcome);
            }
        });

        handles.push(handle);
    }

    // Wait for all threads to complete
    for (rank, handle) in handles.into_iter().enumerate() {
        handle
            .join()
            .map_err(|_| OrchestratorError::RankPanicked(rank))?;
    }

    // 4. Collect results
    let slots = {
        let mut guard = results
            .lock()
            .map_err(|_| OrchestratorError::RankPanicked(0))?;
        std::mem::take(&mut *guard)
    };
    let mut rank_clouds = Vec::with_capacity(n);
    let mut rank_reports = Vec::with_capacity(n);
    let mut failures = Vec::new();
    for (rank, slot) in slots.into_iter().enumerate() {
        match slot.ok_or(OrchestratorError::MissingResult(rank))? {
            Ok((c, reports)) => {
                rank_clouds.push(c);
                rank_reports.push(reports);
            }
            Err(e) => failures.push(e),
        }
    }
    // Ranks released by a failing peer only report that it left
    let root_cause = failures
        .iter()
        .position(|e| !matches!(e, TrackingError::Transport(TransportError::Aborted(_))));
    if let Some(i) = root_cause.or((!failures.is_empty()).then_some(0)) {
        return Err(failures.swap_remove(i).into());
    }
    let reports = aggregate_reports(&rank_reports);

    // 5. Merge results from all ranks
    let merged = reconstruct_cloud(mesh, &decomposition, &rank_clouds)?;
    let sim_time = config.delta_t * config.n_steps as f64;

    tracing::info!(
        "Distributed simulation complete: {} timesteps, {:.6}s simulated, {} particles",
        config.n_steps,
        sim_time,
        merged.len()
    );

    Ok(DistributedResult {
        cloud: merged,
        rank_clouds,
        reports,
        timesteps: config.n_steps,
        sim_time,
    })
}

/// Run a single-instance (non-distributed) simulation for comparison.
///
/// # Arguments
/// * `config` - Validated case configuration; its decomposition is ignored
/// * `mesh` - Whole mesh
/// * `cloud` - Initial cloud
pub fn run_single_instance(
    config: &SimulationConfig,
    mesh: &PolyMesh,
    cloud: &Cloud,
) -> Result<DistributedResult, OrchestratorError> {
    let mut cloud = cloud.clone();
    let mut transport = SingleRank::new();
    let reports = run_rank(mesh, &mut cloud, &mut transport, config)?;
    let sim_time = config.delta_t * config.n_steps as f64;

    tracing::info!(
        "Single-instance simulation complete: {} timesteps, {} particles",
        config.n_steps,
        cloud.len()
    );

    Ok(DistributedResult {
        cloud: cloud.clone(),
        rank_clouds: vec![cloud],
        reports,
        timesteps: config.n_steps,
        sim_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{setup_cloud, setup_mesh};
    use approx::assert_relative_eq;

    /// Tracers convected diagonally through a box cut into `splits` slabs
    fn test_config(splits: [usize; 3], sides: &str) -> SimulationConfig {
        let json = format!(
            r#"{{
                "name": "distributed",
                "mesh": {{ "origin": [0, 0, 0], "lengths": [1, 1, 1], "divisions": [4, 4, 2],
                           "sides": {} }},
                "decomposition": {{ "splits": [{}, {}, {}] }},
                "injection": {{ "lattice": {{ "min": [0, 0, 0], "max": [1, 1, 1], "counts": [4, 4, 2] }} }},
                "motion": {{ "type": "convected", "velocity": [0.7, 0.45, 0.1] }},
                "delta_t": 0.5,
                "n_steps": 4
            }}"#,
            sides, splits[0], splits[1], splits[2]
        );
        let config: SimulationConfig = serde_json::from_str(&json).unwrap();
        config.validate().unwrap();
        config
    }

    const PERIODIC: &str = r#"{ "x_min": "cyclic", "x_max": "cyclic", "y_min": "cyclic",
        "y_max": "cyclic", "z_min": "symmetry", "z_max": "symmetry" }"#;

    #[test]
    fn test_distributed_preserves_particle_count() {
        let config = test_config([1, 1, 2], PERIODIC);
        let mesh = setup_mesh(&config).unwrap();
        let cloud = setup_cloud(&config, &mesh);

        let result = run_distributed(&config, &mesh, &cloud).unwrap();
        assert_eq!(result.cloud.len(), cloud.len());
        assert_eq!(result.rank_clouds.len(), 2);
        assert!(result.reports.iter().all(|r| r.lost == 0));
    }

    #[test]
    fn test_distributed_runs_correct_timesteps() {
        let config = test_config([1, 1, 2], PERIODIC);
        let mesh = setup_mesh(&config).unwrap();
        let cloud = setup_cloud(&config, &mesh);

        let result = run_distributed(&config, &mesh, &cloud).unwrap();
        assert_eq!(result.timesteps, 4);
        assert_eq!(result.reports.len(), 4);
        assert_relative_eq!(result.sim_time, 2.0);
    }

    #[test]
    fn test_distributed_four_ranks_transfer() {
        let sides = r#"{ "x_min": { "patch": "inlet" }, "x_max": { "patch": "outlet" },
            "y_min": "wall", "y_max": "wall", "z_min": "wall", "z_max": "wall" }"#;
        let config = test_config([2, 2, 1], sides);
        let mesh = setup_mesh(&config).unwrap();
        let cloud = setup_cloud(&config, &mesh);

        let result = run_distributed(&config, &mesh, &cloud).unwrap();
        let sent: usize = result.reports.iter().map(|r| r.sent).sum();
        let received: usize = result.reports.iter().map(|r| r.received).sum();
        assert!(sent > 0, "particles should cross between ranks");
        assert_eq!(sent, received);

        let deleted: usize = result.reports.iter().map(|r| r.deleted).sum();
        assert_eq!(result.cloud.len() + deleted, cloud.len());
    }

    #[test]
    fn test_partition_moved_alone_counts_processor_hits() {
        use tracking::{BoxMesh, Convected, SideKind, TrackingSettings, Vector};

        let mesh = BoxMesh::new(Vector::zeros(), Vector::new(1.0, 1.0, 1.0), [2, 1, 1])
            .axis_pair(0, SideKind::Wall)
            .build()
            .unwrap();
        let decomposition = decompose(&mesh, &box_cell_ranks(&mesh, [2, 1, 1]), 2).unwrap();
        let rank_mesh = &decomposition.meshes()[0];

        let mut cloud = Cloud::new("c", TrackingSettings::default());
        cloud
            .inject(rank_mesh, &Vector::new(0.3, 0.4, 0.6), None, None)
            .unwrap();
        let motion = Convected {
            velocity: Vector::new(0.5, 0.0, 0.0),
        };

        let report = cloud
            .move_particles(rank_mesh, &mut SingleRank::new(), &motion, 1.0)
            .unwrap();
        assert!(cloud.is_empty());
        assert_eq!(report.sent, 0);
        assert_eq!(report.lost, 1);
        assert_eq!(report.deleted, 1);
    }

    #[test]
    fn test_single_instance_reference() {
        let config = test_config([1, 1, 1], PERIODIC);
        let mesh = setup_mesh(&config).unwrap();
        let cloud = setup_cloud(&config, &mesh);

        let result = run_single_instance(&config, &mesh, &cloud).unwrap();
        assert_eq!(result.cloud.len(), cloud.len());
        assert_eq!(result.timesteps, 4);
        assert!(result.reports.iter().all(|r| r.rounds == 1));
    }
}
