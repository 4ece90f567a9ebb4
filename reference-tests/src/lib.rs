//! Reference test framework for particle tracking validation
//!
//! This crate runs complete cases from JSON configurations and checks the
//! final clouds against invariants every correct run must satisfy: particle
//! count bookkeeping, containment in the mesh, valid barycentric
//! coordinates and agreement between distributed and single-rank runs.

pub mod cases;

#[cfg(test)]
mod tests;

use orchestrator::distributed::run_single_instance;
use orchestrator::{create_simulation, total_report, DistributedResult};
use tracking::{Cloud, MoveReport, Particle, PolyMesh};

/// Expected result criteria for a reference test
#[derive(Debug, Clone, Default)]
pub struct ExpectedResult {
    /// Particle count bookkeeping
    pub count: Option<CountCheck>,
    /// Particle position bounds validation
    pub position_bounds: Option<PositionBoundsCheck>,
    /// Barycentric coordinate validation
    pub barycentric: Option<BarycentricCheck>,
    /// Comparison with a single-rank run of the same case
    pub agreement: Option<AgreementCheck>,
}

/// Check that every injected particle is either still in the cloud or was
/// removed for a counted reason
#[derive(Debug, Clone)]
pub struct CountCheck {
    /// Whether particles may leave the domain
    pub allow_deleted: bool,
    /// Maximum number of particles lost to tracking failures
    pub max_lost: usize,
}

/// Check that particles remain within specified bounds
#[derive(Debug, Clone)]
pub struct PositionBoundsCheck {
    /// Minimum allowed position [x, y, z]
    pub min: [f64; 3],
    /// Maximum allowed position [x, y, z]
    pub max: [f64; 3],
}

/// Check that coordinates sum to one and are not negative
#[derive(Debug, Clone)]
pub struct BarycentricCheck {
    /// Absolute tolerance on the sum and on negative coordinates
    pub tolerance: f64,
}

/// Check that distributed and single-rank runs end in the same state
#[derive(Debug, Clone)]
pub struct AgreementCheck {
    /// Maximum allowed position difference (m)
    pub tolerance: f64,
}

/// Result of running a reference test
#[derive(Debug)]
pub struct TestResult {
    /// Test name
    pub name: String,
    /// Whether test passed
    pub passed: bool,
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Move counters summed over the run
    pub report: MoveReport,
    /// Rank count of the run
    pub n_ranks: usize,
    /// Particles at the start
    pub initial_count: usize,
    /// Particles at the end
    pub final_count: usize,
    /// Number of timesteps executed
    pub timesteps: u64,
    /// Simulated time (seconds)
    pub sim_time: f64,
}

/// Result of an individual validation check
#[derive(Debug)]
pub struct CheckResult {
    /// Check name
    pub name: String,
    /// Whether check passed
    pub passed: bool,
    /// Error message if failed
    pub message: Option<String>,
}

/// A reference test case
pub struct ReferenceTest {
    /// Test name
    pub name: String,
    /// Path to configuration file
    pub config_path: String,
    /// Expected results to validate
    pub expected: ExpectedResult,
}

impl ReferenceTest {
    /// Run the reference test and return results
    pub fn run(&self) -> Result<TestResult, String> {
        tracing::info!("Running reference test: {}", self.name);

        let sim = create_simulation(&self.config_path).map_err(|e| e.to_string())?;
        let initial_count = sim.cloud.len();
        let n_ranks = sim.config.n_ranks();

        tracing::info!(
            "Initialized: {} particles on {} cells, {} ranks",
            initial_count,
            sim.mesh.n_cells(),
            n_ranks
        );

        let result = sim.run().map_err(|e| e.to_string())?;
        let report = total_report(&result.reports);
        tracing::info!(
            "Simulation complete: {} steps, {:.6}s simulated",
            result.timesteps,
            result.sim_time
        );

        // Validate results
        let mut checks = Vec::new();
        let mut all_passed = true;

        // Check particle count
        if let Some(ref count) = self.expected.count {
            let check = validate_count(initial_count, &result, &report, count);
            all_passed &= check.passed;
            checks.push(check);
        }

        // Check position bounds
        if let Some(ref bounds) = self.expected.position_bounds {
            let check = validate_position_bounds(&sim.mesh, &result.cloud, bounds);
            all_passed &= check.passed;
            checks.push(check);
        }

        // Check barycentric coordinates, on every rank's own mesh as well
        if let Some(ref bary) = self.expected.barycentric {
            let check = validate_barycentric(
                std::iter::once(&result.cloud).chain(result.rank_clouds.iter()),
                bary,
            );
            all_passed &= check.passed;
            checks.push(check);
        }

        // Compare with a single-rank run
        if let Some(ref agreement) = self.expected.agreement {
            let single = run_single_instance(&sim.config, &sim.mesh, &sim.cloud)
                .map_err(|e| e.to_string())?;
            let check = validate_agreement(&sim.mesh, &result.cloud, &single.cloud, agreement);
            all_passed &= check.passed;
            checks.push(check);
        }

        Ok(TestResult {
            name: self.name.clone(),
            passed: all_passed,
            checks,
            report,
            n_ranks,
            initial_count,
            final_count: result.cloud.len(),
            timesteps: result.timesteps,
            sim_time: result.sim_time,
        })
    }
}

fn check(name: &str, failure: Option<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        passed: failure.is_none(),
        message: failure,
    }
}

/// Validate that every particle is accounted for
fn validate_count(
    initial: usize,
    result: &DistributedResult,
    report: &MoveReport,
    criteria: &CountCheck,
) -> CheckResult {
    let remaining = result.cloud.len();
    let on_ranks: usize = result.rank_clouds.iter().map(Cloud::len).sum();

    let failure = if remaining + report.deleted != initial {
        Some(format!(
            "{} injected, {} remaining, {} deleted",
            initial, remaining, report.deleted
        ))
    } else if on_ranks != remaining {
        Some(format!(
            "{} particles on ranks but {} after reconstruction",
            on_ranks, remaining
        ))
    } else if report.deleted != report.lost + report.escaped {
        Some(format!(
            "{} deleted but only {} lost and {} escaped",
            report.deleted, report.lost, report.escaped
        ))
    } else if report.sent != report.received {
        Some(format!("{} sent but {} received", report.sent, report.received))
    } else if !criteria.allow_deleted && report.deleted > 0 {
        Some(format!("{} particles deleted", report.deleted))
    } else if report.lost > criteria.max_lost {
        Some(format!(
            "{} particles lost ({:.3e} kg), at most {} allowed",
            report.lost, report.lost_mass, criteria.max_lost
        ))
    } else {
        None
    };
    check("Particle Count", failure)
}

/// Validate that particles remain within specified bounds
fn validate_position_bounds(
    mesh: &PolyMesh,
    cloud: &Cloud,
    bounds: &PositionBoundsCheck,
) -> CheckResult {
    let mut violations = 0;
    let mut max_violation = 0.0_f64;

    for p in cloud.iter() {
        let pos = p.position(mesh);

        for axis in 0..3 {
            if pos[axis] < bounds.min[axis] {
                violations += 1;
                max_violation = max_violation.max(bounds.min[axis] - pos[axis]);
            }
            if pos[axis] > bounds.max[axis] {
                violations += 1;
                max_violation = max_violation.max(pos[axis] - bounds.max[axis]);
            }
        }
    }

    let failure = (violations > 0).then(|| {
        format!(
            "{} particles out of bounds (max violation: {:.6} m)",
            violations, max_violation
        )
    });
    check("Position Bounds", failure)
}

/// Worst barycentric defect of a particle: sum error or negative coordinate
fn barycentric_defect(p: &Particle) -> f64 {
    let y = p.coordinates();
    (y.sum() - 1.0).abs().max(-y.min())
}

/// Validate that all coordinates are a valid point of their tet
fn validate_barycentric<'a>(
    clouds: impl Iterator<Item = &'a Cloud>,
    criteria: &BarycentricCheck,
) -> CheckResult {
    let mut violations = 0;
    let mut worst = 0.0_f64;
    for p in clouds.flat_map(|c| c.iter()) {
        let defect = barycentric_defect(p);
        if defect > criteria.tolerance {
            violations += 1;
            worst = worst.max(defect);
        }
    }

    let failure = (violations > 0).then(|| {
        format!(
            "{} particles with invalid coordinates (worst defect: {:.3e})",
            violations, worst
        )
    });
    check("Barycentric Coordinates", failure)
}

/// Particles of a cloud in identity order
fn sorted(cloud: &Cloud) -> Vec<&Particle> {
    let mut v: Vec<&Particle> = cloud.iter().collect();
    v.sort_by_key(|p| p.id());
    v
}

/// Validate that two clouds hold the same particles in the same places
fn validate_agreement(
    mesh: &PolyMesh,
    distributed: &Cloud,
    single: &Cloud,
    criteria: &AgreementCheck,
) -> CheckResult {
    if distributed.len() != single.len() {
        return check(
            "Distributed Agreement",
            Some(format!(
                "{} particles distributed, {} single-rank",
                distributed.len(),
                single.len()
            )),
        );
    }

    let mut max_distance = 0.0_f64;
    for (a, b) in sorted(distributed).into_iter().zip(sorted(single)) {
        if a.id() != b.id() {
            return check(
                "Distributed Agreement",
                Some(format!("particle {} has no single-rank counterpart", a.id())),
            );
        }
        max_distance = max_distance.max((a.position(mesh) - b.position(mesh)).norm());
    }

    let failure = (max_distance > criteria.tolerance).then(|| {
        format!(
            "positions differ by up to {:.3e} m (tolerance: {:.1e} m)",
            max_distance, criteria.tolerance
        )
    });
    check("Distributed Agreement", failure)
}

impl TestResult {
    /// Print a summary of the test result
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(80));
        println!("Test: {}", self.name);
        println!("Status: {}", if self.passed { "PASSED" } else { "FAILED" });
        println!(
            "Ranks: {}, Timesteps: {}, Simulated time: {:.6}s",
            self.n_ranks, self.timesteps, self.sim_time
        );
        println!("\nParticles:");
        println!("  Injected: {}", self.initial_count);
        println!("  Remaining: {}", self.final_count);
        println!("  Sent between ranks: {}", self.report.sent);
        println!("  Deleted: {} (lost: {}, escaped: {})", self.report.deleted, self.report.lost, self.report.escaped);
        println!("  Max transfer rounds: {}", self.report.rounds);
        println!("\nValidation Checks:");
        for check in &self.checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            print!("  [{}] {}", status, check.name);
            if let Some(ref msg) = check.message {
                print!(" - {}", msg);
            }
            println!();
        }
        println!("{}", "=".repeat(80));
    }
}
