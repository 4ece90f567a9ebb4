//! Configuration parsing and validation for particle tracking cases

use serde::{Deserialize, Serialize};
use std::fs;

use tracking::{
    Ballistic, BoxMesh, Convected, Motion, Side, SideKind, TrackingSettings, Vector,
    WallInteraction, WriteFormat,
};

/// Main case configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable case name
    pub name: String,
    /// Box mesh the cloud is tracked through
    pub mesh: MeshConfig,
    /// Split of the mesh over ranks
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    /// Cloud name, also its directory name under `lagrangian/`
    #[serde(default = "default_cloud_name")]
    pub cloud_name: String,
    /// Initial particles
    pub injection: InjectionConfig,
    /// Tracking tolerances and limits
    #[serde(default)]
    pub tracking: TrackingSettings,
    /// What happens to parcels hitting a wall
    #[serde(default)]
    pub wall: WallInteraction,
    /// How particles are displaced
    #[serde(default)]
    pub motion: MotionConfig,
    /// Timestep (seconds)
    pub delta_t: f64,
    /// Number of timesteps
    pub n_steps: u64,
    /// Encoding of written clouds
    #[serde(default)]
    pub write_format: WriteFormat,
    /// Case directory results are written to, if any
    #[serde(default)]
    pub output_dir: Option<String>,
}

/// Box mesh definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Lower corner [x, y, z]
    pub origin: [f64; 3],
    /// Edge lengths [x, y, z]
    pub lengths: [f64; 3],
    /// Cells per axis
    pub divisions: [usize; 3],
    /// Boundary kind of every side
    #[serde(default)]
    pub sides: SidesConfig,
}

/// Boundary kinds for all six box sides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidesConfig {
    /// X minimum side
    pub x_min: SideKind,
    /// X maximum side
    pub x_max: SideKind,
    /// Y minimum side
    pub y_min: SideKind,
    /// Y maximum side
    pub y_max: SideKind,
    /// Z minimum side
    pub z_min: SideKind,
    /// Z maximum side
    pub z_max: SideKind,
}

/// Split of the box into ranks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Number of slabs per axis; the rank count is their product
    #[serde(default = "default_splits")]
    pub splits: [usize; 3],
}

/// Initial particle placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionConfig {
    /// Explicit positions
    #[serde(default)]
    pub positions: Vec<[f64; 3]>,
    /// Regular lattice of positions
    #[serde(default)]
    pub lattice: Option<LatticeConfig>,
    /// Initial parcel velocity (m/s)
    #[serde(default)]
    pub velocity: [f64; 3],
    /// Parcel diameter (m)
    #[serde(default = "default_diameter")]
    pub diameter: f64,
    /// Parcel density (kg/m^3)
    #[serde(default = "default_density")]
    pub density: f64,
}

/// Lattice of positions at the centres of a regular grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatticeConfig {
    /// Minimum corner [x, y, z]
    pub min: [f64; 3],
    /// Maximum corner [x, y, z]
    pub max: [f64; 3],
    /// Positions per axis
    pub counts: [usize; 3],
}

/// Displacement model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MotionConfig {
    /// Parcels move with their own velocity under gravity
    Ballistic {
        /// Gravity vector (m/s^2)
        #[serde(default = "default_gravity")]
        gravity: [f64; 3],
    },
    /// Tracers follow a uniform flow
    Convected {
        /// Flow velocity (m/s)
        velocity: [f64; 3],
    },
}

// Default values
fn default_cloud_name() -> String {
    "cloud".to_string()
}

fn default_splits() -> [usize; 3] {
    [1, 1, 1]
}

fn default_diameter() -> f64 {
    1e-4
}

fn default_density() -> f64 {
    1000.0
}

fn default_gravity() -> [f64; 3] {
    [0.0, -9.81, 0.0]
}

impl Default for SidesConfig {
    fn default() -> Self {
        Self {
            x_min: SideKind::Wall,
            x_max: SideKind::Wall,
            y_min: SideKind::Wall,
            y_max: SideKind::Wall,
            z_min: SideKind::Wall,
            z_max: SideKind::Wall,
        }
    }
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            splits: default_splits(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig::Ballistic {
            gravity: default_gravity(),
        }
    }
}

impl SidesConfig {
    /// Kind of one side.
    pub fn get(&self, side: Side) -> &SideKind {
        match side {
            Side::XMin => &self.x_min,
            Side::XMax => &self.x_max,
            Side::YMin => &self.y_min,
            Side::YMax => &self.y_max,
            Side::ZMin => &self.z_min,
            Side::ZMax => &self.z_max,
        }
    }
}

impl MotionConfig {
    /// Build the motion model.
    pub fn build(&self) -> Box<dyn Motion> {
        match self {
            MotionConfig::Ballistic { gravity } => Box::new(Ballistic {
                gravity: Vector::from(*gravity),
            }),
            MotionConfig::Convected { velocity } => Box::new(Convected {
                velocity: Vector::from(*velocity),
            }),
        }
    }
}

fn is_coupled(kind: &SideKind) -> bool {
    matches!(
        kind,
        SideKind::Cyclic | SideKind::CyclicAmi | SideKind::CyclicAcmi { .. }
    )
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config: SimulationConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        // Check mesh
        for axis in 0..3 {
            if !(self.mesh.lengths[axis] > 0.0) {
                return Err(format!("Mesh length {} must be positive", axis));
            }
            if self.mesh.divisions[axis] == 0 {
                return Err(format!("Mesh divisions {} must be at least 1", axis));
            }
        }

        // Check decomposition
        for axis in 0..3 {
            let splits = self.decomposition.splits[axis];
            if splits == 0 {
                return Err(format!("Decomposition splits {} must be at least 1", axis));
            }
            if splits > self.mesh.divisions[axis] {
                return Err(format!(
                    "Decomposition splits {} ({}) exceed mesh divisions ({})",
                    axis, splits, self.mesh.divisions[axis]
                ));
            }
        }

        // Check coupled sides
        self.validate_coupled_sides()?;

        // Check cloud name
        if self.cloud_name.is_empty() || self.cloud_name.contains('/') {
            return Err("Cloud name must be a non-empty directory name".to_string());
        }

        // Check parcels
        if self.injection.diameter <= 0.0 {
            return Err("Parcel diameter must be positive".to_string());
        }
        if self.injection.density <= 0.0 {
            return Err("Parcel density must be positive".to_string());
        }
        if let Some(lattice) = &self.injection.lattice {
            for axis in 0..3 {
                if lattice.min[axis] > lattice.max[axis] {
                    return Err(format!("Lattice min {} must not exceed max", axis));
                }
            }
        }

        // Check time stepping
        if !(self.delta_t > 0.0 && self.delta_t.is_finite()) {
            return Err("delta_t must be positive".to_string());
        }
        if self.n_steps == 0 {
            return Err("n_steps must be at least 1".to_string());
        }

        self.tracking.validate()?;
        self.wall.validate()?;

        Ok(())
    }

    /// Validate that coupled sides are paired and not cut by the
    /// decomposition
    fn validate_coupled_sides(&self) -> Result<(), String> {
        let sides = &self.mesh.sides;
        for (axis, (lo, hi)) in [
            (&sides.x_min, &sides.x_max),
            (&sides.y_min, &sides.y_max),
            (&sides.z_min, &sides.z_max),
        ]
        .into_iter()
        .enumerate()
        {
            if is_coupled(lo) != is_coupled(hi) || (is_coupled(lo) && lo != hi) {
                return Err(format!(
                    "Coupled sides must be paired: {} and {}",
                    Side::ALL[2 * axis].name(),
                    Side::ALL[2 * axis + 1].name()
                ));
            }
            if is_coupled(lo) && self.decomposition.splits[axis] > 1 {
                return Err(format!(
                    "Coupled sides {} and {} must stay on one rank; axis {} cannot be split",
                    Side::ALL[2 * axis].name(),
                    Side::ALL[2 * axis + 1].name(),
                    axis
                ));
            }
        }
        Ok(())
    }

    /// Number of ranks the case runs on
    pub fn n_ranks(&self) -> usize {
        self.decomposition.splits.iter().product()
    }

    /// Mesh builder for the configured box
    pub fn box_mesh(&self) -> BoxMesh {
        let mut builder = BoxMesh::new(
            Vector::from(self.mesh.origin),
            Vector::from(self.mesh.lengths),
            self.mesh.divisions,
        );
        for side in Side::ALL {
            builder = builder.side(side, self.mesh.sides.get(side).clone());
        }
        builder
    }
}
