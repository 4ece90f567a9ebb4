//! Tracking tolerances and limits.

use serde::{Deserialize, Serialize};

/// Limits applied while tracking and transferring particles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingSettings {
    /// Consecutive sub-tracks ending behind their start after which the rest
    /// of the step is abandoned. A tuned tolerance for inverted tets.
    #[serde(default = "default_max_n_behind")]
    pub max_n_behind: u32,
    /// Transfer rounds per move after which the move fails.
    #[serde(default = "default_max_transfer_rounds")]
    pub max_transfer_rounds: usize,
    /// Maximum Courant number of one sub-track.
    #[serde(default = "default_max_co")]
    pub max_co: f64,
    /// Consecutive sub-tracks making no progress before the step is
    /// abandoned.
    #[serde(default = "default_max_stalled_hits")]
    pub max_stalled_hits: usize,
}

fn default_max_n_behind() -> u32 {
    10
}

fn default_max_transfer_rounds() -> usize {
    1000
}

fn default_max_co() -> f64 {
    1.0
}

fn default_max_stalled_hits() -> usize {
    100
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            max_n_behind: default_max_n_behind(),
            max_transfer_rounds: default_max_transfer_rounds(),
            max_co: default_max_co(),
            max_stalled_hits: default_max_stalled_hits(),
        }
    }
}

impl TrackingSettings {
    /// Validate the settings
    pub fn validate(&self) -> Result<(), String> {
        if self.max_n_behind == 0 {
            return Err("max_n_behind must be at least 1".to_string());
        }
        if self.max_transfer_rounds == 0 {
            return Err("max_transfer_rounds must be at least 1".to_string());
        }
        if !(self.max_co > 0.0 && self.max_co.is_finite()) {
            return Err("max_co must be positive".to_string());
        }
        if self.max_stalled_hits == 0 {
            return Err("max_stalled_hits must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = TrackingSettings::default();
        assert_eq!(s.max_n_behind, 10);
        assert_eq!(s.max_transfer_rounds, 1000);
        assert_eq!(s.max_co, 1.0);
        assert_eq!(s.max_stalled_hits, 100);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let s: TrackingSettings = serde_json::from_str(r#"{"max_n_behind": 4}"#).unwrap();
        assert_eq!(s.max_n_behind, 4);
        assert_eq!(s.max_transfer_rounds, 1000);
    }

    #[test]
    fn test_validation() {
        let mut s = TrackingSettings::default();
        s.max_co = 0.0;
        assert!(s.validate().is_err());
        s.max_co = 0.5;
        s.max_n_behind = 0;
        assert!(s.validate().is_err());
    }
}
