//! Classifier and detector configuration
//!
//! Every field is optional on the wire and falls back to the defaults below.
//! Validation happens here, at configuration time, so a tick can never fail on
//! a bad threshold.

use crate::error::FocusError;
use crate::types::EngagementState;
use serde::{Deserialize, Serialize};

/// Face absence needed before a tick is classified as away (seconds). Not configurable.
pub const AWAY_AFTER_SECS: f64 = 2.0;

/// Default engagement score before any adjustment
pub const DEFAULT_BASELINE_SCORE: f64 = 70.0;

/// Per-state score adjustments
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateWeights {
    pub engaged: f64,
    pub distracted: f64,
    pub sleepy: f64,
    pub away: f64,
}

impl Default for StateWeights {
    fn default() -> Self {
        Self {
            engaged: 10.0,
            distracted: -15.0,
            sleepy: -25.0,
            away: -20.0,
        }
    }
}

impl StateWeights {
    pub fn weight(&self, state: EngagementState) -> f64 {
        match state {
            EngagementState::Engaged => self.engaged,
            EngagementState::Distracted => self.distracted,
            EngagementState::Sleepy => self.sleepy,
            EngagementState::Away => self.away,
        }
    }
}

/// Thresholds the signal adapter uses to derive boolean flags from ratios
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorThresholds {
    /// Eye aspect ratio below which the eyes count as closed
    pub eye_closed_threshold: f64,
    /// Mouth open ratio above which the mouth counts as yawning
    pub yawn_threshold: f64,
    /// Absolute head yaw ratio above which the user counts as looking away
    pub look_away_threshold: f64,
    /// Hand movement intensity above which hands count as fidgeting
    pub fidgeting_threshold: f64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            eye_closed_threshold: 0.2,
            yawn_threshold: 0.6,
            look_away_threshold: 0.3,
            fidgeting_threshold: 0.5,
        }
    }
}

/// Full engagement configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementConfig {
    /// Continuous eye closure before a tick counts as sleepy (seconds)
    pub eye_closed_duration: f64,
    /// Continuous yawning before a tick counts as sleepy (seconds)
    pub yawn_duration: f64,
    /// Continuous look-away before a tick counts as distracted (seconds)
    pub look_away_duration: f64,
    /// Score before state weights and penalties are applied
    pub baseline_score: f64,
    pub weights: StateWeights,
    pub thresholds: DetectorThresholds,
}

impl Default for EngagementConfig {
    fn default() -> Self {
        Self {
            eye_closed_duration: 1.5,
            yawn_duration: 2.0,
            look_away_duration: 3.0,
            baseline_score: DEFAULT_BASELINE_SCORE,
            weights: StateWeights::default(),
            thresholds: DetectorThresholds::default(),
        }
    }
}

impl EngagementConfig {
    /// Parse and validate a configuration document
    pub fn from_json(json: &str) -> Result<Self, FocusError> {
        let config: EngagementConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject values that would make classification meaningless
    pub fn validate(&self) -> Result<(), FocusError> {
        check_duration("eye_closed_duration", self.eye_closed_duration)?;
        check_duration("yawn_duration", self.yawn_duration)?;
        check_duration("look_away_duration", self.look_away_duration)?;

        if !self.baseline_score.is_finite() || !(0.0..=100.0).contains(&self.baseline_score) {
            return Err(FocusError::InvalidConfig(format!(
                "baseline_score must be within 0-100, got {}",
                self.baseline_score
            )));
        }

        for state in EngagementState::ALL {
            let weight = self.weights.weight(state);
            if !weight.is_finite() {
                return Err(FocusError::InvalidConfig(format!(
                    "weight for {} must be finite, got {}",
                    state.as_str(),
                    weight
                )));
            }
        }

        check_threshold("eye_closed_threshold", self.thresholds.eye_closed_threshold)?;
        check_threshold("yawn_threshold", self.thresholds.yawn_threshold)?;
        check_threshold("look_away_threshold", self.thresholds.look_away_threshold)?;
        check_threshold("fidgeting_threshold", self.thresholds.fidgeting_threshold)?;

        Ok(())
    }

    /// Merge a partial update, returning the merged config without validating it
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        let mut merged = self.clone();
        if let Some(v) = patch.eye_closed_duration {
            merged.eye_closed_duration = v;
        }
        if let Some(v) = patch.yawn_duration {
            merged.yawn_duration = v;
        }
        if let Some(v) = patch.look_away_duration {
            merged.look_away_duration = v;
        }
        if let Some(v) = patch.baseline_score {
            merged.baseline_score = v;
        }
        if let Some(v) = patch.engaged_weight {
            merged.weights.engaged = v;
        }
        if let Some(v) = patch.distracted_weight {
            merged.weights.distracted = v;
        }
        if let Some(v) = patch.sleepy_weight {
            merged.weights.sleepy = v;
        }
        if let Some(v) = patch.away_weight {
            merged.weights.away = v;
        }
        if let Some(v) = patch.eye_closed_threshold {
            merged.thresholds.eye_closed_threshold = v;
        }
        if let Some(v) = patch.yawn_threshold {
            merged.thresholds.yawn_threshold = v;
        }
        if let Some(v) = patch.look_away_threshold {
            merged.thresholds.look_away_threshold = v;
        }
        if let Some(v) = patch.fidgeting_threshold {
            merged.thresholds.fidgeting_threshold = v;
        }
        merged
    }
}

fn check_duration(name: &str, value: f64) -> Result<(), FocusError> {
    if !value.is_finite() || value < 0.0 {
        return Err(FocusError::InvalidConfig(format!(
            "{name} must be a non-negative number of seconds, got {value}"
        )));
    }
    Ok(())
}

fn check_threshold(name: &str, value: f64) -> Result<(), FocusError> {
    if !value.is_finite() || value < 0.0 {
        return Err(FocusError::InvalidConfig(format!(
            "{name} must be non-negative, got {value}"
        )));
    }
    Ok(())
}

/// Partial configuration update; unset fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub eye_closed_duration: Option<f64>,
    pub yawn_duration: Option<f64>,
    pub look_away_duration: Option<f64>,
    pub baseline_score: Option<f64>,
    pub engaged_weight: Option<f64>,
    pub distracted_weight: Option<f64>,
    pub sleepy_weight: Option<f64>,
    pub away_weight: Option<f64>,
    pub eye_closed_threshold: Option<f64>,
    pub yawn_threshold: Option<f64>,
    pub look_away_threshold: Option<f64>,
    pub fidgeting_threshold: Option<f64>,
}

impl ConfigPatch {
    pub fn from_json(json: &str) -> Result<Self, FocusError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngagementConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngagementConfig::from_json(r#"{"yawn_duration": 4.0}"#).unwrap();

        assert_eq!(config.yawn_duration, 4.0);
        assert_eq!(config.eye_closed_duration, 1.5);
        assert_eq!(config.weights, StateWeights::default());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result = EngagementConfig::from_json(r#"{"look_away_duration": -1.0}"#);
        assert!(matches!(result, Err(FocusError::InvalidConfig(_))));
    }

    #[test]
    fn test_baseline_out_of_range_rejected() {
        let config = EngagementConfig {
            baseline_score: 140.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut config = EngagementConfig::default();
        config.thresholds.fidgeting_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_only_touches_set_fields() {
        let base = EngagementConfig::default();
        let patch = ConfigPatch {
            eye_closed_duration: Some(3.0),
            sleepy_weight: Some(-40.0),
            ..Default::default()
        };

        let merged = base.merged(&patch);

        assert_eq!(merged.eye_closed_duration, 3.0);
        assert_eq!(merged.weights.sleepy, -40.0);
        assert_eq!(merged.weights.engaged, base.weights.engaged);
        assert_eq!(merged.thresholds, base.thresholds);
    }

    #[test]
    fn test_patch_from_json() {
        let patch = ConfigPatch::from_json(r#"{"baseline_score": 60}"#).unwrap();
        assert_eq!(patch.baseline_score, Some(60.0));
        assert_eq!(patch.yawn_duration, None);
    }
}
