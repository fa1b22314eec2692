//! Engagement classification
//!
//! Turns one `FrameSample` per tick into an `EngagementMetrics` record. State is
//! a priority-ordered decision list gated by edge-triggered hysteresis timers;
//! the score is additive from a baseline; confidence reflects detection
//! quality, not certainty about the state.
//!
//! The hysteresis step is a pure transform (`HysteresisTimers::advance`) so the
//! decision list can be exercised without a classifier instance.

use crate::config::{ConfigPatch, EngagementConfig, AWAY_AFTER_SECS};
use crate::error::FocusError;
use crate::history::ScoreHistory;
use crate::types::{
    EngagementMetrics, EngagementState, ExpressionLabel, FrameSample, TrendDirection,
};
use log::{debug, warn};

/// Eye aspect ratio below which the instantaneous eye penalty applies
const SEVERE_EYE_CLOSURE_EAR: f64 = 0.15;

/// Mouth open ratio above which the instantaneous mouth penalty applies
const WIDE_MOUTH_RATIO: f64 = 0.8;

/// Minimum samples in a window before a trend is reported
const MIN_TREND_SAMPLES: usize = 5;

/// Half-window mean difference needed to call a trend
const TREND_DELTA: f64 = 5.0;

/// Start timestamps (ms) of conditions currently in progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HysteresisTimers {
    pub eyes_closed_since: Option<u64>,
    pub yawn_since: Option<u64>,
    pub look_away_since: Option<u64>,
    pub face_absent_since: Option<u64>,
}

impl HysteresisTimers {
    /// Advance the timers by one tick
    ///
    /// Each timer is armed on the first tick its condition holds, kept while it
    /// keeps holding and cleared on the first tick it does not.
    pub fn advance(self, sample: &FrameSample, now_ms: u64) -> Self {
        Self {
            eyes_closed_since: track(self.eyes_closed_since, sample.eyes_closed, now_ms),
            yawn_since: track(self.yawn_since, sample.yawning, now_ms),
            look_away_since: track(self.look_away_since, sample.looking_away, now_ms),
            face_absent_since: track(self.face_absent_since, !sample.face_present, now_ms),
        }
    }
}

fn track(since: Option<u64>, active: bool, now_ms: u64) -> Option<u64> {
    if active {
        Some(since.unwrap_or(now_ms))
    } else {
        None
    }
}

/// Whether a condition armed at `since` has lasted at least `secs` by `now_ms`
fn sustained(since: Option<u64>, now_ms: u64, secs: f64) -> bool {
    match since {
        Some(start) => {
            let elapsed_secs = now_ms.saturating_sub(start) as f64 / 1000.0;
            elapsed_secs >= secs
        }
        None => false,
    }
}

/// Evaluate the decision list against already-advanced timers
pub fn determine_state(
    timers: &HysteresisTimers,
    sample: &FrameSample,
    now_ms: u64,
    config: &EngagementConfig,
) -> EngagementState {
    if sustained(timers.face_absent_since, now_ms, AWAY_AFTER_SECS) {
        return EngagementState::Away;
    }

    if sustained(timers.eyes_closed_since, now_ms, config.eye_closed_duration)
        || sustained(timers.yawn_since, now_ms, config.yawn_duration)
    {
        return EngagementState::Sleepy;
    }

    if sustained(timers.look_away_since, now_ms, config.look_away_duration)
        || sample.hands_fidgeting
        || sample.hand_over_face
        || sample.expression.is_negative()
    {
        return EngagementState::Distracted;
    }

    if sample.face_present && !sample.looking_away && !sample.eyes_closed {
        return EngagementState::Engaged;
    }

    EngagementState::Distracted
}

/// Additive score from the baseline, clamped to 0-100
///
/// State weights reflect the sustained condition; the eye and mouth penalties
/// reflect instantaneous intensity and stack on top of them.
pub fn compute_score(
    state: EngagementState,
    sample: &FrameSample,
    config: &EngagementConfig,
) -> u8 {
    let mut score = config.baseline_score + config.weights.weight(state);

    if sample.face_present {
        score += 5.0;
    }
    if sample.expression.is_positive() {
        score += 5.0;
    }
    if sample.hands_fidgeting {
        score -= 10.0;
    }
    if sample.hand_over_face {
        score -= 15.0;
    }
    if sample.eye_aspect_ratio < SEVERE_EYE_CLOSURE_EAR {
        score -= 20.0;
    }
    if sample.mouth_open_ratio > WIDE_MOUTH_RATIO {
        score -= 15.0;
    }

    score.clamp(0.0, 100.0).round() as u8
}

/// Detection-quality confidence (0-1)
pub fn compute_confidence(sample: &FrameSample) -> f64 {
    let mut confidence = 0.5;

    if sample.face_present {
        confidence += 0.3;
    }
    if sample.eye_aspect_ratio > 0.0 {
        confidence += 0.1;
    }
    if sample.expression != ExpressionLabel::Unknown {
        confidence += 0.1;
    }

    f64::clamp(confidence, 0.0, 1.0)
}

/// Stateful classifier owning its hysteresis timers and score history
#[derive(Debug, Clone)]
pub struct EngagementClassifier {
    config: EngagementConfig,
    timers: HysteresisTimers,
    history: ScoreHistory,
    last_state: Option<EngagementState>,
}

impl Default for EngagementClassifier {
    fn default() -> Self {
        Self::with_config_unchecked(EngagementConfig::default())
    }
}

impl EngagementClassifier {
    /// Create a classifier with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier with a validated configuration
    pub fn with_config(config: EngagementConfig) -> Result<Self, FocusError> {
        config.validate()?;
        Ok(Self::with_config_unchecked(config))
    }

    fn with_config_unchecked(config: EngagementConfig) -> Self {
        Self {
            config,
            timers: HysteresisTimers::default(),
            history: ScoreHistory::default(),
            last_state: None,
        }
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn timers(&self) -> HysteresisTimers {
        self.timers
    }

    /// Classify one tick
    pub fn process_frame(&mut self, sample: &FrameSample, timestamp_ms: u64) -> EngagementMetrics {
        self.timers = self.timers.advance(sample, timestamp_ms);

        let state = determine_state(&self.timers, sample, timestamp_ms, &self.config);
        let score = compute_score(state, sample, &self.config);
        let confidence = compute_confidence(sample);

        if self.last_state != Some(state) {
            debug!(
                "engagement state {} -> {} at {}ms (score {})",
                self.last_state.map(|s| s.as_str()).unwrap_or("none"),
                state.as_str(),
                timestamp_ms,
                score
            );
            self.last_state = Some(state);
        }

        self.history.push(score);

        EngagementMetrics {
            state,
            score,
            confidence,
            timestamp_ms,
        }
    }

    /// Mean of the last `min(window_seconds, history)` scores, or the baseline when empty
    pub fn average_score(&self, window_seconds: usize) -> f64 {
        let n = window_seconds.min(self.history.len());
        if n == 0 {
            return self.config.baseline_score;
        }
        let sum: f64 = self.history.recent(n).map(f64::from).sum();
        sum / n as f64
    }

    /// Compare the newer half of the window with the older half
    ///
    /// This is a two-window delta, not a regression; a smoother estimator
    /// would fit a slope over the whole window instead.
    pub fn trend_direction(&self, window_seconds: usize) -> TrendDirection {
        let n = window_seconds.min(self.history.len());
        if n < MIN_TREND_SAMPLES {
            return TrendDirection::Stable;
        }

        let scores: Vec<f64> = self.history.recent(n).map(f64::from).collect();
        let (older, newer) = scores.split_at(n / 2);
        let delta = mean(newer) - mean(older);

        if delta > TREND_DELTA {
            TrendDirection::Improving
        } else if delta < -TREND_DELTA {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        }
    }

    /// Forget timers and history; configuration is kept
    pub fn reset(&mut self) {
        self.timers = HysteresisTimers::default();
        self.history.clear();
        self.last_state = None;
    }

    /// Apply a partial configuration update
    ///
    /// The merged config is validated first; on error the current config stays.
    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<(), FocusError> {
        let merged = self.config.merged(patch);
        if let Err(e) = merged.validate() {
            warn!("rejected engagement config update: {e}");
            return Err(e);
        }
        self.config = merged;
        Ok(())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
