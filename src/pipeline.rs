//! Per-tick pipeline orchestration
//!
//! This module provides the public API that composes the classifier and the
//! session aggregator into one tick, plus a stateless one-shot replay of a
//! recorded frame stream.

use crate::adapter::{ObservationFrame, SignalAdapter};
use crate::classifier::EngagementClassifier;
use crate::config::{ConfigPatch, EngagementConfig};
use crate::encoder::SessionEncoder;
use crate::error::FocusError;
use crate::session::{Session, SessionAggregator};
use crate::types::{
    EngagementMetrics, EngagementState, EngagementStats, FrameSample, SessionAggregate,
    SessionSummary, TimedFrame, TrendDirection,
};
use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub metrics: EngagementMetrics,
    /// A nudge was recorded on this tick
    pub nudge: bool,
}

/// Parse replay input: either a JSON array of records or one record per line
pub fn parse_records<T: DeserializeOwned>(input: &str) -> Result<Vec<T>, FocusError> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line.trim()).map_err(|e| {
                FocusError::ParseError(format!("record on line {}: {}", index + 1, e))
            })
        })
        .collect()
}

/// Parse replay input of frame samples with already-derived flags
pub fn parse_frames(input: &str) -> Result<Vec<TimedFrame>, FocusError> {
    parse_records(input)
}

/// Replay recorded frames as one session and return the aggregate (stateless, one-shot).
///
/// # Arguments
/// * `frames_json` - NDJSON or a JSON array of timestamped frame samples
/// * `user_id` - Owner of the replayed session
/// * `config` - Classifier configuration (validated)
///
/// # Example
/// ```ignore
/// let aggregate = replay_to_aggregate(&frames, "user-1", EngagementConfig::default())?;
/// ```
pub fn replay_to_aggregate(
    frames_json: &str,
    user_id: &str,
    config: EngagementConfig,
) -> Result<SessionAggregate, FocusError> {
    let frames = parse_frames(frames_json)?;

    let mut processor = FocusProcessor::with_config(config)?;
    processor.start_session(user_id)?;
    for frame in &frames {
        processor.tick(&frame.sample, frame.timestamp_ms)?;
    }
    let summary = processor.stop_session()?;

    Ok(processor.encoder.encode(&summary))
}

/// Stateful processor owning one classifier and one session aggregator.
///
/// One processor serves one user; create separate processors for concurrent
/// users so timers and histories are never shared.
pub struct FocusProcessor {
    classifier: EngagementClassifier,
    aggregator: SessionAggregator,
    encoder: SessionEncoder,
    /// State seen on the previous tick, for nudge edge detection
    last_state: Option<EngagementState>,
}

impl Default for FocusProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusProcessor {
    /// Create a processor with default configuration
    pub fn new() -> Self {
        Self {
            classifier: EngagementClassifier::new(),
            aggregator: SessionAggregator::new(),
            encoder: SessionEncoder::new(),
            last_state: None,
        }
    }

    /// Create a processor with a validated configuration
    pub fn with_config(config: EngagementConfig) -> Result<Self, FocusError> {
        Ok(Self {
            classifier: EngagementClassifier::with_config(config)?,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &EngagementConfig {
        self.classifier.config()
    }

    pub fn classifier(&self) -> &EngagementClassifier {
        &self.classifier
    }

    pub fn aggregator(&self) -> &SessionAggregator {
        &self.aggregator
    }

    pub fn encoder(&self) -> &SessionEncoder {
        &self.encoder
    }

    pub fn session(&self) -> Option<&Session> {
        self.aggregator.session()
    }

    /// Start a session; the classifier starts from clean timers and history
    pub fn start_session(&mut self, user_id: &str) -> Result<&Session, FocusError> {
        self.start_session_at(user_id, Utc::now())
    }

    pub fn start_session_at(
        &mut self,
        user_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<&Session, FocusError> {
        if self.aggregator.is_active() {
            // Surface the misuse without resetting the running classifier
            return self.aggregator.start_at(user_id, started_at);
        }
        self.classifier.reset();
        self.last_state = None;
        self.aggregator.start_at(user_id, started_at)
    }

    pub fn pause_session(&mut self) -> Result<(), FocusError> {
        self.aggregator.pause()
    }

    pub fn resume_session(&mut self) -> Result<(), FocusError> {
        self.aggregator.resume()
    }

    pub fn is_paused(&self) -> bool {
        self.aggregator.is_paused()
    }

    /// Classify one frame, append it to the session and decide on a nudge
    ///
    /// A nudge is recorded when the state warrants one, differs from the
    /// previous tick's state, and the cooldown gate is open.
    pub fn tick(
        &mut self,
        sample: &FrameSample,
        timestamp_ms: u64,
    ) -> Result<TickOutcome, FocusError> {
        if !self.aggregator.is_active() {
            return Err(FocusError::NoActiveSession);
        }

        let metrics = self.classifier.process_frame(sample, timestamp_ms);
        self.aggregator.add_metrics(metrics)?;

        let changed = self.last_state != Some(metrics.state);
        self.last_state = Some(metrics.state);

        let mut nudge = false;
        if !self.aggregator.is_paused()
            && changed
            && metrics.state.warrants_nudge()
            && self.aggregator.should_show_nudge(timestamp_ms)
        {
            self.aggregator.record_nudge(timestamp_ms)?;
            debug!("nudge for {} at {}ms", metrics.state.as_str(), timestamp_ms);
            nudge = true;
        }

        Ok(TickOutcome { metrics, nudge })
    }

    /// Derive a frame from raw observations with the configured thresholds, then tick
    pub fn tick_observations(
        &mut self,
        frame: &ObservationFrame,
    ) -> Result<TickOutcome, FocusError> {
        let sample = SignalAdapter::frame(
            frame.face.as_ref(),
            frame.hands.as_ref(),
            &self.config().thresholds,
        );
        self.tick(&sample, frame.timestamp_ms)
    }

    /// Stop the session and return its record and stored series
    pub fn stop_session(&mut self) -> Result<SessionSummary, FocusError> {
        self.stop_session_at(Utc::now())
    }

    pub fn stop_session_at(
        &mut self,
        ended_at: DateTime<Utc>,
    ) -> Result<SessionSummary, FocusError> {
        let summary = self.aggregator.stop_at(ended_at)?;
        self.last_state = None;
        Ok(summary)
    }

    /// Storage payload for the last stopped session, recomputed from its series
    pub fn finished_aggregate(&self) -> Option<SessionAggregate> {
        self.aggregator
            .finished_session()
            .map(|session| self.encoder.encode(&SessionSummary::from_session(session)))
    }

    pub fn engagement_stats(&self) -> EngagementStats {
        self.aggregator.engagement_stats()
    }

    pub fn average_score(&self, window_seconds: usize) -> f64 {
        self.classifier.average_score(window_seconds)
    }

    pub fn trend_direction(&self, window_seconds: usize) -> TrendDirection {
        self.classifier.trend_direction(window_seconds)
    }

    pub fn update_config(&mut self, patch: &ConfigPatch) -> Result<(), FocusError> {
        self.classifier.update_config(patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::FaceObservation;
    use crate::store::{validate_aggregate, InMemorySessionStore, SessionStore};
    use crate::types::ExpressionLabel;
    use pretty_assertions::assert_eq;

    fn attentive() -> FrameSample {
        FrameSample {
            face_present: true,
            eye_aspect_ratio: 0.3,
            mouth_open_ratio: 0.1,
            expression: ExpressionLabel::Happy,
            ..Default::default()
        }
    }

    fn fidgeting() -> FrameSample {
        FrameSample {
            hands_present: true,
            hands_fidgeting: true,
            fidgeting_intensity: 0.9,
            ..attentive()
        }
    }

    fn sample_ndjson() -> String {
        let mut lines = Vec::new();
        for i in 0..12u64 {
            let face_present = !(4..8).contains(&i);
            let ear = if face_present { 0.3 } else { 0.0 };
            let frame = serde_json::json!({
                "timestamp_ms": i * 1000,
                "face_present": face_present,
                "eye_aspect_ratio": ear,
                "expression": "neutral",
            });
            lines.push(frame.to_string());
        }
        lines.join("\n")
    }

    #[test]
    fn test_tick_requires_session() {
        let mut processor = FocusProcessor::new();
        assert!(matches!(
            processor.tick(&attentive(), 0),
            Err(FocusError::NoActiveSession)
        ));
    }

    #[test]
    fn test_nudge_on_state_change_with_cooldown() {
        let mut processor = FocusProcessor::new();
        processor.start_session("user").unwrap();

        let script = [
            (attentive(), 0, false),
            (fidgeting(), 1_000, true),
            (fidgeting(), 2_000, false),
            (attentive(), 3_000, false),
            // state changed again but still inside the cooldown
            (fidgeting(), 4_000, false),
            (attentive(), 70_000, false),
            (fidgeting(), 71_000, true),
        ];

        for (sample, ts, expected) in script {
            let outcome = processor.tick(&sample, ts).unwrap();
            assert_eq!(outcome.nudge, expected, "tick at {ts}ms");
        }
        assert_eq!(processor.session().unwrap().nudge_count, 2);
    }

    #[test]
    fn test_paused_ticks_not_recorded() {
        let mut processor = FocusProcessor::new();
        processor.start_session("user").unwrap();

        processor.tick(&attentive(), 0).unwrap();
        processor.pause_session().unwrap();
        let outcome = processor.tick(&fidgeting(), 1_000).unwrap();
        assert!(!outcome.nudge);
        processor.resume_session().unwrap();
        processor.tick(&attentive(), 2_000).unwrap();

        let summary = processor.stop_session().unwrap();
        assert_eq!(summary.record.total_duration_secs, 2);
        assert_eq!(summary.record.nudge_count, 0);
    }

    #[test]
    fn test_start_resets_classifier() {
        let mut processor = FocusProcessor::new();
        processor.start_session("user").unwrap();
        processor.tick(&FrameSample::absent(), 0).unwrap();
        processor.tick(&FrameSample::absent(), 1_000).unwrap();
        processor.stop_session().unwrap();

        processor.start_session("user").unwrap();
        assert_eq!(processor.classifier().timers().face_absent_since, None);
        let outcome = processor.tick(&FrameSample::absent(), 2_000).unwrap();
        assert_eq!(outcome.metrics.state, EngagementState::Distracted);
    }

    #[test]
    fn test_second_start_keeps_running_session() {
        let mut processor = FocusProcessor::new();
        processor.start_session("user").unwrap();
        processor.tick(&attentive(), 0).unwrap();

        assert!(processor.start_session("user").is_err());
        assert_eq!(processor.session().unwrap().metrics.len(), 1);
        assert_eq!(processor.classifier().average_score(30), 90.0);
    }

    #[test]
    fn test_replay_to_aggregate() {
        let aggregate =
            replay_to_aggregate(&sample_ndjson(), "user-9", EngagementConfig::default()).unwrap();
        let record = &aggregate.record;

        // ticks 4-7 absent: 4,5 distracted, 6,7 away
        assert_eq!(record.user_id, "user-9");
        assert_eq!(record.total_duration_secs, 12);
        assert_eq!(record.distracted_episodes, 1);
        assert_eq!(record.yawn_count, 0);
        assert_eq!(record.away_secs, 2);
        assert_eq!(aggregate.series.len(), 3);
        assert_eq!(aggregate.series[1].state, EngagementState::Distracted);

        assert_eq!(validate_aggregate(&aggregate), Ok(()));
    }

    #[test]
    fn test_parse_frames_array_and_errors() {
        let input = r#"[{"timestamp_ms": 0}, {"timestamp_ms": 1000, "face_present": true}]"#;
        let frames = parse_frames(input).unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].sample.face_present);

        let err = parse_frames("{\"timestamp_ms\": 0}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_finished_aggregate_is_recomputable() {
        let mut processor = FocusProcessor::new();
        assert!(processor.finished_aggregate().is_none());

        processor.start_session("user").unwrap();
        for i in 0..9 {
            processor.tick(&attentive(), i * 1000).unwrap();
        }
        let summary = processor.stop_session().unwrap();

        let first = processor.finished_aggregate().unwrap();
        let retry = processor.finished_aggregate().unwrap();
        assert_eq!(first.record, summary.record);
        assert_eq!(first.series, retry.series);

        let mut store = InMemorySessionStore::new();
        store.upsert(first).unwrap();
        store.upsert(retry).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_threshold_patch_changes_derived_flags() {
        let mut processor = FocusProcessor::new();
        processor.start_session("user").unwrap();

        let frame = ObservationFrame {
            timestamp_ms: 0,
            face: Some(FaceObservation {
                eye_aspect_ratio: 0.25,
                ..Default::default()
            }),
            hands: None,
        };
        let before = processor.tick_observations(&frame).unwrap();
        assert_eq!(before.metrics.state, EngagementState::Engaged);

        let patch = ConfigPatch {
            eye_closed_threshold: Some(0.3),
            eye_closed_duration: Some(0.0),
            ..Default::default()
        };
        processor.update_config(&patch).unwrap();

        let after = processor
            .tick_observations(&ObservationFrame {
                timestamp_ms: 1_000,
                ..frame
            })
            .unwrap();
        assert_eq!(after.metrics.state, EngagementState::Sleepy);
        assert_eq!(processor.classifier().timers().eyes_closed_since, Some(1_000));
    }
}
