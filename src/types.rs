//! Core types for the Focus Flux pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: per-tick frame samples, per-tick engagement metrics, and the
//! session-level record and series handed to persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attentional state emitted once per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementState {
    Engaged,
    Distracted,
    Sleepy,
    Away,
}

impl EngagementState {
    /// All states in reporting order
    pub const ALL: [EngagementState; 4] = [
        EngagementState::Engaged,
        EngagementState::Distracted,
        EngagementState::Sleepy,
        EngagementState::Away,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementState::Engaged => "engaged",
            EngagementState::Distracted => "distracted",
            EngagementState::Sleepy => "sleepy",
            EngagementState::Away => "away",
        }
    }

    /// States that open (or extend) a distraction episode
    pub fn is_distracting(&self) -> bool {
        matches!(self, EngagementState::Distracted | EngagementState::Sleepy)
    }

    /// States for which a caller may consider nudging the user
    pub fn warrants_nudge(&self) -> bool {
        !matches!(self, EngagementState::Engaged)
    }
}

/// Facial expression label reported by the expression detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ExpressionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionLabel::Neutral => "neutral",
            ExpressionLabel::Happy => "happy",
            ExpressionLabel::Sad => "sad",
            ExpressionLabel::Angry => "angry",
            ExpressionLabel::Fearful => "fearful",
            ExpressionLabel::Disgusted => "disgusted",
            ExpressionLabel::Surprised => "surprised",
            ExpressionLabel::Unknown => "unknown",
        }
    }

    /// Parse a detector label; anything unrecognised maps to `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "neutral" => ExpressionLabel::Neutral,
            "happy" => ExpressionLabel::Happy,
            "sad" => ExpressionLabel::Sad,
            "angry" => ExpressionLabel::Angry,
            "fearful" => ExpressionLabel::Fearful,
            "disgusted" => ExpressionLabel::Disgusted,
            "surprised" => ExpressionLabel::Surprised,
            _ => ExpressionLabel::Unknown,
        }
    }

    /// Expressions that count as a distraction cue
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            ExpressionLabel::Sad
                | ExpressionLabel::Angry
                | ExpressionLabel::Fearful
                | ExpressionLabel::Disgusted
                | ExpressionLabel::Surprised
        )
    }

    /// Expressions that earn the positive-expression score bonus
    pub fn is_positive(&self) -> bool {
        matches!(self, ExpressionLabel::Happy | ExpressionLabel::Neutral)
    }
}

/// One tick's worth of face and hand signals
///
/// `Default` is the total-detection-failure sample: no face, no hands, zeroed
/// ratios and an unknown expression.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSample {
    /// Whether a face was detected this tick
    pub face_present: bool,
    /// Eye aspect ratio (0 when not measured)
    pub eye_aspect_ratio: f64,
    /// Mouth open ratio (0 when not measured)
    pub mouth_open_ratio: f64,
    /// Eye aspect ratio below the eyes-closed threshold
    pub eyes_closed: bool,
    /// Mouth open ratio above the yawn threshold
    pub yawning: bool,
    /// Head yaw beyond the look-away threshold
    pub looking_away: bool,
    /// Dominant expression
    pub expression: ExpressionLabel,
    /// Raw expression probabilities keyed by label
    pub expression_scores: HashMap<String, f64>,
    /// Whether any hand was detected this tick
    pub hands_present: bool,
    /// Fidgeting intensity above the fidgeting threshold
    pub hands_fidgeting: bool,
    /// A hand overlaps the face region
    pub hand_over_face: bool,
    /// Hand movement intensity (0 when no hands)
    pub fidgeting_intensity: f64,
}

impl FrameSample {
    /// Sample produced when no detector returned anything
    pub fn absent() -> Self {
        Self::default()
    }
}

/// A frame sample paired with its monotonic timestamp, as read from replay input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedFrame {
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Frame signals
    #[serde(flatten)]
    pub sample: FrameSample,
}

/// Per-tick classifier output. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub state: EngagementState,
    /// Engagement score (0-100)
    pub score: u8,
    /// Detection quality (0-1)
    pub confidence: f64,
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: u64,
}

/// Direction of the recent score trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

/// Share of ticks spent in each state, as rounded percentages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementStats {
    pub engaged: u32,
    pub distracted: u32,
    pub sleepy: u32,
    pub away: u32,
}

impl EngagementStats {
    pub fn get(&self, state: EngagementState) -> u32 {
        match state {
            EngagementState::Engaged => self.engaged,
            EngagementState::Distracted => self.distracted,
            EngagementState::Sleepy => self.sleepy,
            EngagementState::Away => self.away,
        }
    }
}

/// Aggregate statistics for one finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Session length in ticks (one tick is roughly one second)
    pub total_duration_secs: u32,
    pub engaged_secs: u32,
    pub distracted_secs: u32,
    pub sleepy_secs: u32,
    pub away_secs: u32,
    /// Number of sleepy ticks (approximation of yawn activity)
    pub yawn_count: u32,
    /// Maximal runs of distracted/sleepy ticks
    pub distracted_episodes: u32,
    /// Mean score over the session (rounded)
    pub average_score: u8,
    pub nudge_count: u32,
}

impl SessionRecord {
    /// Sum of the four per-state durations
    pub fn state_secs_total(&self) -> u32 {
        self.engaged_secs + self.distracted_secs + self.sleepy_secs + self.away_secs
    }
}

/// Downsampled point of the stored session series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Offset from session start, in ticks
    pub offset_seconds: u32,
    pub state: EngagementState,
    pub score: u8,
}

/// Everything produced when a session stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub record: SessionRecord,
    pub series: Vec<TimeSeriesPoint>,
}

/// Producer metadata embedded in stored aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Storage-ready payload for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub schema_version: String,
    pub producer: AggregateProducer,
    pub computed_at_utc: String,
    pub record: SessionRecord,
    pub series: Vec<TimeSeriesPoint>,
}
