//! Session lifecycle and aggregation
//!
//! The aggregator owns at most one session at a time, appends one
//! `EngagementMetrics` per unpaused tick, and on stop reduces the
//! full-resolution series to a `SessionRecord` plus a downsampled series.
//!
//! Durations are counted in ticks (one tick is roughly one second), not wall
//! clock, so paused gaps and tick jitter never leak into the statistics.

use crate::encoder::downsample;
use crate::error::FocusError;
use crate::types::{
    EngagementMetrics, EngagementState, EngagementStats, SessionRecord, SessionSummary,
};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimum time between two nudges (milliseconds)
pub const NUDGE_COOLDOWN_MS: u64 = 60_000;

/// One focus session and its full-resolution series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub is_paused: bool,
    /// One record per unpaused tick, in arrival order
    pub metrics: Vec<EngagementMetrics>,
    pub last_nudge_ms: Option<u64>,
    pub nudge_count: u32,
}

impl Session {
    fn new(user_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            started_at,
            ended_at: None,
            is_active: true,
            is_paused: false,
            metrics: Vec::new(),
            last_nudge_ms: None,
            nudge_count: 0,
        }
    }

    /// Session length in ticks
    pub fn duration_secs(&self) -> u32 {
        self.metrics.len() as u32
    }
}

/// Rounded percentage of ticks spent in each state (all zero for an empty series)
pub fn engagement_stats(metrics: &[EngagementMetrics]) -> EngagementStats {
    let total = metrics.len();
    if total == 0 {
        return EngagementStats::default();
    }

    let pct = |state: EngagementState| {
        let count = metrics.iter().filter(|m| m.state == state).count();
        ((count as f64 / total as f64) * 100.0).round() as u32
    };

    EngagementStats {
        engaged: pct(EngagementState::Engaged),
        distracted: pct(EngagementState::Distracted),
        sleepy: pct(EngagementState::Sleepy),
        away: pct(EngagementState::Away),
    }
}

/// Number of maximal runs of distracted/sleepy ticks
///
/// Counts rising edges only: a run extending across both states is one episode.
pub fn count_distraction_episodes(metrics: &[EngagementMetrics]) -> u32 {
    let mut episodes = 0;
    let mut in_episode = false;

    for m in metrics {
        let distracting = m.state.is_distracting();
        if distracting && !in_episode {
            episodes += 1;
        }
        in_episode = distracting;
    }

    episodes
}

/// Number of sleepy ticks, stored as the session's yawn count
pub fn count_sleepy_ticks(metrics: &[EngagementMetrics]) -> u32 {
    metrics
        .iter()
        .filter(|m| m.state == EngagementState::Sleepy)
        .count() as u32
}

fn average_score(metrics: &[EngagementMetrics]) -> u8 {
    if metrics.is_empty() {
        return 0;
    }
    let sum: f64 = metrics.iter().map(|m| f64::from(m.score)).sum();
    (sum / metrics.len() as f64).round() as u8
}

/// Seconds spent in a state, reconstructed from its rounded percentage
fn seconds_from_percentage(percentage: u32, total_secs: u32) -> u32 {
    ((f64::from(percentage) / 100.0) * f64::from(total_secs)).round() as u32
}

/// Largest possible gap between the per-state seconds sum and the duration
///
/// Each of the four percentages may be off by half a percent and each
/// reconstructed duration by half a second.
pub fn max_state_secs_drift(total_secs: u32) -> u32 {
    EngagementState::ALL.len() as u32 + total_secs / 50
}

impl SessionRecord {
    /// Compute the aggregate record for a session from its retained series
    ///
    /// Pure over the session, so a failed write can be retried with an
    /// identical record.
    pub fn from_session(session: &Session) -> Self {
        let total = session.duration_secs();
        let stats = engagement_stats(&session.metrics);

        SessionRecord {
            session_id: session.id.clone(),
            user_id: session.user_id.clone(),
            started_at: session.started_at,
            ended_at: session.ended_at,
            total_duration_secs: total,
            engaged_secs: seconds_from_percentage(stats.engaged, total),
            distracted_secs: seconds_from_percentage(stats.distracted, total),
            sleepy_secs: seconds_from_percentage(stats.sleepy, total),
            away_secs: seconds_from_percentage(stats.away, total),
            yawn_count: count_sleepy_ticks(&session.metrics),
            distracted_episodes: count_distraction_episodes(&session.metrics),
            average_score: average_score(&session.metrics),
            nudge_count: session.nudge_count,
        }
    }
}

impl SessionSummary {
    /// Record plus downsampled series for a session
    pub fn from_session(session: &Session) -> Self {
        Self {
            record: SessionRecord::from_session(session),
            series: downsample(&session.metrics),
        }
    }
}

/// Owner of the current session's lifecycle
#[derive(Debug, Default)]
pub struct SessionAggregator {
    current: Option<Session>,
    /// Most recently stopped session, kept so its aggregate can be recomputed
    finished: Option<Session>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session for `user_id`
    pub fn start(&mut self, user_id: &str) -> Result<&Session, FocusError> {
        self.start_at(user_id, Utc::now())
    }

    /// Start a new session with an explicit start time
    pub fn start_at(
        &mut self,
        user_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<&Session, FocusError> {
        if let Some(active) = &self.current {
            warn!("start requested while session {} is active", active.id);
            return Err(FocusError::SessionAlreadyActive(active.id.clone()));
        }

        let session = Session::new(user_id, started_at);
        info!("session {} started for user {}", session.id, user_id);
        Ok(self.current.insert(session))
    }

    /// The active session, if any
    pub fn session(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// The most recently stopped session
    pub fn finished_session(&self) -> Option<&Session> {
        self.finished.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.current.as_ref().is_some_and(|s| s.is_paused)
    }

    fn active_mut(&mut self) -> Result<&mut Session, FocusError> {
        self.current.as_mut().ok_or(FocusError::NoActiveSession)
    }

    pub fn pause(&mut self) -> Result<(), FocusError> {
        let session = self.active_mut()?;
        if !session.is_paused {
            session.is_paused = true;
            debug!("session {} paused after {} ticks", session.id, session.metrics.len());
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), FocusError> {
        let session = self.active_mut()?;
        if session.is_paused {
            session.is_paused = false;
            debug!("session {} resumed", session.id);
        }
        Ok(())
    }

    /// Append one tick's metrics; ignored while paused
    pub fn add_metrics(&mut self, metrics: EngagementMetrics) -> Result<(), FocusError> {
        let session = self.active_mut()?;
        if session.is_paused {
            return Ok(());
        }
        session.metrics.push(metrics);
        Ok(())
    }

    /// Record that a nudge was shown at `now_ms`
    pub fn record_nudge(&mut self, now_ms: u64) -> Result<(), FocusError> {
        let session = self.active_mut()?;
        session.last_nudge_ms = Some(now_ms);
        session.nudge_count += 1;
        debug!("nudge #{} recorded for session {}", session.nudge_count, session.id);
        Ok(())
    }

    /// Cooldown gate: true if no nudge has been recorded or the last one is old enough
    ///
    /// Does not look at the engagement state; callers decide whether a nudge is
    /// warranted. Always false without an active session.
    pub fn should_show_nudge(&self, now_ms: u64) -> bool {
        match &self.current {
            Some(session) => match session.last_nudge_ms {
                None => true,
                Some(last) => now_ms.saturating_sub(last) >= NUDGE_COOLDOWN_MS,
            },
            None => false,
        }
    }

    /// Per-state percentages of the active session, or of the last finished one
    pub fn engagement_stats(&self) -> EngagementStats {
        self.current
            .as_ref()
            .or(self.finished.as_ref())
            .map(|s| engagement_stats(&s.metrics))
            .unwrap_or_default()
    }

    /// Stop the active session and compute its record and stored series
    pub fn stop(&mut self) -> Result<SessionSummary, FocusError> {
        self.stop_at(Utc::now())
    }

    /// Stop the active session with an explicit end time
    pub fn stop_at(&mut self, ended_at: DateTime<Utc>) -> Result<SessionSummary, FocusError> {
        let mut session = self.current.take().ok_or(FocusError::NoActiveSession)?;
        session.is_active = false;
        session.is_paused = false;
        session.ended_at = Some(ended_at);

        let summary = SessionSummary::from_session(&session);
        info!(
            "session {} stopped: {}s, {} episodes, average score {}",
            session.id,
            summary.record.total_duration_secs,
            summary.record.distracted_episodes,
            summary.record.average_score
        );

        self.finished = Some(session);
        Ok(summary)
    }
}
