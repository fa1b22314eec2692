//! Persistence contract for session aggregates
//!
//! Storage engines live outside this crate. They must accept one aggregate per
//! session id (re-submitting replaces it), reject malformed payloads, and
//! list aggregates by start time. `InMemorySessionStore` implements the
//! contract for tests and embedding hosts without a database.

use crate::encoder::{downsampled_len, AGGREGATE_SCHEMA_VERSION};
use crate::session::max_state_secs_drift;
use crate::types::SessionAggregate;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

/// Reasons a store rejects an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Invalid schema version: expected {expected}, got {actual}")]
    InvalidSchemaVersion { expected: String, actual: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Score out of range at offset {offset}: {score}")]
    ScoreOutOfRange { offset: u32, score: u8 },

    #[error("Series not ordered at index {index}")]
    UnorderedSeries { index: usize },

    #[error("Series has {actual} points, expected {expected}")]
    SeriesLengthMismatch { expected: usize, actual: usize },

    #[error("Per-state seconds sum to {sum}, duration is {duration}")]
    DurationMismatch { sum: u32, duration: u32 },

    #[error("Inconsistent record: {0}")]
    InconsistentRecord(String),
}

/// Outcome of a successful upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Check an aggregate against the storage contract
pub fn validate_aggregate(aggregate: &SessionAggregate) -> Result<(), StoreError> {
    if aggregate.schema_version != AGGREGATE_SCHEMA_VERSION {
        return Err(StoreError::InvalidSchemaVersion {
            expected: AGGREGATE_SCHEMA_VERSION.to_string(),
            actual: aggregate.schema_version.clone(),
        });
    }

    let record = &aggregate.record;
    if record.session_id.trim().is_empty() {
        return Err(StoreError::MissingField("record.session_id"));
    }
    if record.user_id.trim().is_empty() {
        return Err(StoreError::MissingField("record.user_id"));
    }

    if record.average_score > 100 {
        return Err(StoreError::InconsistentRecord(format!(
            "average score {} exceeds 100",
            record.average_score
        )));
    }
    if let Some(ended_at) = record.ended_at {
        if ended_at < record.started_at {
            return Err(StoreError::InconsistentRecord(
                "session ends before it starts".to_string(),
            ));
        }
    }

    let duration = record.total_duration_secs;
    if record.distracted_episodes > duration {
        return Err(StoreError::InconsistentRecord(format!(
            "{} episodes in a {}s session",
            record.distracted_episodes, duration
        )));
    }
    if record.yawn_count > duration {
        return Err(StoreError::InconsistentRecord(format!(
            "yawn count {} exceeds duration {}",
            record.yawn_count, duration
        )));
    }

    let sum = record.state_secs_total();
    if sum.abs_diff(duration) > max_state_secs_drift(duration) {
        return Err(StoreError::DurationMismatch { sum, duration });
    }

    let expected = downsampled_len(duration as usize);
    if aggregate.series.len() != expected {
        return Err(StoreError::SeriesLengthMismatch {
            expected,
            actual: aggregate.series.len(),
        });
    }

    for (index, point) in aggregate.series.iter().enumerate() {
        if point.score > 100 {
            return Err(StoreError::ScoreOutOfRange {
                offset: point.offset_seconds,
                score: point.score,
            });
        }
        if index > 0 && point.offset_seconds <= aggregate.series[index - 1].offset_seconds {
            return Err(StoreError::UnorderedSeries { index });
        }
    }

    Ok(())
}

/// Storage collaborator for finished sessions
pub trait SessionStore {
    /// Insert or replace the aggregate for its session id
    fn upsert(&mut self, aggregate: SessionAggregate) -> Result<UpsertOutcome, StoreError>;

    /// Aggregate for one session
    fn get(&self, session_id: &str) -> Option<&SessionAggregate>;

    /// Aggregates whose session started within `[from, to)`, oldest first
    fn list(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&SessionAggregate>;
}

/// Store keeping aggregates in memory, keyed by session id
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    aggregates: HashMap<String, SessionAggregate>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn upsert(&mut self, aggregate: SessionAggregate) -> Result<UpsertOutcome, StoreError> {
        validate_aggregate(&aggregate)?;

        let session_id = aggregate.record.session_id.clone();
        let outcome = match self.aggregates.insert(session_id.clone(), aggregate) {
            Some(_) => UpsertOutcome::Replaced,
            None => UpsertOutcome::Inserted,
        };
        debug!("stored aggregate for session {session_id} ({outcome:?})");
        Ok(outcome)
    }

    fn get(&self, session_id: &str) -> Option<&SessionAggregate> {
        self.aggregates.get(session_id)
    }

    fn list(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&SessionAggregate> {
        let mut found: Vec<&SessionAggregate> = self
            .aggregates
            .values()
            .filter(|a| a.record.started_at >= from && a.record.started_at < to)
            .collect();
        found.sort_by(|a, b| {
            a.record
                .started_at
                .cmp(&b.record.started_at)
                .then_with(|| a.record.session_id.cmp(&b.record.session_id))
        });
        found
    }
}
