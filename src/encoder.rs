//! Session aggregate encoder
//!
//! Downsamples the full-resolution series and wraps a session's record and
//! series into a storage-ready `SessionAggregate` payload.

use crate::error::FocusError;
use crate::types::{
    AggregateProducer, EngagementMetrics, SessionAggregate, SessionSummary, TimeSeriesPoint,
};
use crate::{FLUX_VERSION, PRODUCER_NAME};
use chrono::Utc;
use uuid::Uuid;

/// Schema identifier of stored session aggregates
pub const AGGREGATE_SCHEMA_VERSION: &str = "focus.session_aggregate.v1";

/// Keep every n-th tick of the full series
pub const DOWNSAMPLE_STRIDE: usize = 5;

/// Fixed-stride downsampling: ticks 0, 5, 10, ...
///
/// Lossy: up to four trailing ticks are dropped and extrema are not preserved.
pub fn downsample(metrics: &[EngagementMetrics]) -> Vec<TimeSeriesPoint> {
    metrics
        .iter()
        .enumerate()
        .step_by(DOWNSAMPLE_STRIDE)
        .map(|(index, m)| TimeSeriesPoint {
            offset_seconds: index as u32,
            state: m.state,
            score: m.score,
        })
        .collect()
}

/// Expected stored series length for a session of `ticks` ticks
pub fn downsampled_len(ticks: usize) -> usize {
    ticks.div_ceil(DOWNSAMPLE_STRIDE)
}

/// Encoder for session aggregates
pub struct SessionEncoder {
    instance_id: String,
}

impl Default for SessionEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wrap a session summary into a storage payload
    pub fn encode(&self, summary: &SessionSummary) -> SessionAggregate {
        SessionAggregate {
            schema_version: AGGREGATE_SCHEMA_VERSION.to_string(),
            producer: AggregateProducer {
                name: PRODUCER_NAME.to_string(),
                version: FLUX_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: Utc::now().to_rfc3339(),
            record: summary.record.clone(),
            series: summary.series.clone(),
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(&self, summary: &SessionSummary) -> Result<String, FocusError> {
        let aggregate = self.encode(summary);
        serde_json::to_string_pretty(&aggregate).map_err(FocusError::JsonError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngagementState, SessionRecord};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn full_series(n: usize) -> Vec<EngagementMetrics> {
        (0..n)
            .map(|i| EngagementMetrics {
                state: EngagementState::ALL[i % 4],
                score: (i % 101) as u8,
                confidence: 1.0,
                timestamp_ms: i as u64 * 1000,
            })
            .collect()
    }

    #[test]
    fn test_downsample_length_and_values() {
        for n in [0, 1, 4, 5, 6, 10, 23, 100] {
            let full = full_series(n);
            let stored = downsample(&full);

            assert_eq!(stored.len(), downsampled_len(n), "n = {n}");
            for (i, point) in stored.iter().enumerate() {
                assert_eq!(point.offset_seconds as usize, 5 * i);
                assert_eq!(point.state, full[5 * i].state);
                assert_eq!(point.score, full[5 * i].score);
            }
        }
    }

    #[test]
    fn test_downsample_drops_trailing_ticks() {
        let full = full_series(9);
        let stored = downsample(&full);

        assert_eq!(
            stored.iter().map(|p| p.offset_seconds).collect::<Vec<_>>(),
            vec![0, 5]
        );
    }

    #[test]
    fn test_encode_carries_producer_and_schema() {
        let summary = SessionSummary {
            record: SessionRecord {
                session_id: "sess-1".to_string(),
                user_id: "user-1".to_string(),
                started_at: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
                ended_at: None,
                total_duration_secs: 6,
                engaged_secs: 6,
                distracted_secs: 0,
                sleepy_secs: 0,
                away_secs: 0,
                yawn_count: 0,
                distracted_episodes: 0,
                average_score: 90,
                nudge_count: 0,
            },
            series: downsample(&full_series(6)),
        };

        let encoder = SessionEncoder::with_instance_id("instance-a".to_string());
        let aggregate = encoder.encode(&summary);

        assert_eq!(aggregate.schema_version, AGGREGATE_SCHEMA_VERSION);
        assert_eq!(aggregate.producer.name, PRODUCER_NAME);
        assert_eq!(aggregate.producer.instance_id, "instance-a");
        assert_eq!(aggregate.record, summary.record);

        let json = encoder.encode_to_json(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["record"]["session_id"], "sess-1");
        assert_eq!(value["series"][1]["offset_seconds"], 5);
        assert_eq!(value["series"][1]["state"], "distracted");
    }
}
