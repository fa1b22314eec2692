//! Signal adaptation
//!
//! Converts detector observations into a `FrameSample`. Detectors are injected
//! instances owned by the caller; a detector that is unavailable or fails for a
//! tick degrades the sample to "absent" instead of failing the tick.

use crate::config::DetectorThresholds;
use crate::types::{ExpressionLabel, FrameSample};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

/// Face geometry reported by a face landmark detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceObservation {
    pub eye_aspect_ratio: f64,
    pub mouth_open_ratio: f64,
    /// Signed horizontal head turn, normalised so 0 is facing the camera
    pub head_yaw_ratio: f64,
    /// Expression probabilities keyed by label
    pub expression_scores: HashMap<String, f64>,
}

/// Hand activity reported by a hand landmark detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandObservation {
    pub hands_present: bool,
    pub hand_over_face: bool,
    pub fidgeting_intensity: f64,
}

/// Error returned by a detector for a single tick
#[derive(Debug, Clone, thiserror::Error)]
#[error("{detector} detector failed: {message}")]
pub struct DetectorError {
    pub detector: &'static str,
    pub message: String,
}

/// Face landmark detector producing at most one observation per call
pub trait FaceDetector: Send {
    fn detect_face(
        &mut self,
    ) -> impl Future<Output = Result<Option<FaceObservation>, DetectorError>> + Send;
}

/// Hand landmark detector producing at most one observation per call
pub trait HandDetector: Send {
    fn detect_hands(
        &mut self,
    ) -> impl Future<Output = Result<Option<HandObservation>, DetectorError>> + Send;
}

/// Anything that can produce one frame sample per tick
pub trait SignalSource: Send {
    fn acquire(&mut self) -> impl Future<Output = FrameSample> + Send;

    /// Thresholds for deriving flags, pushed before every acquisition.
    /// Sources that emit already-derived flags can ignore them.
    fn set_thresholds(&mut self, _thresholds: DetectorThresholds) {}
}

/// Raw detector observations for one tick, as read from replay input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationFrame {
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: u64,
    pub face: Option<FaceObservation>,
    pub hands: Option<HandObservation>,
}

/// Stateless conversion from observations to frame samples
pub struct SignalAdapter;

impl SignalAdapter {
    /// Build a frame sample, treating a missing observation as absence
    pub fn frame(
        face: Option<&FaceObservation>,
        hands: Option<&HandObservation>,
        thresholds: &DetectorThresholds,
    ) -> FrameSample {
        let mut sample = FrameSample::absent();

        if let Some(face) = face {
            let eye_aspect_ratio = non_negative(face.eye_aspect_ratio);
            let mouth_open_ratio = non_negative(face.mouth_open_ratio);

            sample.face_present = true;
            sample.eye_aspect_ratio = eye_aspect_ratio;
            sample.mouth_open_ratio = mouth_open_ratio;
            sample.eyes_closed = eye_aspect_ratio < thresholds.eye_closed_threshold;
            sample.yawning = mouth_open_ratio > thresholds.yawn_threshold;
            sample.looking_away = face.head_yaw_ratio.abs() > thresholds.look_away_threshold;
            sample.expression = dominant_expression(&face.expression_scores);
            sample.expression_scores = face.expression_scores.clone();
        }

        if let Some(hands) = hands.filter(|h| h.hands_present) {
            let intensity = non_negative(hands.fidgeting_intensity);

            sample.hands_present = true;
            sample.hand_over_face = hands.hand_over_face;
            sample.fidgeting_intensity = intensity;
            sample.hands_fidgeting = intensity > thresholds.fidgeting_threshold;
        }

        sample
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Highest-scoring expression; `Unknown` when there are no usable scores
fn dominant_expression(scores: &HashMap<String, f64>) -> ExpressionLabel {
    scores
        .iter()
        .filter(|(_, score)| score.is_finite())
        .max_by(|(la, a), (lb, b)| a.total_cmp(b).then_with(|| lb.cmp(la)))
        .map(|(label, _)| ExpressionLabel::from_label(label))
        .unwrap_or(ExpressionLabel::Unknown)
}

/// Signal source backed by a face detector and an optional hand detector
pub struct DetectorSource<F, H> {
    face: F,
    hands: Option<H>,
    thresholds: DetectorThresholds,
}

impl<F: FaceDetector, H: HandDetector> DetectorSource<F, H> {
    /// Starts from default thresholds until a runner pushes the configured ones
    pub fn new(face: F, hands: Option<H>) -> Self {
        Self {
            face,
            hands,
            thresholds: DetectorThresholds::default(),
        }
    }

    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }
}

impl<F: FaceDetector, H: HandDetector> SignalSource for DetectorSource<F, H> {
    fn set_thresholds(&mut self, thresholds: DetectorThresholds) {
        self.thresholds = thresholds;
    }

    async fn acquire(&mut self) -> FrameSample {
        let face = match self.face.detect_face().await {
            Ok(face) => face,
            Err(e) => {
                warn!("{e}; treating face as absent");
                None
            }
        };

        let hands = match self.hands.as_mut() {
            Some(detector) => match detector.detect_hands().await {
                Ok(hands) => hands,
                Err(e) => {
                    warn!("{e}; treating hands as absent");
                    None
                }
            },
            None => None,
        };

        SignalAdapter::frame(face.as_ref(), hands.as_ref(), &self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    fn face(ear: f64, mor: f64, yaw: f64) -> FaceObservation {
        FaceObservation {
            eye_aspect_ratio: ear,
            mouth_open_ratio: mor,
            head_yaw_ratio: yaw,
            expression_scores: HashMap::from([
                ("neutral".to_string(), 0.7),
                ("happy".to_string(), 0.2),
                ("sad".to_string(), 0.1),
            ]),
        }
    }

    struct ScriptedFace(VecDeque<Result<Option<FaceObservation>, DetectorError>>);

    impl FaceDetector for ScriptedFace {
        async fn detect_face(&mut self) -> Result<Option<FaceObservation>, DetectorError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    struct ScriptedHands(VecDeque<Result<Option<HandObservation>, DetectorError>>);

    impl HandDetector for ScriptedHands {
        async fn detect_hands(&mut self) -> Result<Option<HandObservation>, DetectorError> {
            self.0.pop_front().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn test_missing_observations_are_absent() {
        let sample = SignalAdapter::frame(None, None, &DetectorThresholds::default());
        assert_eq!(sample, FrameSample::default());
    }

    #[test]
    fn test_flags_derived_from_thresholds() {
        let thresholds = DetectorThresholds::default();

        let open = SignalAdapter::frame(Some(&face(0.3, 0.2, 0.05)), None, &thresholds);
        assert!(open.face_present);
        assert!(!open.eyes_closed);
        assert!(!open.yawning);
        assert!(!open.looking_away);
        assert_eq!(open.expression, ExpressionLabel::Neutral);

        let tired = SignalAdapter::frame(Some(&face(0.1, 0.75, -0.4)), None, &thresholds);
        assert!(tired.eyes_closed);
        assert!(tired.yawning);
        assert!(tired.looking_away);
    }

    #[test]
    fn test_negative_ratios_clamped() {
        let sample = SignalAdapter::frame(
            Some(&face(-0.5, f64::NAN, 0.0)),
            None,
            &DetectorThresholds::default(),
        );
        assert_eq!(sample.eye_aspect_ratio, 0.0);
        assert_eq!(sample.mouth_open_ratio, 0.0);
    }

    #[test]
    fn test_empty_expression_scores_unknown() {
        let observation = FaceObservation {
            eye_aspect_ratio: 0.3,
            ..Default::default()
        };
        let sample =
            SignalAdapter::frame(Some(&observation), None, &DetectorThresholds::default());
        assert_eq!(sample.expression, ExpressionLabel::Unknown);
    }

    #[test]
    fn test_hand_flags() {
        let hands = HandObservation {
            hands_present: true,
            hand_over_face: true,
            fidgeting_intensity: 0.8,
        };
        let sample = SignalAdapter::frame(None, Some(&hands), &DetectorThresholds::default());

        assert!(sample.hands_present);
        assert!(sample.hands_fidgeting);
        assert!(sample.hand_over_face);
        assert!(!sample.face_present);

        let idle = HandObservation {
            hands_present: false,
            hand_over_face: true,
            fidgeting_intensity: 0.9,
        };
        let sample = SignalAdapter::frame(None, Some(&idle), &DetectorThresholds::default());
        assert!(!sample.hands_present);
        assert!(!sample.hand_over_face);
    }

    #[tokio::test]
    async fn test_detector_failure_degrades_to_absent() {
        let face_detector = ScriptedFace(VecDeque::from([
            Err(DetectorError {
                detector: "face",
                message: "model not loaded".to_string(),
            }),
            Ok(Some(face(0.3, 0.1, 0.0))),
        ]));
        let hand_detector = ScriptedHands(VecDeque::from([Err(DetectorError {
            detector: "hands",
            message: "timeout".to_string(),
        })]));

        let mut source = DetectorSource::new(face_detector, Some(hand_detector));

        let first = source.acquire().await;
        assert_eq!(first, FrameSample::absent());

        let second = source.acquire().await;
        assert!(second.face_present);
        assert!(!second.hands_present);
    }

    #[tokio::test]
    async fn test_pushed_thresholds_drive_flags() {
        let script = VecDeque::from([
            Ok(Some(face(0.25, 0.1, 0.0))),
            Ok(Some(face(0.25, 0.1, 0.0))),
        ]);
        let mut source = DetectorSource::new(ScriptedFace(script), None::<ScriptedHands>);

        assert!(!source.acquire().await.eyes_closed);

        source.set_thresholds(DetectorThresholds {
            eye_closed_threshold: 0.3,
            ..DetectorThresholds::default()
        });
        assert_eq!(source.thresholds().eye_closed_threshold, 0.3);
        assert!(source.acquire().await.eyes_closed);
    }

    #[test]
    fn test_observation_frame_parses_missing_detectors() {
        let frame: ObservationFrame = serde_json::from_str(
            r#"{"timestamp_ms": 2000, "face": {"eye_aspect_ratio": 0.25}}"#,
        )
        .unwrap();

        assert_eq!(frame.timestamp_ms, 2000);
        assert_eq!(frame.face.unwrap().eye_aspect_ratio, 0.25);
        assert!(frame.hands.is_none());
    }
}
