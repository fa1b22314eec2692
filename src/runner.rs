//! Tick-driven session runner
//!
//! Drives a `FocusProcessor` from a `SignalSource` on a fixed period. One tokio
//! task owns both for the lifetime of the run, so ticks are strictly
//! sequential: the next tick is not taken until the current acquisition has
//! resolved, and ticks missed meanwhile are skipped rather than queued.
//! Cancellation drops any acquisition still in flight without applying it.
//!
//! The processor's configuration is authoritative for detector thresholds: it
//! is pushed into the source before every acquisition.

use crate::adapter::SignalSource;
use crate::error::FocusError;
use crate::pipeline::{FocusProcessor, TickOutcome};
use crate::types::SessionSummary;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Nominal tick period
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// What a stopped run hands back
pub struct StoppedRun {
    /// The processor, with its finished session retained
    pub processor: FocusProcessor,
    pub summary: SessionSummary,
}

/// Controller for one running session
///
/// Dropping a runner that is still running cancels and aborts its loop. The
/// session is discarded; call [`SessionRunner::stop`] to keep it.
pub struct SessionRunner {
    handle: Option<JoinHandle<Result<FocusProcessor, FocusError>>>,
    cancel_token: Option<CancellationToken>,
    pause_tx: Option<watch::Sender<bool>>,
    latest_rx: Option<watch::Receiver<Option<TickOutcome>>>,
}

impl Default for SessionRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRunner {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            pause_tx: None,
            latest_rx: None,
        }
    }

    /// Spawn the tick loop. `processor` must already have an active session.
    pub fn start<S>(
        &mut self,
        processor: FocusProcessor,
        source: S,
        period: Duration,
    ) -> Result<(), FocusError>
    where
        S: SignalSource + 'static,
    {
        if self.handle.is_some() {
            return Err(FocusError::RunnerAlreadyActive);
        }
        if processor.session().is_none() {
            return Err(FocusError::NoActiveSession);
        }

        let cancel_token = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(processor.is_paused());
        let (latest_tx, latest_rx) = watch::channel(None);

        let handle = tokio::spawn(tick_loop(
            processor,
            source,
            period,
            cancel_token.clone(),
            pause_rx,
            latest_tx,
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.pause_tx = Some(pause_tx);
        self.latest_rx = Some(latest_rx);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Pause recording from the next tick on
    pub fn pause(&self) -> Result<(), FocusError> {
        self.set_paused(true)
    }

    /// Resume recording from the next tick on
    pub fn resume(&self) -> Result<(), FocusError> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<(), FocusError> {
        match &self.pause_tx {
            Some(tx) => {
                tx.send_replace(paused);
                Ok(())
            }
            None => Err(FocusError::NoActiveSession),
        }
    }

    /// Outcome of the most recent tick
    pub fn latest(&self) -> Option<TickOutcome> {
        self.latest_rx.as_ref().and_then(|rx| *rx.borrow())
    }

    /// Receiver notified after every tick
    pub fn subscribe(&self) -> Option<watch::Receiver<Option<TickOutcome>>> {
        self.latest_rx.clone()
    }

    /// Cancel the loop, wait for it and stop the session
    ///
    /// Returns `Ok(None)` when nothing is running, so repeated calls are harmless.
    pub async fn stop(&mut self) -> Result<Option<StoppedRun>, FocusError> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.pause_tx = None;
        self.latest_rx = None;

        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };

        let mut processor = handle
            .await
            .map_err(|e| FocusError::TaskFailed(e.to_string()))??;
        let summary = processor.stop_session()?;
        Ok(Some(StoppedRun { processor, summary }))
    }
}

impl Drop for SessionRunner {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            warn!("runner dropped while running; discarding the session");
            handle.abort();
        }
    }
}
async fn tick_loop<S: SignalSource>(
    mut processor: FocusProcessor,
    mut source: S,
    period: Duration,
    cancel_token: CancellationToken,
    pause_rx: watch::Receiver<bool>,
    latest_tx: watch::Sender<Option<TickOutcome>>,
) -> Result<FocusProcessor, FocusError> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let origin = Instant::now();

    info!("tick loop started with period {}ms", period.as_millis());

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        source.set_thresholds(processor.config().thresholds);
        let sample = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                debug!("discarding in-flight acquisition after cancellation");
                break;
            }
            sample = source.acquire() => sample,
        };

        let paused = *pause_rx.borrow();
        if paused != processor.is_paused() {
            if paused {
                processor.pause_session()?;
            } else {
                processor.resume_session()?;
            }
        }

        let timestamp_ms = origin.elapsed().as_millis() as u64;
        match processor.tick(&sample, timestamp_ms) {
            Ok(outcome) => {
                latest_tx.send_replace(Some(outcome));
            }
            Err(e) => {
                error!("tick at {timestamp_ms}ms failed: {e}");
                return Err(e);
            }
        }
    }

    info!("tick loop stopped");
    Ok(processor)
}
