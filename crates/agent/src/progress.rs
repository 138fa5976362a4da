//! Progress indicator shown while a request is in flight.
//!
//! A small task that ticks at a fixed interval and emits the elapsed time.
//! It runs under a child of the cycle token, so it also stops when the cycle
//! is cancelled or times out.

use std::sync::Arc;
use std::time::Duration;

use chatloop_core::CancellationToken;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::stream_event::{AgentStreamEvent, EventSink};

/// Handle to a running indicator.
pub struct ProgressIndicator {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressIndicator {
    /// Start ticking. The first tick is emitted one `interval` after start.
    pub fn start(sink: Arc<dyn EventSink>, interval: Duration, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval_at(started + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut rendered = false;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        sink.emit(AgentStreamEvent::waiting(started.elapsed()));
                        rendered = true;
                    }
                }
            }

            if rendered {
                sink.emit(AgentStreamEvent::WaitingCleared);
            }
        });

        Self { cancel, handle }
    }

    /// Stop the indicator and wait until it has cleared its output.
    ///
    /// When this returns the indicator will emit nothing more.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Progress indicator task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::Recorder;

    #[tokio::test(start_paused = true)]
    async fn ticks_then_clears_on_stop() {
        let recorder = Arc::new(Recorder::default());
        let parent = CancellationToken::new();
        let indicator =
            ProgressIndicator::start(recorder.clone(), Duration::from_millis(100), &parent);

        tokio::time::sleep(Duration::from_millis(350)).await;
        indicator.stop().await;

        let events = recorder.events();
        let ticks: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AgentStreamEvent::Waiting { elapsed_ms } => Some(*elapsed_ms),
                _ => None,
            })
            .collect();
        assert_eq!(ticks, vec![100, 200, 300]);
        assert_eq!(events.last(), Some(&AgentStreamEvent::WaitingCleared));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_tick_emits_nothing() {
        let recorder = Arc::new(Recorder::default());
        let indicator = ProgressIndicator::start(
            recorder.clone(),
            Duration::from_millis(100),
            &CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        indicator.stop().await;
        assert!(recorder.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_ticking() {
        let recorder = Arc::new(Recorder::default());
        let parent = CancellationToken::new();
        let indicator =
            ProgressIndicator::start(recorder.clone(), Duration::from_millis(100), &parent);

        tokio::time::sleep(Duration::from_millis(150)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let waiting = recorder
            .events()
            .iter()
            .filter(|e| matches!(e, AgentStreamEvent::Waiting { .. }))
            .count();
        assert_eq!(waiting, 1);

        // Stopping an already-cancelled indicator is fine.
        indicator.stop().await;
        assert_eq!(recorder.events().last(), Some(&AgentStreamEvent::WaitingCleared));
    }
}
