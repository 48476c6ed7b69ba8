use crate::platforms::UiEvent;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// At least one change event arrived and the UI then went quiet
    Changed,
    /// Nothing changed within the timeout
    Unchanged,
    Cancelled,
}

/// Awaits the UI reaction to an action.
///
/// Subscribe to the engine *before* acting and hand the receiver in here;
/// events emitted while acting are then already buffered.
#[derive(Debug, Clone, Copy)]
pub struct SettleWaiter {
    timeout: Duration,
    quiet: Duration,
}

impl SettleWaiter {
    pub fn new(timeout: Duration, quiet: Duration) -> Self {
        Self { timeout, quiet }
    }

    pub async fn wait(
        &self,
        events: &mut broadcast::Receiver<UiEvent>,
        cancel: &CancellationToken,
    ) -> SettleOutcome {
        let deadline = Instant::now() + self.timeout;

        let first = tokio::select! {
            _ = cancel.cancelled() => return SettleOutcome::Cancelled,
            r = tokio::time::timeout_at(deadline, next_event(events)) => r,
        };
        match first {
            Ok(true) => {}
            Ok(false) | Err(_) => return SettleOutcome::Unchanged,
        }

        // Debounce: wait until no event arrives for a full quiet period,
        // bounded by a second timeout window so a chatty UI cannot stall us
        let hard_stop = Instant::now() + self.timeout;
        loop {
            if Instant::now() >= hard_stop {
                trace!("settle hard stop reached while events still arriving");
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return SettleOutcome::Cancelled,
                r = timeout(self.quiet, next_event(events)) => match r {
                    Ok(true) => continue,
                    Ok(false) | Err(_) => break,
                },
            }
        }
        SettleOutcome::Changed
    }
}

/// True when an event (or a lag notice, which implies events) arrived;
/// false when the channel closed.
async fn next_event(events: &mut broadcast::Receiver<UiEvent>) -> bool {
    match events.recv().await {
        Ok(event) => {
            trace!(kind = ?event.kind, window_id = event.window_id, "ui event");
            true
        }
        Err(RecvError::Lagged(skipped)) => {
            trace!(skipped, "ui event receiver lagged");
            true
        }
        Err(RecvError::Closed) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::UiEventKind;

    fn event() -> UiEvent {
        UiEvent {
            kind: UiEventKind::ContentChanged,
            window_id: 1,
            app_id: "com.example".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_event_times_out_as_unchanged() {
        let (tx, mut rx) = broadcast::channel(8);
        let waiter = SettleWaiter::new(Duration::from_millis(500), Duration::from_millis(50));
        let started = Instant::now();
        let outcome = waiter.wait(&mut rx, &CancellationToken::new()).await;
        assert_eq!(outcome, SettleOutcome::Unchanged);
        assert!(started.elapsed() >= Duration::from_millis(500));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_event_counts_as_change() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(event()).unwrap();
        tx.send(event()).unwrap();
        let waiter = SettleWaiter::new(Duration::from_millis(500), Duration::from_millis(50));
        let outcome = waiter.wait(&mut rx, &CancellationToken::new()).await;
        assert_eq!(outcome, SettleOutcome::Changed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_wait() {
        let (_tx, mut rx) = broadcast::channel::<UiEvent>(8);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let waiter = SettleWaiter::new(Duration::from_secs(5), Duration::from_millis(50));
        assert_eq!(waiter.wait(&mut rx, &cancel).await, SettleOutcome::Cancelled);
    }
}
