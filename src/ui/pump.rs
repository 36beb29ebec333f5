// EventPump - Drains worker channels on a fixed interval
//
// Workers never touch front-end state; they only send events. The pump is the
// consumer side: on every tick it drains whatever is queued, in FIFO order,
// and hands each event to the front end.

use crate::metrics::Metrics;
use crate::services::{BuildEvent, SanitizeEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{self, MissedTickBehavior};

/// Events a worker sends to the front end.
pub trait WorkerEvent {
    /// Text to show in the log view, if this event carries any.
    fn log_line(&self) -> Option<&str>;

    /// True for the last event of an operation.
    fn is_finished(&self) -> bool;
}

impl WorkerEvent for BuildEvent {
    fn log_line(&self) -> Option<&str> {
        match self {
            BuildEvent::Line(line) => Some(line.as_str()),
            _ => None,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self, BuildEvent::Finished { .. })
    }
}

impl WorkerEvent for SanitizeEvent {
    fn log_line(&self) -> Option<&str> {
        match self {
            SanitizeEvent::Line(line) => Some(line.as_str()),
            _ => None,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self, SanitizeEvent::Finished(_))
    }
}

/// Polls a worker channel until the operation finishes.
#[derive(Debug, Clone)]
pub struct EventPump {
    interval: Duration,
    metrics: Arc<Metrics>,
}

impl EventPump {
    /// # Arguments
    /// * `poll_interval_ms` - Time between drains; 0 is treated as 1ms
    /// * `metrics` - Receives the number of events drained
    pub fn new(poll_interval_ms: u64, metrics: Arc<Metrics>) -> Self {
        Self {
            interval: Duration::from_millis(poll_interval_ms.max(1)),
            metrics,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drain `rx` until its finishing event arrives, calling `on_event` for
    /// every event in emission order.
    ///
    /// # Returns
    /// The finishing event, or `None` if the worker dropped its sender first.
    pub async fn run<E, F>(&self, rx: &mut UnboundedReceiver<E>, mut on_event: F) -> Option<E>
    where
        E: WorkerEvent,
        F: FnMut(&E),
    {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let mut drained = 0;
            let outcome = loop {
                match rx.try_recv() {
                    Ok(event) => {
                        drained += 1;
                        on_event(&event);
                        if event.is_finished() {
                            break Some(Some(event));
                        }
                    }
                    Err(TryRecvError::Empty) => break None,
                    Err(TryRecvError::Disconnected) => {
                        tracing::warn!("Worker channel closed without a finishing event");
                        break Some(None);
                    }
                }
            };

            if drained > 0 {
                tracing::trace!("Drained {} event(s)", drained);
                self.metrics.record_events_drained(drained);
            }
            if let Some(finished) = outcome {
                return finished;
            }
        }
    }
}
