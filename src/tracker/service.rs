use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    protocol::{handler::RequestHandler, Envelope, Response},
    report::notify::{check_notifications, Notifier},
    storage::{aggregate::AggregateStore, kv::KeyValueStore},
    utils::clock::Clock,
};

use super::{
    events::{ActivityEvent, AlarmName},
    state::SessionTracker,
};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_NOTIFY_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Everything the tracker reacts to, in arrival order.
#[derive(Debug)]
pub enum TrackerInput {
    Activity(ActivityEvent),
    Request {
        envelope: Envelope,
        reply: oneshot::Sender<Response>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub flush_interval: Duration,
    pub notify_interval: Duration,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            notify_interval: DEFAULT_NOTIFY_INTERVAL,
        }
    }
}

/// Event loop around [SessionTracker]. Owns the heartbeat, flush and notification timers, and
/// is the only place the tracker is mutated from.
pub struct TrackerService<K> {
    inputs: mpsc::Receiver<TrackerInput>,
    tracker: SessionTracker<K>,
    handler: RequestHandler<K>,
    store: Arc<AggregateStore<K>>,
    notifier: Box<dyn Notifier>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    schedule: Schedule,
}

impl<K: KeyValueStore> TrackerService<K> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inputs: mpsc::Receiver<TrackerInput>,
        tracker: SessionTracker<K>,
        handler: RequestHandler<K>,
        store: Arc<AggregateStore<K>>,
        notifier: Box<dyn Notifier>,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
        schedule: Schedule,
    ) -> Self {
        Self {
            inputs,
            tracker,
            handler,
            store,
            notifier,
            clock,
            shutdown,
            schedule,
        }
    }

    /// Executes the tracker event loop until shutdown is requested or every input sender is
    /// gone, then does one final flush.
    pub async fn run(mut self) -> Result<()> {
        if let Err(e) = self.tracker.restore().await {
            warn!("Couldn't restore the previous session: {e}");
        }

        let mut heartbeat = None;
        let mut flush_point = self.clock.instant() + self.schedule.flush_interval;
        let mut notify_point = self.clock.instant() + self.schedule.notify_interval;

        loop {
            // The heartbeat only runs while there is a session to tick.
            heartbeat = match (self.tracker.is_tracking(), heartbeat) {
                (true, None) => Some(self.next_heartbeat()),
                (false, _) => None,
                (true, armed) => armed,
            };
            let heartbeat_point = heartbeat.unwrap_or(flush_point);

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,
                input = self.inputs.recv() => match input {
                    Some(input) => self.handle_input(input).await,
                    None => {
                        info!("All inputs closed");
                        break;
                    }
                },
                _ = self.clock.sleep_until(heartbeat_point), if heartbeat.is_some() => {
                    self.tracker.tick();
                    heartbeat = Some(self.next_heartbeat());
                }
                _ = self.clock.sleep_until(flush_point) => {
                    let _ = self.tracker.flush().await;
                    flush_point = self.clock.instant() + self.schedule.flush_interval;
                }
                _ = self.clock.sleep_until(notify_point) => {
                    self.check_notifications().await;
                    notify_point = self.clock.instant() + self.schedule.notify_interval;
                }
            }
        }

        self.tracker.shutdown().await;
        Ok(())
    }

    fn next_heartbeat(&self) -> tokio::time::Instant {
        self.clock.instant() + self.tracker.settings().heartbeat_interval()
    }

    async fn handle_input(&mut self, input: TrackerInput) {
        match input {
            TrackerInput::Activity(ActivityEvent::Alarm {
                name: AlarmName::CheckNotifications,
            }) => self.check_notifications().await,
            TrackerInput::Activity(event) => self.tracker.handle_event(event).await,
            TrackerInput::Request { envelope, reply } => {
                debug!("Handling request {}", envelope.kind);
                let response = self
                    .handler
                    .handle_envelope(envelope, &mut self.tracker)
                    .await;
                if reply.send(response).is_err() {
                    warn!("Requester went away before the response was ready");
                }
            }
        }
    }

    async fn check_notifications(&self) {
        let settings = &self.tracker.settings().notifications;
        if let Err(e) = check_notifications(&self.store, settings, self.notifier.as_ref()).await {
            warn!("Notification check failed: {e}");
        }
    }
}
