//! Origin listener and reconnect supervisor.
//!
//! One listener per origin consumes the store's change stream, batches it
//! and forwards batches to the manager. The connection is an explicit state
//! machine:
//!
//! ```text
//!              events() ok                   stream closed / heartbeat timeout
//! Connecting ──────────────▶ Connected ──────────────────────────────────────┐
//!    ▲  │                                                                     │
//!    │  │ events() failed                                                     ▼
//!    │  └────────────────────────────────────────────────────────▶ Disconnected { attempt }
//!    └───────────────────────── backoff(attempt) ────────────────────────────┘
//! ```
//!
//! After any gap the listener sends [`OriginEvent::Reconnected`] and waits
//! for the manager to acknowledge (markers resent) before it consumes events.
//! Events emitted while disconnected are lost; the manager's resync covers
//! that window.

mod debouncer;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};

use crate::actor::ManagerMsg;
use crate::config::ConfigHandle;
use crate::core::Origin;
use crate::store::{GraphStore, StoreEvent};
use crate::{debug, log};

use debouncer::Debouncer;

/// Notification from a listener to the manager.
#[derive(Debug)]
pub enum OriginEvent {
    /// Deduplicated events of one batch window, in delivery order.
    Batch(Vec<StoreEvent>),
    /// The connection is down; events are being missed.
    Disconnected,
    /// Connected again after a gap. Send on `ack` once markers are resent.
    Reconnected { ack: oneshot::Sender<()> },
}

enum State {
    Connecting {
        attempt: u32,
    },
    Connected {
        events: mpsc::UnboundedReceiver<StoreEvent>,
        resumed: bool,
    },
    Disconnected {
        attempt: u32,
    },
}

/// Why the consume loop ended.
enum Consumed {
    Lost,
    ManagerGone,
}

pub struct OriginListener<S> {
    origin: Origin,
    store: Arc<S>,
    config: ConfigHandle,
    manager: mpsc::UnboundedSender<ManagerMsg>,
}

impl<S: GraphStore> OriginListener<S> {
    pub fn new(
        origin: Origin,
        store: Arc<S>,
        config: ConfigHandle,
        manager: mpsc::UnboundedSender<ManagerMsg>,
    ) -> Self {
        Self {
            origin,
            store,
            config,
            manager,
        }
    }

    /// Run on the tokio runtime. Abort the handle to stop listening.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the connection state machine until the manager goes away.
    pub async fn run(self) {
        let mut state = State::Connecting { attempt: 0 };
        loop {
            state = match state {
                State::Connecting { attempt } => match self.store.events(&self.origin).await {
                    Ok(events) => State::Connected {
                        events,
                        resumed: attempt > 0,
                    },
                    Err(e) => {
                        log!("listener"; "connect to {} failed: {}", self.origin, e);
                        if attempt == 0 && !self.send(OriginEvent::Disconnected) {
                            return;
                        }
                        State::Disconnected {
                            attempt: attempt.saturating_add(1),
                        }
                    }
                },

                State::Connected {
                    mut events,
                    resumed,
                } => {
                    if resumed && !self.resume().await {
                        return;
                    }
                    debug!("listener"; "connected to {}", self.origin);
                    match self.consume(&mut events).await {
                        Consumed::ManagerGone => return,
                        Consumed::Lost => {
                            log!("listener"; "lost connection to {}", self.origin);
                            if !self.send(OriginEvent::Disconnected) {
                                return;
                            }
                            State::Disconnected { attempt: 1 }
                        }
                    }
                }

                State::Disconnected { attempt } => {
                    let delay = self.config.load().listener.backoff(attempt);
                    debug!("listener"; "reconnecting to {} in {:?} (attempt {})", self.origin, delay, attempt);
                    sleep(delay).await;
                    State::Connecting { attempt }
                }
            };
        }
    }

    /// Reconnect handshake. Returns `false` if the manager is gone.
    async fn resume(&self) -> bool {
        let (ack, done) = oneshot::channel();
        if !self.send(OriginEvent::Reconnected { ack }) {
            return false;
        }
        let resumed = done.await.is_ok();
        if resumed {
            log!("listener"; "reconnected to {}", self.origin);
        }
        resumed
    }

    async fn consume(&self, events: &mut mpsc::UnboundedReceiver<StoreEvent>) -> Consumed {
        let config = self.config.load();
        let mut debouncer = Debouncer::new(config.listener.batch_window());
        let heartbeat = config.listener.heartbeat_timeout();
        let mut last_seen = Instant::now();

        loop {
            let deadline = heartbeat.map(|timeout| last_seen + timeout);
            tokio::select! {
                biased;
                event = events.recv() => {
                    let Some(event) = event else {
                        if let Some(batch) = debouncer.take()
                            && !self.send(OriginEvent::Batch(batch))
                        {
                            return Consumed::ManagerGone;
                        }
                        return Consumed::Lost;
                    };
                    last_seen = Instant::now();
                    debouncer.add_event(event);
                }
                _ = sleep(debouncer.sleep_duration()), if !debouncer.is_empty() => {}
                _ = sleep_until(deadline.unwrap_or(last_seen)), if deadline.is_some() => {
                    debug!("listener"; "no heartbeat from {} for {:?}", self.origin, heartbeat);
                    return Consumed::Lost;
                }
            }

            if let Some(batch) = debouncer.take_if_ready()
                && !self.send(OriginEvent::Batch(batch))
            {
                return Consumed::ManagerGone;
            }
        }
    }

    fn send(&self, event: OriginEvent) -> bool {
        self.manager
            .send(ManagerMsg::Origin {
                origin: self.origin.clone(),
                event,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveConfig;
    use crate::core::{EntityId, FieldPath};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const O: &str = "default";

    fn config(heartbeat_timeout_ms: u64) -> ConfigHandle {
        let mut config = LiveConfig::default();
        config.listener.batch_window_ms = 20;
        config.listener.reconnect_initial_ms = 10;
        config.listener.reconnect_max_ms = 40;
        config.listener.heartbeat_timeout_ms = heartbeat_timeout_ms;
        ConfigHandle::new(config)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<ManagerMsg>) -> OriginEvent {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(ManagerMsg::Origin { origin, event })) => {
                assert_eq!(origin.as_str(), O);
                event
            }
            Ok(other) => panic!("unexpected message: {other:?}"),
            Err(_) => panic!("no message from listener"),
        }
    }

    async fn wait_for_stream(store: &MemoryStore) {
        for _ in 0..200 {
            if store.open_streams(O) > 0 {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("listener never connected");
    }

    #[tokio::test]
    async fn test_burst_flushes_as_one_batch() {
        let store = MemoryStore::new();
        store.create(O, "ma1", &[], json!({"name": "m1", "score": 1}));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = OriginListener::new(Origin::new(O), Arc::new(store.clone()), config(0), tx).spawn();
        wait_for_stream(&store).await;

        store.set(O, "ma1", "name", json!("m1b")).unwrap();
        store.set(O, "ma1", "score", json!(2)).unwrap();
        store.set(O, "ma1", "name", json!("m1c")).unwrap();
        store.heartbeat(O);

        let OriginEvent::Batch(batch) = next(&mut rx).await else {
            panic!("expected a batch");
        };
        assert_eq!(
            batch,
            vec![
                StoreEvent::Update {
                    id: EntityId::new("ma1"),
                    field: FieldPath::new("name"),
                },
                StoreEvent::Update {
                    id: EntityId::new("ma1"),
                    field: FieldPath::new("score"),
                },
            ]
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_ack() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = OriginListener::new(Origin::new(O), Arc::new(store.clone()), config(0), tx).spawn();
        wait_for_stream(&store).await;

        store.restart(O);
        assert!(matches!(next(&mut rx).await, OriginEvent::Disconnected));

        let OriginEvent::Reconnected { ack } = next(&mut rx).await else {
            panic!("expected reconnect");
        };
        assert_eq!(store.open_streams(O), 1);

        // Events before the ack are buffered, not lost.
        store.create(O, "ma1", &[], json!({}));
        ack.send(()).unwrap();

        let OriginEvent::Batch(batch) = next(&mut rx).await else {
            panic!("expected a batch");
        };
        assert!(batch.iter().any(|e| matches!(e, StoreEvent::Update { id, .. } if id.as_str() == "ma1")));
        handle.abort();
    }

    #[tokio::test]
    async fn test_failed_connects_back_off_then_resume() {
        let store = MemoryStore::new();
        store.fail_next_connects(3);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = OriginListener::new(Origin::new(O), Arc::new(store.clone()), config(0), tx).spawn();

        assert!(matches!(next(&mut rx).await, OriginEvent::Disconnected));
        let OriginEvent::Reconnected { ack } = next(&mut rx).await else {
            panic!("expected reconnect");
        };
        ack.send(()).unwrap();
        wait_for_stream(&store).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_drops_connection() {
        let store = MemoryStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = OriginListener::new(Origin::new(O), Arc::new(store.clone()), config(50), tx).spawn();
        wait_for_stream(&store).await;

        assert!(matches!(next(&mut rx).await, OriginEvent::Disconnected));
        let OriginEvent::Reconnected { ack } = next(&mut rx).await else {
            panic!("expected reconnect");
        };
        drop(ack);
        // Manager dropped the ack: listener stops.
        assert!(timeout(Duration::from_secs(1), handle).await.is_ok());
    }
}
