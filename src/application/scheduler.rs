//! Keyed coalescing scheduler.
//!
//! Bounds total concurrent background work while never losing the newest
//! payload per key. Each key is IDLE, ARMED (a ready-signal waits in the
//! admission queue), or RUNNING; notifications arriving while a key is armed
//! or running only overwrite the stored payload. The admission queue is a
//! global FIFO processed at a fixed slot count (one slot in this system), so
//! invocations for distinct keys never overlap. A key whose payload changed
//! mid-run re-arms itself on completion.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use metrics::counter;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::infra::error::InfraError;

const SOURCE: &str = "application::scheduler";

/// The external task one admission slot drives: `(key, payload)` to
/// diagnostic text.
pub type KeyedTaskFn<V> =
    Arc<dyn Fn(String, V) -> BoxFuture<'static, Result<String, InfraError>> + Send + Sync>;

/// Result of one task invocation, fanned out to subscribers. Failures carry
/// the rendered error so the outcome stays `Clone` for broadcast.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub key: String,
    pub result: Result<String, String>,
}

enum Msg<V> {
    Notify { key: String, payload: V },
    Done { key: String },
}

pub struct KeyedCoalescingScheduler<V> {
    tx: mpsc::UnboundedSender<Msg<V>>,
}

impl<V> Clone for KeyedCoalescingScheduler<V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> KeyedCoalescingScheduler<V> {
    pub fn new(slots: usize, task: KeyedTaskFn<V>, outcomes: broadcast::Sender<TaskOutcome>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            rx,
            tx: tx.clone(),
            task,
            outcomes,
            keys: HashMap::new(),
            ready: VecDeque::new(),
            free_slots: slots.max(1),
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    /// Fire-and-forget notification. Coalesces with any payload already
    /// pending for the key.
    pub fn notify(&self, key: impl Into<String>, payload: V) {
        let _ = self.tx.send(Msg::Notify {
            key: key.into(),
            payload,
        });
    }
}

enum KeyState {
    Armed,
    Running { rearmed: bool },
}

struct KeyEntry<V> {
    latest: V,
    state: KeyState,
}

struct Actor<V> {
    rx: mpsc::UnboundedReceiver<Msg<V>>,
    tx: mpsc::UnboundedSender<Msg<V>>,
    task: KeyedTaskFn<V>,
    outcomes: broadcast::Sender<TaskOutcome>,
    keys: HashMap<String, KeyEntry<V>>,
    ready: VecDeque<String>,
    free_slots: usize,
}

impl<V: Clone + Send + 'static> Actor<V> {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle(msg);
            // Drain the backlog before dispatching so a synchronous burst of
            // notifications coalesces into a single invocation.
            while let Ok(msg) = self.rx.try_recv() {
                self.handle(msg);
            }
            self.dispatch();
        }
    }

    fn handle(&mut self, msg: Msg<V>) {
        match msg {
            Msg::Notify { key, payload } => match self.keys.get_mut(&key) {
                None => {
                    self.keys.insert(
                        key.clone(),
                        KeyEntry {
                            latest: payload,
                            state: KeyState::Armed,
                        },
                    );
                    self.ready.push_back(key);
                }
                Some(entry) => {
                    entry.latest = payload;
                    if let KeyState::Running { rearmed } = &mut entry.state {
                        *rearmed = true;
                    }
                    counter!("tavola_scheduler_coalesced_total").increment(1);
                    debug!(source = SOURCE, key, "superseded pending payload");
                }
            },
            Msg::Done { key } => {
                self.free_slots += 1;
                let Some(entry) = self.keys.get_mut(&key) else {
                    return;
                };
                match entry.state {
                    KeyState::Running { rearmed: true } => {
                        entry.state = KeyState::Armed;
                        self.ready.push_back(key);
                    }
                    _ => {
                        self.keys.remove(&key);
                    }
                }
            }
        }
    }

    fn dispatch(&mut self) {
        while self.free_slots > 0 {
            let Some(key) = self.ready.pop_front() else {
                return;
            };
            let Some(entry) = self.keys.get_mut(&key) else {
                continue;
            };
            entry.state = KeyState::Running { rearmed: false };
            let payload = entry.latest.clone();
            self.free_slots -= 1;

            counter!("tavola_scheduler_dispatch_total").increment(1);
            debug!(source = SOURCE, key, "dispatching task");

            let task = Arc::clone(&self.task);
            let outcomes = self.outcomes.clone();
            let done = self.tx.clone();
            tokio::spawn(async move {
                let result = task(key.clone(), payload).await;
                // Subscribers first, then the slot is released; a task
                // failure reaches only this invocation's subscribers.
                let _ = outcomes.send(TaskOutcome {
                    key: key.clone(),
                    result: result.map_err(|err| err.to_string()),
                });
                let _ = done.send(Msg::Done { key });
            });
        }
    }
}
