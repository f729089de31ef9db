use crate::handler::MessageHandler;
use crate::message::{BusMessage, BusPayload, Topic};
use conductor_core::{ConductorError, TaskResult};
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound on how long a waiter sleeps between result scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type HandlerList = Vec<(SubscriptionId, Arc<dyn MessageHandler>)>;

/// In-process task dispatch bus.
///
/// Delivers messages to topic subscribers in subscription order, stores the
/// latest [`TaskResult`] per task id, and keeps an ordered mailbox per
/// session. Waiters on results are woken by every stored result; the poll
/// interval only caps how long a waiter sleeps if a wake-up is missed.
pub struct TaskBus {
    handlers: RwLock<HashMap<Topic, HandlerList>>,
    next_id: AtomicU64,
    results: Mutex<HashMap<String, TaskResult>>,
    mailboxes: Mutex<HashMap<String, Vec<BusMessage>>>,
    result_signal: Notify,
    poll_interval: Duration,
}

impl TaskBus {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            results: Mutex::new(HashMap::new()),
            mailboxes: Mutex::new(HashMap::new()),
            result_signal: Notify::new(),
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Register a handler for `topic`. Handlers run in subscription order.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(topic)
            .or_default()
            .push((id, handler));
        debug!(topic = %topic, subscription = id.0, "Subscribed");
        id
    }

    /// Register a handler that is removed when the returned guard drops.
    pub fn subscribe_scoped(
        &self,
        topic: Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Subscription<'_> {
        let id = self.subscribe(topic, handler);
        Subscription {
            bus: self,
            topic,
            id,
        }
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&topic);
        }
        if removed {
            debug!(topic = %topic, subscription = id.0, "Unsubscribed");
        }
        removed
    }

    /// Number of handlers currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.handlers.read().get(&topic).map_or(0, Vec::len)
    }

    /// Publish a message.
    ///
    /// Results are stored (last write wins) and session mailboxes updated
    /// before any handler runs. Handlers are then invoked one after another;
    /// failures are logged and returned, never propagated.
    pub async fn publish(&self, message: BusMessage) -> Vec<ConductorError> {
        let topic = message.topic();

        if let BusPayload::Result(result) = &message.payload {
            let previous = self
                .results
                .lock()
                .insert(result.task_id.clone(), result.clone());
            if previous.is_some() {
                debug!(task_id = %result.task_id, "Result overwritten by newer publish");
            }
            self.result_signal.notify_waiters();
        }

        if let Some(session_id) = message.session_id() {
            self.mailboxes
                .lock()
                .entry(session_id.to_string())
                .or_default()
                .push(message.clone());
        }

        // Snapshot so handlers may (un)subscribe or publish re-entrantly.
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .handlers
            .read()
            .get(&topic)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        let mut errors = Vec::new();
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(&message))
                .catch_unwind()
                .await;
            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => ConductorError::Bus(format!("Subscriber on {topic} panicked")),
            };
            warn!(topic = %topic, message_id = %message.id, error = %err, "Subscriber failed");
            errors.push(err);
        }
        errors
    }

    /// Latest result stored for `task_id`.
    pub fn get_result(&self, task_id: &str) -> Option<TaskResult> {
        self.results.lock().get(task_id).cloned()
    }

    /// Wait until every id in `task_ids` has a result or `timeout` elapses.
    ///
    /// Returns the results collected so far, in request order. Running out
    /// of time is not an error: a partial set is a normal outcome.
    pub async fn wait_for_results(
        &self,
        session_id: &str,
        task_ids: &[String],
        timeout: Duration,
    ) -> Vec<TaskResult> {
        let wanted: HashSet<&str> = task_ids.iter().map(String::as_str).collect();
        let deadline = Instant::now() + timeout;
        let mut collected: HashMap<String, TaskResult> = HashMap::new();

        loop {
            // Register interest before scanning so a publish between the
            // scan and the sleep still wakes us.
            let notified = self.result_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let results = self.results.lock();
                for id in task_ids {
                    if !collected.contains_key(id) {
                        if let Some(result) = results.get(id) {
                            collected.insert(id.clone(), result.clone());
                        }
                    }
                }
            }

            if collected.len() >= wanted.len() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    session_id = %session_id,
                    collected = collected.len(),
                    requested = wanted.len(),
                    "Result wait timed out"
                );
                break;
            }
            let nap = (deadline - now).min(self.poll_interval);
            let _ = tokio::time::timeout(nap, notified).await;
        }

        task_ids.iter().filter_map(|id| collected.remove(id)).collect()
    }

    /// Messages published for `session_id`, in publish order.
    pub fn mailbox(&self, session_id: &str) -> Vec<BusMessage> {
        self.mailboxes
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove and return the mailbox of `session_id`.
    pub fn drain_mailbox(&self, session_id: &str) -> Vec<BusMessage> {
        self.mailboxes.lock().remove(session_id).unwrap_or_default()
    }

    /// Forget the mailbox and stored results of a finished session.
    pub fn clear_session(&self, session_id: &str) {
        self.mailboxes.lock().remove(session_id);
        self.results
            .lock()
            .retain(|_, result| result.session_id != session_id);
    }
}

impl Default for TaskBus {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII subscription: unsubscribes when dropped.
pub struct Subscription<'a> {
    bus: &'a TaskBus,
    topic: Topic,
    id: SubscriptionId,
}

impl Subscription<'_> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.topic, self.id);
    }
}
