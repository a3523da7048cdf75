//! In-process typed pub/sub for the server suite.
//!
//! The bus delivers published events to exact-name subscribers first, then
//! to glob-pattern subscribers, each in registration order. Delivery is a
//! serial loop inside the publishing task: handlers are awaited one at a
//! time, failures and panics are logged and isolated, and the publisher
//! always sees a successful return once validation has passed.
//!
//! Payloads are immutable by contract: every handler receives its own clone
//! of the published value, so subscribers earlier in the delivery order
//! cannot affect what later subscribers observe.

pub mod pattern;
pub mod registry;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use futures::FutureExt;
use regex::Regex;
use serde_json::Value;

use crate::error::EventError;
pub use registry::{EventRegistry, EventSchema, FieldKind};

/// Error type handlers may return; logged by the bus, never propagated.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The future a handler returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

type ExactHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;
type PatternHandler = Arc<dyn Fn(String, Value) -> HandlerFuture + Send + Sync>;

struct ExactEntry {
    id: u64,
    handler: ExactHandler,
}

struct PatternEntry {
    id: u64,
    regex: Regex,
    handler: PatternHandler,
}

struct BusInner {
    registry: Arc<EventRegistry>,
    exact: RwLock<HashMap<String, Vec<ExactEntry>>>,
    patterns: RwLock<Vec<PatternEntry>>,
    next_id: AtomicU64,
}

/// In-process event bus. Cheap to clone; clones share subscriptions.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle to one subscription. Dropping it does NOT unsubscribe; removal is
/// explicit so a handler can outlive the scope that registered it.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<BusInner>,
    target: SubscriptionTarget,
    id: u64,
}

#[derive(Debug)]
enum SubscriptionTarget {
    Exact(String),
    Pattern,
}

impl EventBus {
    /// Create a bus over the given event registry.
    pub fn new(registry: Arc<EventRegistry>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry,
                exact: RwLock::new(HashMap::new()),
                patterns: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The registry this bus validates against.
    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.inner.registry
    }

    /// Subscribe a handler to one exact event name.
    ///
    /// The name must already be registered; an exact subscription to an
    /// unregistered name is almost certainly a typo and is rejected with
    /// [`EventError::UnknownEvent`].
    pub fn subscribe<F>(&self, event: &str, handler: F) -> Result<Subscription, EventError>
    where
        F: Fn(Value) -> HandlerFuture + Send + Sync + 'static,
    {
        if !self.inner.registry.contains(event) {
            return Err(EventError::UnknownEvent {
                name: event.to_string(),
            });
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .exact
            .write()
            .expect("event bus lock poisoned")
            .entry(event.to_string())
            .or_default()
            .push(ExactEntry {
                id,
                handler: Arc::new(handler),
            });
        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            target: SubscriptionTarget::Exact(event.to_string()),
            id,
        })
    }

    /// Subscribe a handler to every event matching a glob pattern.
    ///
    /// Patterns may span names registered later, so no registration check
    /// is applied. The handler receives the concrete event name alongside
    /// the payload.
    pub fn subscribe_pattern<F>(&self, pattern: &str, handler: F) -> Result<Subscription, EventError>
    where
        F: Fn(String, Value) -> HandlerFuture + Send + Sync + 'static,
    {
        let regex = pattern::compile(pattern)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .patterns
            .write()
            .expect("event bus lock poisoned")
            .push(PatternEntry {
                id,
                regex,
                handler: Arc::new(handler),
            });
        Ok(Subscription {
            inner: Arc::downgrade(&self.inner),
            target: SubscriptionTarget::Pattern,
            id,
        })
    }

    /// Publish an event to all matching subscribers.
    ///
    /// Validation failures (unregistered name, schema violation) are the
    /// only errors the publisher sees. Handler failures are logged and do
    /// not abort delivery to the remaining handlers; handler returns are
    /// discarded. Within one publishing task, delivery order matches the
    /// order of `publish` calls.
    pub async fn publish(&self, event: &str, payload: Value) -> Result<(), EventError> {
        self.inner.registry.check(event, &payload)?;

        // Snapshot under the read locks, then release them before awaiting
        // so handlers can subscribe, unsubscribe, and publish reentrantly.
        let exact: Vec<ExactHandler> = {
            let map = self.inner.exact.read().expect("event bus lock poisoned");
            map.get(event)
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)).collect())
                .unwrap_or_default()
        };
        let patterns: Vec<PatternHandler> = {
            let entries = self.inner.patterns.read().expect("event bus lock poisoned");
            entries
                .iter()
                .filter(|e| e.regex.is_match(event))
                .map(|e| Arc::clone(&e.handler))
                .collect()
        };

        for handler in exact {
            let fut = handler(payload.clone());
            await_isolated(event, fut).await;
        }
        for handler in patterns {
            let fut = handler(event.to_string(), payload.clone());
            await_isolated(event, fut).await;
        }

        Ok(())
    }
}

/// Await one handler, containing its failure modes.
async fn await_isolated(event: &str, fut: HandlerFuture) {
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(event, error = %e, "event handler failed");
        }
        Err(_) => {
            tracing::error!(event, "event handler panicked");
        }
    }
}

impl Subscription {
    /// Remove exactly this registration. Idempotent: calling it again, or
    /// after the bus has been dropped, is a no-op.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match &self.target {
            SubscriptionTarget::Exact(event) => {
                let mut map = inner.exact.write().expect("event bus lock poisoned");
                if let Some(entries) = map.get_mut(event) {
                    entries.retain(|e| e.id != self.id);
                    if entries.is_empty() {
                        map.remove(event);
                    }
                }
            }
            SubscriptionTarget::Pattern => {
                inner
                    .patterns
                    .write()
                    .expect("event bus lock poisoned")
                    .retain(|e| e.id != self.id);
            }
        }
    }
}
