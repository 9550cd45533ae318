//! Event Bus - topic pub/sub with wildcard matching
//!
//! Subscribers register under a topic; publishing delivers to every
//! subscriber whose topic equals the event name or matches it through
//! `*` glob wildcards. Dispatch for one publish fans out concurrently
//! and settles every callback: a failing subscriber is logged and never
//! blocks or fails its siblings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::{BoxFuture, join_all};
use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Payload delivered with an event
pub type EventData = Value;

/// A subscriber callback: receives the concrete event name and payload
pub type SubscriberCallback =
    Arc<dyn Fn(String, EventData) -> BoxFuture<'static, eyre::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`SubscriberCallback`]
pub fn callback<F, Fut>(f: F) -> SubscriberCallback
where
    F: Fn(String, EventData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(move |event, data| Box::pin(f(event, data)))
}

/// Handle returned by subscribe, used to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Topic the callback was registered under
    pub topic: String,
    /// Registration identity
    pub id: u64,
}

/// Topic pattern, compiled once at subscribe time
enum TopicPattern {
    Exact(String),
    Glob(Regex),
}

impl TopicPattern {
    fn compile(topic: &str) -> Self {
        if !topic.contains('*') {
            return Self::Exact(topic.to_string());
        }
        let mut pattern = String::from("^");
        for (i, part) in topic.split('*').enumerate() {
            if i > 0 {
                pattern.push_str(".*");
            }
            pattern.push_str(&regex::escape(part));
        }
        pattern.push('$');
        // The pattern is escaped literals joined by ".*"; it always compiles
        Self::Glob(Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").unwrap()))
    }

    fn matches(&self, event: &str) -> bool {
        match self {
            Self::Exact(topic) => topic == event,
            Self::Glob(regex) => regex.is_match(event),
        }
    }
}

struct TopicEntry {
    pattern: TopicPattern,
    subscribers: Vec<(u64, SubscriberCallback)>,
}

/// Central pub/sub bus for runner events
pub struct EventBus {
    topics: RwLock<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback under a topic
    ///
    /// Re-adding the identical callback (same `Arc`) to the same topic
    /// is a no-op for dispatch purposes: the existing registration is
    /// returned instead of a second one.
    pub async fn subscribe(&self, topic: &str, cb: SubscriberCallback) -> Subscription {
        let mut topics = self.topics.write().await;
        let entry = topics.entry(topic.to_string()).or_insert_with(|| TopicEntry {
            pattern: TopicPattern::compile(topic),
            subscribers: Vec::new(),
        });

        let existing = entry
            .subscribers
            .iter()
            .find(|(_, existing)| Arc::ptr_eq(existing, &cb))
            .map(|(id, _)| *id);
        if let Some(id) = existing {
            debug!(%topic, id, "EventBus::subscribe: duplicate callback, reusing registration");
            return Subscription { topic: topic.to_string(), id };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.subscribers.push((id, cb));
        debug!(%topic, id, "EventBus::subscribe: new subscriber");
        Subscription { topic: topic.to_string(), id }
    }

    /// Remove one registration; empty topics are dropped
    pub async fn unsubscribe(&self, sub: &Subscription) -> bool {
        let mut topics = self.topics.write().await;
        let Some(entry) = topics.get_mut(&sub.topic) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|(id, _)| *id != sub.id);
        let removed = entry.subscribers.len() < before;
        if entry.subscribers.is_empty() {
            topics.remove(&sub.topic);
        }
        debug!(topic = %sub.topic, id = sub.id, removed, "EventBus::unsubscribe");
        removed
    }

    /// Remove a registration by topic and callback identity
    pub async fn unsubscribe_callback(&self, topic: &str, cb: &SubscriberCallback) -> bool {
        let id = {
            let topics = self.topics.read().await;
            topics.get(topic).and_then(|entry| {
                entry
                    .subscribers
                    .iter()
                    .find(|(_, existing)| Arc::ptr_eq(existing, cb))
                    .map(|(id, _)| *id)
            })
        };
        match id {
            Some(id) => self.unsubscribe(&Subscription { topic: topic.to_string(), id }).await,
            None => false,
        }
    }

    /// Deliver an event to every matching subscriber
    ///
    /// Resolves only after every callback has settled. Failures are
    /// isolated per callback and logged, never propagated.
    pub async fn publish(&self, event: &str, data: EventData) {
        let callbacks: Vec<(String, u64, SubscriberCallback)> = {
            let topics = self.topics.read().await;
            topics
                .iter()
                .filter(|(_, entry)| entry.pattern.matches(event))
                .flat_map(|(topic, entry)| {
                    entry
                        .subscribers
                        .iter()
                        .map(|(id, cb)| (topic.clone(), *id, cb.clone()))
                })
                .collect()
        };

        if callbacks.is_empty() {
            debug!(%event, "EventBus::publish: no subscribers");
            return;
        }

        debug!(%event, count = callbacks.len(), "EventBus::publish: dispatching");
        let results =
            join_all(callbacks.iter().map(|(_, _, cb)| (cb.as_ref())(event.to_string(), data.clone()))).await;

        let mut failed = 0usize;
        for ((topic, id, _), result) in callbacks.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                warn!(%event, %topic, id, error = %e, "EventBus::publish: subscriber failed");
            }
        }
        debug!(%event, delivered = callbacks.len() - failed, failed, "EventBus::publish: settled");
    }

    /// Number of registrations, for one topic or across the bus
    pub async fn subscriber_count(&self, topic: Option<&str>) -> usize {
        let topics = self.topics.read().await;
        match topic {
            Some(topic) => topics.get(topic).map_or(0, |entry| entry.subscribers.len()),
            None => topics.values().map(|entry| entry.subscribers.len()).sum(),
        }
    }

    /// All topics with at least one subscriber
    pub async fn topics(&self) -> Vec<String> {
        self.topics.read().await.keys().cloned().collect()
    }

    /// Drop every registration (shutdown path)
    pub async fn clear(&self) {
        self.topics.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
