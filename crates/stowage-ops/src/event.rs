//! Lifecycle events and their fan-out to subscribers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use stowage_core::OperationId;
use strum::{AsRefStr, Display};
use tokio::sync::mpsc;

use crate::backend::BoxFuture;
use crate::error::FailureInfo;
use crate::operation::Operation;
use crate::progress::OperationProgress;

/// Discriminator of an [`OperationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Added,
    Started,
    Progress,
    Finalizing,
    Finished,
    Cancelled,
    Failed,
    AllFinished,
}

/// An event published by the scheduler or a running job.
#[derive(Debug, Clone)]
pub enum OperationEvent {
    /// The operation was accepted and queued.
    Added(Arc<Operation>),
    /// The operation left the queue and its job started.
    Started(Arc<Operation>),
    Progress {
        operation: Arc<Operation>,
        progress: OperationProgress,
    },
    /// All units are done; the result is being committed or closed.
    Finalizing(Arc<Operation>),
    Finished(Arc<Operation>),
    Cancelled(Arc<Operation>),
    Failed {
        operation: Arc<Operation>,
        error: FailureInfo,
    },
    /// Nothing is queued or running anymore.
    AllFinished,
}

impl OperationEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Added(_) => EventKind::Added,
            Self::Started(_) => EventKind::Started,
            Self::Progress { .. } => EventKind::Progress,
            Self::Finalizing(_) => EventKind::Finalizing,
            Self::Finished(_) => EventKind::Finished,
            Self::Cancelled(_) => EventKind::Cancelled,
            Self::Failed { .. } => EventKind::Failed,
            Self::AllFinished => EventKind::AllFinished,
        }
    }

    /// The operation the event belongs to; `None` for `AllFinished`.
    pub fn operation(&self) -> Option<&Arc<Operation>> {
        match self {
            Self::Added(op)
            | Self::Started(op)
            | Self::Finalizing(op)
            | Self::Finished(op)
            | Self::Cancelled(op) => Some(op),
            Self::Progress { operation, .. } | Self::Failed { operation, .. } => Some(operation),
            Self::AllFinished => None,
        }
    }

    pub fn operation_id(&self) -> Option<OperationId> {
        self.operation().map(|op| op.id)
    }

    /// True for `Finished`, `Cancelled` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind(),
            EventKind::Finished | EventKind::Cancelled | EventKind::Failed
        )
    }
}

/// Token returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Async subscriber callback.
pub type EventCallback = Arc<dyn Fn(OperationEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Fans events out to any number of subscribers.
///
/// Callbacks for one event are awaited one after the other. The subscriber
/// list is snapshotted when an event is published, so callbacks may
/// subscribe or unsubscribe freely.
#[derive(Clone, Default)]
pub struct EventDistributor {
    inner: Arc<DistributorInner>,
}

#[derive(Default)]
struct DistributorInner {
    subscribers: Mutex<Vec<(SubscriptionId, EventCallback)>>,
    next_id: AtomicU64,
}

impl EventDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriptionId, EventCallback)>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an async callback.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id();
        self.subscribers().push((id, callback));
        id
    }

    /// Register a synchronous callback.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&OperationEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(move |event: OperationEvent| {
            callback(&event);
            Box::pin(async {}) as BoxFuture<'static, ()>
        }))
    }

    /// Register a subscriber that forwards every event into a channel.
    ///
    /// The subscription removes itself on the first event published after
    /// the receiver was dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<OperationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id();
        let distributor = Arc::downgrade(&self.inner);
        let callback: EventCallback = Arc::new(move |event: OperationEvent| {
            if tx.send(event).is_err() {
                if let Some(inner) = distributor.upgrade() {
                    EventDistributor { inner }.unsubscribe(id);
                }
            }
            Box::pin(async {}) as BoxFuture<'static, ()>
        });
        self.subscribers().push((id, callback));
        (id, rx)
    }

    /// Remove a subscriber. Returns false when the token is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    pub async fn publish(&self, event: OperationEvent) {
        let snapshot: Vec<EventCallback> = self
            .subscribers()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(event.clone()).await;
        }
    }
}

impl fmt::Debug for EventDistributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDistributor")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
