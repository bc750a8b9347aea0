//! Typed change notifications published by `TaskStore`.
//!
//! Subscribers register an `Interest` and pull queued notifications with
//! `EventBus::poll`. Delivery is single-threaded: publishing only enqueues.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use uuid::Uuid;

/// Which persistence request a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRequest {
    Fetch,
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncRequest::Fetch => "fetch",
            SyncRequest::Create => "create",
            SyncRequest::Update => "update",
            SyncRequest::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Record inserted; `index` is its sorted position at publish time.
    Added { key: Uuid, index: usize },
    Changed { key: Uuid },
    Removed { key: Uuid },
    Reordered,
    Reset,
    /// A persistence request failed. The in-memory state is not rolled back.
    SyncFailed {
        key: Option<Uuid>,
        request: SyncRequest,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotificationKind {
    Added,
    Changed,
    Removed,
    Reordered,
    Reset,
    SyncFailed,
}

impl NotificationKind {
    /// The variants that change membership, order or contents.
    pub const STRUCTURAL: [NotificationKind; 5] = [
        NotificationKind::Added,
        NotificationKind::Changed,
        NotificationKind::Removed,
        NotificationKind::Reordered,
        NotificationKind::Reset,
    ];
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Added { .. } => NotificationKind::Added,
            Notification::Changed { .. } => NotificationKind::Changed,
            Notification::Removed { .. } => NotificationKind::Removed,
            Notification::Reordered => NotificationKind::Reordered,
            Notification::Reset => NotificationKind::Reset,
            Notification::SyncFailed { .. } => NotificationKind::SyncFailed,
        }
    }

    pub fn record_key(&self) -> Option<Uuid> {
        match self {
            Notification::Added { key, .. }
            | Notification::Changed { key }
            | Notification::Removed { key } => Some(*key),
            Notification::SyncFailed { key, .. } => *key,
            Notification::Reordered | Notification::Reset => None,
        }
    }
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    kinds: BTreeSet<NotificationKind>,
    record: Option<Uuid>,
}

impl Interest {
    pub fn kinds<I>(kinds: I) -> Self
    where
        I: IntoIterator<Item = NotificationKind>,
    {
        Self {
            kinds: kinds.into_iter().collect(),
            record: None,
        }
    }

    /// Every variant, including failures.
    pub fn all() -> Self {
        let mut interest = Self::kinds(NotificationKind::STRUCTURAL);
        interest.kinds.insert(NotificationKind::SyncFailed);
        interest
    }

    /// Changes, removal and failures of one record.
    pub fn record(key: Uuid) -> Self {
        Self {
            kinds: [
                NotificationKind::Changed,
                NotificationKind::Removed,
                NotificationKind::SyncFailed,
            ]
            .into_iter()
            .collect(),
            record: Some(key),
        }
    }

    pub fn matches(&self, notification: &Notification) -> bool {
        if !self.kinds.contains(&notification.kind()) {
            return false;
        }
        match self.record {
            Some(key) => notification.record_key() == Some(key),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Debug)]
struct Subscriber {
    id: Subscription,
    interest: Interest,
    queue: VecDeque<Notification>,
}

#[derive(Debug, Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, interest: Interest) -> Subscription {
        self.next_id += 1;
        let id = Subscription(self.next_id);
        self.subscribers.push(Subscriber {
            id,
            interest,
            queue: VecDeque::new(),
        });
        id
    }

    /// Drops the subscriber and anything still queued for it.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.id != subscription);
        before != self.subscribers.len()
    }

    pub fn publish(&mut self, notification: Notification) {
        tracing::trace!(?notification, "publishing notification");
        for sub in &mut self.subscribers {
            if sub.interest.matches(&notification) {
                sub.queue.push_back(notification.clone());
            }
        }
    }

    /// Takes everything queued for `subscription`, oldest first. An unknown
    /// subscription yields nothing.
    pub fn poll(&mut self, subscription: Subscription) -> Vec<Notification> {
        self.subscribers
            .iter_mut()
            .find(|sub| sub.id == subscription)
            .map(|sub| sub.queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
