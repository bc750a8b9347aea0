use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tasklist_shared::{TaskCreate, TaskPatch, TaskUpdateArgs};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::TaskBackend;
use crate::events::{EventBus, Interest, Notification, Subscription, SyncRequest};
use crate::record::{TaskAttrs, TaskChanges, TaskRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    NewerFirst,
    OlderFirst,
}

impl SortOrder {
    /// Scalar ordering key; ascending keys give the display order.
    pub fn key(&self, record: &TaskRecord) -> i64 {
        let millis = record.due.timestamp_millis();
        match self {
            SortOrder::NewerFirst => -millis,
            SortOrder::OlderFirst => millis,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::NewerFirst => f.write_str("newer-first"),
            SortOrder::OlderFirst => f.write_str("older-first"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newer-first" | "newer" | "newest" => Ok(SortOrder::NewerFirst),
            "older-first" | "older" | "oldest" => Ok(SortOrder::OlderFirst),
            other => Err(anyhow!("unknown sort order: {other}")),
        }
    }
}

/// A persistence request waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    Create { key: Uuid, payload: TaskCreate },
    Update { key: Uuid, patch: TaskPatch },
    Delete { key: Uuid, id: Option<u64> },
}

impl PendingRequest {
    pub fn kind(&self) -> SyncRequest {
        match self {
            PendingRequest::Create { .. } => SyncRequest::Create,
            PendingRequest::Update { .. } => SyncRequest::Update,
            PendingRequest::Delete { .. } => SyncRequest::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Deletes of records the backend never stored.
    pub skipped: usize,
    pub failed: usize,
}

/// Ordered in-memory task collection.
///
/// Mutations apply immediately and queue a persistence request; `sync`
/// dispatches the queue later. A failed request is published as
/// `Notification::SyncFailed` and the in-memory state stays as it is.
#[derive(Debug, Default)]
pub struct TaskStore {
    records: Vec<TaskRecord>,
    order: SortOrder,
    bus: EventBus,
    outbox: VecDeque<PendingRequest>,
    // Ids the backend handed out for records that may already be gone.
    assigned: HashMap<Uuid, u64>,
}

impl TaskStore {
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    pub fn subscribe(&mut self, interest: Interest) -> Subscription {
        self.bus.subscribe(interest)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.bus.unsubscribe(subscription)
    }

    pub fn poll(&mut self, subscription: Subscription) -> Vec<Notification> {
        self.bus.poll(subscription)
    }

    pub fn create(&mut self, attrs: TaskAttrs) -> Uuid {
        self.create_at(attrs, Utc::now())
    }

    #[tracing::instrument(skip(self, attrs, now))]
    pub fn create_at(&mut self, attrs: TaskAttrs, now: DateTime<Utc>) -> Uuid {
        let record = TaskRecord::new(attrs, now);
        let key = record.key;
        let payload = record.to_create();

        self.records.push(record);
        self.sort_in_place();
        let index = self.position(key).unwrap_or(self.records.len() - 1);

        debug!(%key, index, "created task");
        self.bus.publish(Notification::Added { key, index });
        self.bus.publish(Notification::Reordered);
        self.outbox.push_back(PendingRequest::Create { key, payload });
        key
    }

    /// Merges `changes` into the record. Returns false when nothing moved, in
    /// which case no notification is published and nothing is persisted.
    /// Does not re-sort; callers changing `due` call `sort` themselves.
    #[tracing::instrument(skip(self, changes))]
    pub fn update(&mut self, key: Uuid, changes: TaskChanges) -> anyhow::Result<bool> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.key == key)
            .ok_or_else(|| anyhow!("task not found: {key}"))?;

        if !record.apply(&changes) {
            debug!(%key, "update left task unchanged");
            return Ok(false);
        }

        let patch = record.to_patch();
        self.bus.publish(Notification::Changed { key });
        self.outbox.push_back(PendingRequest::Update { key, patch });
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    pub fn destroy(&mut self, key: Uuid) -> anyhow::Result<TaskRecord> {
        let idx = self
            .position(key)
            .ok_or_else(|| anyhow!("task not found: {key}"))?;
        let record = self.records.remove(idx);

        debug!(%key, id = ?record.id, "destroyed task");
        self.bus.publish(Notification::Removed { key });
        self.outbox.push_back(PendingRequest::Delete {
            key,
            id: record.id,
        });
        Ok(record)
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        info!(%order, "changing sort order");
        self.order = order;
        self.sort();
    }

    pub fn sort(&mut self) {
        self.sort_in_place();
        self.bus.publish(Notification::Reordered);
    }

    // Stable: equal keys keep their prior relative order.
    fn sort_in_place(&mut self) {
        let order = self.order;
        self.records.sort_by_key(|record| order.key(record));
    }

    /// Replaces the whole collection with what the backend holds and publishes
    /// a single `Reset`. Queued requests are sent first so the fetch sees
    /// them; records the backend already knew keep their client key. On
    /// failure the collection is left untouched.
    #[tracing::instrument(skip(self, backend))]
    pub fn fetch_all<B>(&mut self, backend: &mut B) -> anyhow::Result<usize>
    where
        B: TaskBackend + ?Sized,
    {
        if !self.outbox.is_empty() {
            let report = self.sync(backend);
            debug!(?report, "flushed queued requests before fetch");
        }

        let mut known: HashMap<u64, Uuid> = self
            .records
            .iter()
            .filter_map(|record| record.id.map(|id| (id, record.key)))
            .collect();

        let fetched = backend.fetch_all().and_then(|dtos| {
            let mut seen = HashSet::new();
            let mut records = Vec::with_capacity(dtos.len());
            for dto in dtos {
                if !seen.insert(dto.id) {
                    warn!(id = dto.id, "backend returned duplicate id; keeping first");
                    continue;
                }
                let id = dto.id;
                let mut record =
                    TaskRecord::from_dto(dto).with_context(|| format!("failed to read task {id}"))?;
                if let Some(key) = known.remove(&id) {
                    record.key = key;
                }
                records.push(record);
            }
            Ok(records)
        });

        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                self.publish_failure(None, SyncRequest::Fetch, &err);
                return Err(err.context("failed to fetch tasks"));
            }
        };

        self.records = records;
        self.assigned.clear();
        self.sort_in_place();
        info!(count = self.records.len(), "fetched tasks");
        self.bus.publish(Notification::Reset);
        Ok(self.records.len())
    }

    /// Dispatches every queued persistence request in order.
    #[tracing::instrument(skip(self, backend), fields(pending = self.outbox.len()))]
    pub fn sync<B>(&mut self, backend: &mut B) -> SyncReport
    where
        B: TaskBackend + ?Sized,
    {
        let mut report = SyncReport::default();

        while let Some(request) = self.outbox.pop_front() {
            match request {
                PendingRequest::Create { key, payload } => match backend.create(&payload) {
                    Ok(dto) => {
                        self.assigned.insert(key, dto.id);
                        if let Some(record) = self.records.iter_mut().find(|r| r.key == key) {
                            record.id = Some(dto.id);
                        }
                        report.created += 1;
                    }
                    Err(err) => {
                        self.publish_failure(Some(key), SyncRequest::Create, &err);
                        report.failed += 1;
                    }
                },
                PendingRequest::Update { key, patch } => {
                    let Some(id) = self.remote_id(key) else {
                        let err = anyhow!("task {key} was never saved");
                        self.publish_failure(Some(key), SyncRequest::Update, &err);
                        report.failed += 1;
                        continue;
                    };
                    match backend.update(&TaskUpdateArgs { id, patch }) {
                        Ok(_) => report.updated += 1,
                        Err(err) => {
                            self.publish_failure(Some(key), SyncRequest::Update, &err);
                            report.failed += 1;
                        }
                    }
                }
                PendingRequest::Delete { key, id } => {
                    let Some(id) = id.or_else(|| self.assigned.get(&key).copied()) else {
                        debug!(%key, "task never reached the backend; skipping delete");
                        report.skipped += 1;
                        continue;
                    };
                    match backend.delete(id) {
                        Ok(()) => {
                            self.assigned.remove(&key);
                            report.deleted += 1;
                        }
                        Err(err) => {
                            self.publish_failure(Some(key), SyncRequest::Delete, &err);
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        debug!(?report, "sync finished");
        report
    }

    fn remote_id(&self, key: Uuid) -> Option<u64> {
        self.get(key)
            .and_then(|record| record.id)
            .or_else(|| self.assigned.get(&key).copied())
    }

    fn publish_failure(&mut self, key: Option<Uuid>, request: SyncRequest, err: &anyhow::Error) {
        warn!(key = ?key, %request, error = %format!("{err:#}"), "persistence request failed");
        self.bus.publish(Notification::SyncFailed {
            key,
            request,
            error: format!("{err:#}"),
        });
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &PendingRequest> {
        self.outbox.iter()
    }

    pub fn get(&self, key: Uuid) -> Option<&TaskRecord> {
        self.records.iter().find(|record| record.key == key)
    }

    pub fn position(&self, key: Uuid) -> Option<usize> {
        self.records.iter().position(|record| record.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn done(&self) -> Vec<&TaskRecord> {
        self.records.iter().filter(|record| record.done).collect()
    }

    pub fn remaining(&self) -> Vec<&TaskRecord> {
        self.records.iter().filter(|record| !record.done).collect()
    }
}
