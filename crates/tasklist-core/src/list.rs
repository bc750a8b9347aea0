use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::TaskBackend;
use crate::datetime::parse_due;
use crate::events::{Interest, Notification, NotificationKind, Subscription};
use crate::record::{DisplayClasses, TaskAttrs, TaskChanges};
use crate::render::{ListSummary, Render};
use crate::row::{CommitOutcome, EditField, Key, RowController, RowReaction};
use crate::store::{SortOrder, SyncReport, TaskStore};

/// Which rows are shown. Display only: the store is never touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterCategory {
    #[default]
    All,
    Old,
    Pending,
    Completed,
}

impl FilterCategory {
    pub fn admits(&self, classes: &DisplayClasses) -> bool {
        match self {
            FilterCategory::All => true,
            FilterCategory::Old => classes.old,
            FilterCategory::Pending => classes.pending,
            FilterCategory::Completed => classes.done,
        }
    }
}

impl fmt::Display for FilterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterCategory::All => "all",
            FilterCategory::Old => "old",
            FilterCategory::Pending => "pending",
            FilterCategory::Completed => "completed",
        };
        f.write_str(name)
    }
}

impl FromStr for FilterCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(FilterCategory::All),
            "old" | "overdue" => Ok(FilterCategory::Old),
            "pending" => Ok(FilterCategory::Pending),
            "completed" | "done" => Ok(FilterCategory::Completed),
            other => Err(anyhow!("unknown filter: {other}")),
        }
    }
}

/// Top-level coordinator: owns the store, the backend, the renderer and one
/// `RowController` per task, keyed by the task's client key.
pub struct ListController<B, R>
where
    B: TaskBackend,
    R: Render,
{
    store: TaskStore,
    backend: B,
    renderer: R,
    rows: HashMap<Uuid, RowController>,
    subscription: Subscription,
    filter: FilterCategory,
    shell: String,
    last_error: Option<String>,
    tz: Tz,
}

impl<B, R> ListController<B, R>
where
    B: TaskBackend,
    R: Render,
{
    pub fn new(mut store: TaskStore, backend: B, renderer: R, tz: Tz) -> Self {
        let subscription = store.subscribe(Interest::all());
        Self {
            store,
            backend,
            renderer,
            rows: HashMap::new(),
            subscription,
            filter: FilterCategory::default(),
            shell: String::new(),
            last_error: None,
            tz,
        }
    }

    /// Loads the collection from the backend and builds every row.
    #[tracing::instrument(skip(self))]
    pub fn initialize(&mut self) -> anyhow::Result<usize> {
        let fetched = self.store.fetch_all(&mut self.backend);
        self.pump();
        let count = fetched?;
        info!(count, "task list initialized");
        Ok(count)
    }

    /// Processes queued notifications: the list's own first, then each row's.
    /// The shell is re-rendered at most once per call.
    pub fn pump(&mut self) {
        let now = Utc::now();
        let mut structural = false;

        for notification in self.store.poll(self.subscription) {
            match &notification {
                Notification::Added { key, .. } => self.add_one(*key, now),
                Notification::Reset => self.add_all(now),
                Notification::SyncFailed {
                    key: None, error, ..
                } => {
                    self.last_error = Some(error.clone());
                }
                _ => {}
            }
            if NotificationKind::STRUCTURAL.contains(&notification.kind()) {
                structural = true;
            }
        }

        let mut detached = Vec::new();
        for (key, row) in self.rows.iter_mut() {
            if row.handle_notifications(&mut self.store, &self.renderer, now)
                == RowReaction::Detached
            {
                detached.push(*key);
            }
        }
        for key in detached {
            self.rows.remove(&key);
            debug!(%key, "row dropped");
        }

        if structural {
            self.refresh(now);
        }
    }

    fn add_one(&mut self, key: Uuid, now: DateTime<Utc>) {
        if self.rows.contains_key(&key) {
            return;
        }
        // Added and Removed can arrive in the same pump.
        let Ok(mut row) = RowController::new(&mut self.store, key, self.tz) else {
            debug!(%key, "task gone before its row was built");
            return;
        };
        row.apply_filter(&self.store, self.filter, now);
        row.render(&self.store, &self.renderer, now);
        self.rows.insert(key, row);
    }

    fn add_all(&mut self, now: DateTime<Utc>) {
        for (_, row) in self.rows.drain() {
            row.detach(&mut self.store);
        }
        let keys: Vec<Uuid> = self.store.iter().map(|record| record.key).collect();
        for key in keys {
            self.add_one(key, now);
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        for row in self.rows.values_mut() {
            row.apply_filter(&self.store, self.filter, now);
            row.render(&self.store, &self.renderer, now);
        }
        self.shell = self.renderer.render_shell(&self.summary());
    }

    #[tracing::instrument(skip(self))]
    pub fn create_from_input(
        &mut self,
        title: &str,
        description: &str,
        due: &str,
    ) -> anyhow::Result<Uuid> {
        let now = Utc::now();
        let due = if due.trim().is_empty() {
            None
        } else {
            Some(parse_due(due, now, self.tz).context("invalid due date")?)
        };

        let key = self.store.create_at(
            TaskAttrs {
                title: Some(title.to_string()),
                description: Some(description.to_string()),
                due,
                done: None,
            },
            now,
        );
        self.pump();
        Ok(key)
    }

    /// Destroys every completed task, one by one.
    #[tracing::instrument(skip(self))]
    pub fn clear_completed(&mut self) -> usize {
        let keys: Vec<Uuid> = self.store.done().iter().map(|record| record.key).collect();
        let mut cleared = 0;
        for key in keys {
            match self.store.destroy(key) {
                Ok(_) => cleared += 1,
                Err(err) => warn!(%key, error = %err, "failed to clear task"),
            }
        }
        info!(cleared, "cleared completed tasks");
        self.pump();
        cleared
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_all_complete(&mut self, done: bool) -> usize {
        let keys: Vec<Uuid> = self.store.iter().map(|record| record.key).collect();
        let mut changed = 0;
        for key in keys {
            match self.store.update(key, TaskChanges::done(done)) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(err) => warn!(%key, error = %err, "failed to toggle task"),
            }
        }
        self.pump();
        changed
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.store.set_sort_order(order);
        self.pump();
    }

    pub fn set_filter(&mut self, filter: FilterCategory) {
        info!(%filter, "changing filter");
        self.filter = filter;
        let now = Utc::now();
        for row in self.rows.values_mut() {
            row.apply_filter(&self.store, filter, now);
        }
        self.shell = self.renderer.render_shell(&self.summary());
    }

    /// Sends queued persistence requests and reacts to their failures.
    pub fn sync(&mut self) -> SyncReport {
        let report = self.store.sync(&mut self.backend);
        self.pump();
        report
    }

    fn with_row<T>(
        &mut self,
        key: Uuid,
        action: impl FnOnce(&mut RowController, &mut TaskStore) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let row = self
            .rows
            .get_mut(&key)
            .ok_or_else(|| anyhow!("no row for task {key}"))?;
        let result = action(row, &mut self.store);

        if let Some(row) = self.rows.get_mut(&key) {
            row.render(&self.store, &self.renderer, Utc::now());
        }
        self.pump();
        result
    }

    pub fn begin_edit(&mut self, key: Uuid, field: EditField) -> anyhow::Result<()> {
        self.with_row(key, |row, store| row.begin_edit(store, field))
    }

    pub fn edit_input(&mut self, key: Uuid, text: &str) -> anyhow::Result<()> {
        self.with_row(key, |row, _| row.input(text))
    }

    pub fn commit_edit(&mut self, key: Uuid) -> anyhow::Result<CommitOutcome> {
        self.with_row(key, |row, store| row.commit(store))
    }

    pub fn cancel_edit(&mut self, key: Uuid) -> anyhow::Result<()> {
        self.with_row(key, |row, _| {
            row.cancel();
            Ok(())
        })
    }

    pub fn blur_edit(&mut self, key: Uuid) -> anyhow::Result<Option<CommitOutcome>> {
        self.with_row(key, |row, store| row.blur(store))
    }

    pub fn key_press(&mut self, key: Uuid, pressed: Key) -> anyhow::Result<Option<CommitOutcome>> {
        self.with_row(key, |row, store| row.key_press(store, pressed))
    }

    pub fn apply_edit(
        &mut self,
        key: Uuid,
        field: EditField,
        value: &str,
    ) -> anyhow::Result<CommitOutcome> {
        self.with_row(key, |row, store| row.apply_edit(store, field, value))
    }

    pub fn toggle_done(&mut self, key: Uuid) -> anyhow::Result<bool> {
        self.with_row(key, |row, store| row.toggle_done(store))
    }

    pub fn delete(&mut self, key: Uuid) -> anyhow::Result<()> {
        self.with_row(key, |row, store| row.delete(store))
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn filter(&self) -> FilterCategory {
        self.filter
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn row(&self, key: Uuid) -> Option<&RowController> {
        self.rows.get(&key)
    }

    pub fn live_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Key of the task shown at 1-based `position` in the current order.
    pub fn key_at(&self, position: usize) -> Option<Uuid> {
        position
            .checked_sub(1)
            .and_then(|idx| self.store.iter().nth(idx))
            .map(|record| record.key)
    }

    pub fn rows_in_order(&self) -> impl Iterator<Item = &RowController> {
        self.store
            .iter()
            .filter_map(|record| self.rows.get(&record.key))
    }

    pub fn visible_rows(&self) -> impl Iterator<Item = &RowController> {
        self.rows_in_order().filter(|row| !row.is_hidden())
    }

    pub fn summary(&self) -> ListSummary {
        let done = self.store.done().len();
        ListSummary {
            total: self.store.len(),
            done,
            remaining: self.store.len() - done,
            visible: self.visible_rows().count(),
            order: self.store.sort_order(),
            filter: self.filter,
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.shell.clone();
        for row in self.visible_rows() {
            out.push('\n');
            out.push_str(row.fragment());
        }
        out
    }
}
