use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::datetime::{format_due, parse_due};
use crate::events::{Interest, Notification, Subscription};
use crate::list::FilterCategory;
use crate::record::TaskChanges;
use crate::render::{Render, RowView};
use crate::store::TaskStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Title,
    Description,
    DueDate,
}

impl fmt::Display for EditField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditField::Title => f.write_str("title"),
            EditField::Description => f.write_str("description"),
            EditField::DueDate => f.write_str("due"),
        }
    }
}

impl FromStr for EditField {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(EditField::Title),
            "description" | "desc" => Ok(EditField::Description),
            "due" | "date" => Ok(EditField::DueDate),
            other => Err(anyhow!("unknown field: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowState {
    Viewing,
    Editing { field: EditField, buffer: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Updated,
    Unchanged,
    /// The committed title was empty, so the task was destroyed instead.
    Destroyed,
}

/// What a row did with the notifications it drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowReaction {
    Idle,
    Rendered,
    /// The bound task was removed; the row has unsubscribed and must be
    /// dropped by its owner.
    Detached,
}

/// Display and inline-edit state for exactly one task.
#[derive(Debug)]
pub struct RowController {
    key: Uuid,
    subscription: Subscription,
    state: RowState,
    fragment: String,
    hidden: bool,
    sync_error: Option<String>,
    tz: Tz,
}

impl RowController {
    pub fn new(store: &mut TaskStore, key: Uuid, tz: Tz) -> anyhow::Result<Self> {
        if store.get(key).is_none() {
            return Err(anyhow!("cannot bind row to unknown task {key}"));
        }
        let subscription = store.subscribe(Interest::record(key));
        Ok(Self {
            key,
            subscription,
            state: RowState::Viewing,
            fragment: String::new(),
            hidden: false,
            sync_error: None,
            tz,
        })
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn state(&self) -> &RowState {
        &self.state
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.state, RowState::Editing { .. })
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    /// Shows or hides the row for `filter` without touching the store.
    pub fn apply_filter(&mut self, store: &TaskStore, filter: FilterCategory, now: DateTime<Utc>) {
        self.hidden = match store.get(self.key) {
            Some(record) => !filter.admits(&record.display_classes(now)),
            None => true,
        };
    }

    pub fn render(&mut self, store: &TaskStore, renderer: &dyn Render, now: DateTime<Utc>) -> &str {
        let Some(record) = store.get(self.key) else {
            return &self.fragment;
        };
        let position = store.position(self.key).map_or(0, |idx| idx + 1);
        let editing = match &self.state {
            RowState::Editing { field, buffer } => Some((*field, buffer.as_str())),
            RowState::Viewing => None,
        };
        let view = RowView {
            position,
            record,
            classes: record.display_classes(now),
            editing,
            sync_error: self.sync_error.as_deref(),
        };
        self.fragment = renderer.render_row(&view);
        &self.fragment
    }

    /// Drains this row's notifications. Rows never detach on their own
    /// initiative; only a `Removed` for the bound task ends them.
    pub fn handle_notifications(
        &mut self,
        store: &mut TaskStore,
        renderer: &dyn Render,
        now: DateTime<Utc>,
    ) -> RowReaction {
        let mut reaction = RowReaction::Idle;
        for notification in store.poll(self.subscription) {
            match notification {
                Notification::Removed { .. } => {
                    debug!(key = %self.key, "task removed; detaching row");
                    store.unsubscribe(self.subscription);
                    return RowReaction::Detached;
                }
                Notification::Changed { .. } => {
                    self.render(store, renderer, now);
                    reaction = RowReaction::Rendered;
                }
                Notification::SyncFailed { request, error, .. } => {
                    warn!(key = %self.key, %request, error = %error, "row not saved");
                    self.sync_error = Some(format!("{request} failed: {error}"));
                    self.render(store, renderer, now);
                    reaction = RowReaction::Rendered;
                }
                Notification::Added { .. }
                | Notification::Reordered
                | Notification::Reset => {}
            }
        }
        reaction
    }

    /// Drops the row without waiting for a `Removed`, used when the whole
    /// list is rebuilt.
    pub fn detach(self, store: &mut TaskStore) {
        store.unsubscribe(self.subscription);
    }

    /// Enters editing for `field`, seeding the buffer with the current value.
    /// Starting a different field abandons the previous buffer.
    pub fn begin_edit(&mut self, store: &TaskStore, field: EditField) -> anyhow::Result<()> {
        let record = store
            .get(self.key)
            .ok_or_else(|| anyhow!("task not found: {}", self.key))?;
        let buffer = match field {
            EditField::Title => record.title.clone(),
            EditField::Description => record.description.clone(),
            EditField::DueDate => format_due(record.due, self.tz),
        };
        debug!(key = %self.key, %field, "begin edit");
        self.state = RowState::Editing { field, buffer };
        Ok(())
    }

    pub fn input(&mut self, text: &str) -> anyhow::Result<()> {
        match &mut self.state {
            RowState::Editing { buffer, .. } => {
                *buffer = text.to_string();
                Ok(())
            }
            RowState::Viewing => Err(anyhow!("row is not being edited")),
        }
    }

    pub fn cancel(&mut self) {
        if self.is_editing() {
            debug!(key = %self.key, "edit cancelled");
        }
        self.state = RowState::Viewing;
    }

    /// Writes the buffer back through the store. An empty title destroys the
    /// task. A due date that does not parse keeps the row editing.
    pub fn commit(&mut self, store: &mut TaskStore) -> anyhow::Result<CommitOutcome> {
        let RowState::Editing { field, buffer } = &self.state else {
            return Err(anyhow!("row is not being edited"));
        };
        let field = *field;

        let changed = match field {
            EditField::Title => {
                if buffer.trim().is_empty() {
                    debug!(key = %self.key, "empty title committed; destroying task");
                    store.destroy(self.key)?;
                    self.state = RowState::Viewing;
                    return Ok(CommitOutcome::Destroyed);
                }
                store.update(self.key, TaskChanges::title(buffer.clone()))?
            }
            EditField::Description => {
                store.update(self.key, TaskChanges::description(buffer.clone()))?
            }
            EditField::DueDate => {
                let current = store
                    .get(self.key)
                    .map(|record| format_due(record.due, self.tz))
                    .ok_or_else(|| anyhow!("task not found: {}", self.key))?;
                // The buffer is seeded at display precision; leaving it as is
                // must not truncate the stored date.
                if buffer.trim() == current {
                    self.state = RowState::Viewing;
                    return Ok(CommitOutcome::Unchanged);
                }
                let due = parse_due(buffer, Utc::now(), self.tz)?;
                let changed = store.update(self.key, TaskChanges::due(due))?;
                if changed {
                    store.sort();
                }
                changed
            }
        };

        self.state = RowState::Viewing;
        Ok(if changed {
            CommitOutcome::Updated
        } else {
            CommitOutcome::Unchanged
        })
    }

    /// Focus left the field: commit whatever is in the buffer.
    pub fn blur(&mut self, store: &mut TaskStore) -> anyhow::Result<Option<CommitOutcome>> {
        if !self.is_editing() {
            return Ok(None);
        }
        self.commit(store).map(Some)
    }

    pub fn key_press(
        &mut self,
        store: &mut TaskStore,
        key: Key,
    ) -> anyhow::Result<Option<CommitOutcome>> {
        match key {
            Key::Enter => self.blur(store),
            Key::Escape => {
                self.cancel();
                Ok(None)
            }
        }
    }

    /// Success callback of an inline edit widget that already holds the new
    /// value.
    pub fn apply_edit(
        &mut self,
        store: &mut TaskStore,
        field: EditField,
        value: &str,
    ) -> anyhow::Result<CommitOutcome> {
        self.begin_edit(store, field)?;
        self.input(value)?;
        self.commit(store)
    }

    pub fn toggle_done(&mut self, store: &mut TaskStore) -> anyhow::Result<bool> {
        let done = store
            .get(self.key)
            .map(|record| record.done)
            .ok_or_else(|| anyhow!("task not found: {}", self.key))?;
        store.update(self.key, TaskChanges::done(!done))?;
        Ok(!done)
    }

    pub fn delete(&mut self, store: &mut TaskStore) -> anyhow::Result<()> {
        store.destroy(self.key).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{CommitOutcome, EditField, Key, RowController, RowReaction, RowState};
    use crate::record::TaskAttrs;
    use crate::render::TextRenderer;
    use crate::store::TaskStore;

    fn store_with(titles: &[&str]) -> (TaskStore, Vec<uuid::Uuid>) {
        let mut store = TaskStore::default();
        let now = Utc::now();
        let keys = titles
            .iter()
            .enumerate()
            .map(|(idx, title)| {
                store.create_at(
                    TaskAttrs {
                        title: Some(title.to_string()),
                        due: Some(now + Duration::days(idx as i64)),
                        ..TaskAttrs::default()
                    },
                    now,
                )
            })
            .collect();
        (store, keys)
    }

    #[test]
    fn begin_edit_seeds_buffer_and_cancel_discards() {
        let (mut store, keys) = store_with(&["wash car"]);
        let mut row = RowController::new(&mut store, keys[0], chrono_tz::UTC).expect("row");

        row.begin_edit(&store, EditField::Title).expect("begin");
        assert_eq!(
            row.state(),
            &RowState::Editing {
                field: EditField::Title,
                buffer: "wash car".to_string()
            }
        );
        row.input("wash bike").expect("input");
        row.key_press(&mut store, Key::Escape).expect("escape");
        assert_eq!(row.state(), &RowState::Viewing);
        assert_eq!(store.get(keys[0]).map(|r| r.title.as_str()), Some("wash car"));
        assert!(row.input("late").is_err());
    }

    #[test]
    fn enter_commits_title_through_the_store() {
        let (mut store, keys) = store_with(&["wash car"]);
        let renderer = TextRenderer::plain(chrono_tz::UTC);
        let mut row = RowController::new(&mut store, keys[0], chrono_tz::UTC).expect("row");

        row.begin_edit(&store, EditField::Title).expect("begin");
        row.input("wash bike").expect("input");
        let outcome = row.key_press(&mut store, Key::Enter).expect("enter");
        assert_eq!(outcome, Some(CommitOutcome::Updated));
        assert_eq!(store.get(keys[0]).map(|r| r.title.as_str()), Some("wash bike"));

        let reaction = row.handle_notifications(&mut store, &renderer, Utc::now());
        assert_eq!(reaction, RowReaction::Rendered);
        assert!(row.fragment().contains("wash bike"));
    }

    #[test]
    fn empty_title_commit_destroys_and_detaches() {
        let (mut store, keys) = store_with(&["wash car", "buy stamps"]);
        let renderer = TextRenderer::plain(chrono_tz::UTC);
        let mut row = RowController::new(&mut store, keys[0], chrono_tz::UTC).expect("row");
        let mut other = RowController::new(&mut store, keys[1], chrono_tz::UTC).expect("row");

        let outcome = row
            .apply_edit(&mut store, EditField::Title, "  ")
            .expect("commit");
        assert_eq!(outcome, CommitOutcome::Destroyed);
        assert!(store.get(keys[0]).is_none());

        let now = Utc::now();
        assert_eq!(
            row.handle_notifications(&mut store, &renderer, now),
            RowReaction::Detached
        );
        assert_eq!(
            other.handle_notifications(&mut store, &renderer, now),
            RowReaction::Idle
        );
        assert_eq!(other.key(), keys[1]);
    }

    #[test]
    fn due_date_commit_resorts_and_bad_input_keeps_editing() {
        let (mut store, keys) = store_with(&["first", "second"]);
        let mut row = RowController::new(&mut store, keys[0], chrono_tz::UTC).expect("row");
        let titles = |store: &TaskStore| -> Vec<String> {
            store.iter().map(|r| r.title.clone()).collect()
        };
        assert_eq!(titles(&store), vec!["second", "first"]);

        row.begin_edit(&store, EditField::DueDate).expect("begin");
        row.input("not a date").expect("input");
        assert!(row.commit(&mut store).is_err());
        assert!(row.is_editing());

        let far = Utc
            .with_ymd_and_hms(2099, 1, 1, 0, 0, 0)
            .single()
            .expect("valid far date");
        row.input("2099-01-01").expect("input");
        assert_eq!(row.commit(&mut store).expect("commit"), CommitOutcome::Updated);
        assert_eq!(store.get(keys[0]).map(|r| r.due), Some(far));
        assert_eq!(titles(&store), vec!["first", "second"]);
    }

    #[test]
    fn untouched_due_date_buffer_keeps_full_precision() {
        let due = Utc
            .with_ymd_and_hms(2030, 5, 1, 9, 30, 42)
            .single()
            .expect("valid due")
            + Duration::milliseconds(698);
        let mut store = TaskStore::default();
        let key = store.create(TaskAttrs {
            title: Some("dentist".to_string()),
            due: Some(due),
            ..TaskAttrs::default()
        });
        let mut row = RowController::new(&mut store, key, chrono_tz::UTC).expect("row");
        let queued = store.pending_requests().count();

        row.begin_edit(&store, EditField::DueDate).expect("begin");
        assert_eq!(
            row.blur(&mut store).expect("blur"),
            Some(CommitOutcome::Unchanged)
        );
        assert_eq!(store.get(key).map(|r| r.due), Some(due));
        assert_eq!(store.pending_requests().count(), queued);
        assert!(!row.is_editing());
    }

    #[test]
    fn title_is_saved_as_typed() {
        let (mut store, keys) = store_with(&["wash car"]);
        let mut row = RowController::new(&mut store, keys[0], chrono_tz::UTC).expect("row");

        let outcome = row
            .apply_edit(&mut store, EditField::Title, " wash bike ")
            .expect("commit");
        assert_eq!(outcome, CommitOutcome::Updated);
        assert_eq!(store.get(keys[0]).map(|r| r.title.as_str()), Some(" wash bike "));
    }

    #[test]
    fn toggle_and_delete_go_through_the_store() {
        let (mut store, keys) = store_with(&["wash car"]);
        let renderer = TextRenderer::plain(chrono_tz::UTC);
        let mut row = RowController::new(&mut store, keys[0], chrono_tz::UTC).expect("row");

        assert!(row.toggle_done(&mut store).expect("toggle"));
        assert_eq!(store.done().len(), 1);
        assert!(!row.toggle_done(&mut store).expect("toggle back"));

        row.delete(&mut store).expect("delete");
        assert!(store.is_empty());
        assert_eq!(
            row.handle_notifications(&mut store, &renderer, Utc::now()),
            RowReaction::Detached
        );
    }

    #[test]
    fn unknown_task_cannot_be_bound() {
        let mut store = TaskStore::default();
        assert!(RowController::new(&mut store, uuid::Uuid::new_v4(), chrono_tz::UTC).is_err());
    }
}
