use chrono::{DateTime, Utc};
use tasklist_shared::{TaskCreate, TaskDto, TaskPatch};
use uuid::Uuid;

use crate::datetime;

/// Title given to tasks created without one.
pub const DEFAULT_TITLE: &str = "empty todo...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    /// Client-side identity, stable for the whole session.
    pub key: Uuid,

    /// Identity assigned by the backend on first save.
    pub id: Option<u64>,

    pub title: String,

    pub description: String,

    pub due: DateTime<Utc>,

    pub done: bool,
}

/// Attributes accepted at creation. Anything left out gets its default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskAttrs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due: Option<DateTime<Utc>>,
    pub done: Option<bool>,
}

/// Field changes merged into an existing record by `TaskStore::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due: Option<DateTime<Utc>>,
    pub done: Option<bool>,
}

impl TaskChanges {
    pub fn title(value: impl Into<String>) -> Self {
        Self {
            title: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn description(value: impl Into<String>) -> Self {
        Self {
            description: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn due(value: DateTime<Utc>) -> Self {
        Self {
            due: Some(value),
            ..Self::default()
        }
    }

    pub fn done(value: bool) -> Self {
        Self {
            done: Some(value),
            ..Self::default()
        }
    }
}

/// Row display classes. `done` is one axis; `old` and `pending` split the
/// unfinished tasks by whether they are past due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayClasses {
    pub done: bool,
    pub old: bool,
    pub pending: bool,
}

impl DisplayClasses {
    pub fn names(&self) -> Vec<&'static str> {
        let mut out = Vec::with_capacity(2);
        if self.done {
            out.push("done");
        }
        if self.old {
            out.push("old");
        }
        if self.pending {
            out.push("pending");
        }
        out
    }
}

impl TaskRecord {
    /// Builds a record, substituting defaults for missing attributes. A blank
    /// title is replaced here and only here.
    pub fn new(attrs: TaskAttrs, now: DateTime<Utc>) -> Self {
        let title = attrs
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        Self {
            key: Uuid::new_v4(),
            id: None,
            title,
            description: attrs.description.unwrap_or_default(),
            due: attrs.due.unwrap_or(now),
            done: attrs.done.unwrap_or(false),
        }
    }

    /// Reads a record returned by the backend, parsing its stored date.
    pub fn from_dto(dto: TaskDto) -> anyhow::Result<Self> {
        let due = datetime::parse_wire(&dto.date)?;
        Ok(Self {
            key: Uuid::new_v4(),
            id: Some(dto.id),
            title: dto.title,
            description: dto.description,
            due,
            done: dto.done,
        })
    }

    /// Merges `changes`, returning true if any field actually moved.
    pub fn apply(&mut self, changes: &TaskChanges) -> bool {
        let mut changed = false;
        if let Some(title) = &changes.title
            && *title != self.title
        {
            self.title = title.clone();
            changed = true;
        }
        if let Some(description) = &changes.description
            && *description != self.description
        {
            self.description = description.clone();
            changed = true;
        }
        if let Some(due) = changes.due
            && due != self.due
        {
            self.due = due;
            changed = true;
        }
        if let Some(done) = changes.done
            && done != self.done
        {
            self.done = done;
            changed = true;
        }
        changed
    }

    pub fn to_create(&self) -> TaskCreate {
        TaskCreate {
            title: self.title.clone(),
            description: self.description.clone(),
            date: datetime::to_wire(self.due),
            done: self.done,
        }
    }

    /// Full snapshot of the record as a patch; the backend stores the merged
    /// state rather than a diff.
    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            date: Some(datetime::to_wire(self.due)),
            done: Some(self.done),
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.done && self.due < now
    }

    pub fn display_classes(&self, now: DateTime<Utc>) -> DisplayClasses {
        DisplayClasses {
            done: self.done,
            old: self.is_overdue(now),
            pending: !self.done && self.due >= now,
        }
    }
}
