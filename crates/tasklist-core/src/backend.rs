use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tasklist_shared::{TaskCreate, TaskDto, TaskUpdateArgs};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::events::SyncRequest;

/// CRUD boundary the store persists through. Implementations own the wire
/// format; the store only ever sees `TaskDto` values.
pub trait TaskBackend {
    fn fetch_all(&mut self) -> anyhow::Result<Vec<TaskDto>>;

    /// Persists a new task and returns it with its assigned id.
    fn create(&mut self, create: &TaskCreate) -> anyhow::Result<TaskDto>;

    fn update(&mut self, update: &TaskUpdateArgs) -> anyhow::Result<TaskDto>;

    fn delete(&mut self, id: u64) -> anyhow::Result<()>;
}

/// One collection stored as JSON lines under a data directory.
#[derive(Debug)]
pub struct JsonlBackend {
    pub data_dir: PathBuf,
    pub collection_path: PathBuf,
}

impl JsonlBackend {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, collection: &str) -> anyhow::Result<Self> {
        let name = collection.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(anyhow!("invalid collection name: {collection:?}"));
        }

        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let collection_path = data_dir.join(format!("{name}.data"));
        if !collection_path.exists() {
            fs::write(&collection_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            collection = %collection_path.display(),
            "opened task collection"
        );

        Ok(Self {
            data_dir,
            collection_path,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> anyhow::Result<Vec<TaskDto>> {
        load_jsonl(&self.collection_path)
            .with_context(|| format!("failed to load {}", self.collection_path.display()))
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save(&self, tasks: &[TaskDto]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.collection_path, tasks)
            .with_context(|| format!("failed to save {}", self.collection_path.display()))
    }

    pub fn next_id(&self, tasks: &[TaskDto]) -> u64 {
        tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1
    }
}

impl TaskBackend for JsonlBackend {
    fn fetch_all(&mut self) -> anyhow::Result<Vec<TaskDto>> {
        self.load()
    }

    #[tracing::instrument(skip(self, create), fields(title_len = create.title.len()))]
    fn create(&mut self, create: &TaskCreate) -> anyhow::Result<TaskDto> {
        let mut tasks = self.load()?;
        let dto = TaskDto {
            id: self.next_id(&tasks),
            title: create.title.clone(),
            description: create.description.clone(),
            date: create.date.clone(),
            done: create.done,
        };
        tasks.push(dto.clone());
        self.save(&tasks)?;
        debug!(id = dto.id, "created task");
        Ok(dto)
    }

    #[tracing::instrument(skip(self, update), fields(id = update.id))]
    fn update(&mut self, update: &TaskUpdateArgs) -> anyhow::Result<TaskDto> {
        let mut tasks = self.load()?;
        let task = tasks
            .iter_mut()
            .find(|task| task.id == update.id)
            .ok_or_else(|| anyhow!("task not found: {}", update.id))?;
        if update.patch.is_empty() {
            debug!(id = update.id, "empty patch; collection not rewritten");
            return Ok(task.clone());
        }
        update.patch.apply_to(task);
        let updated = task.clone();
        self.save(&tasks)?;
        Ok(updated)
    }

    #[tracing::instrument(skip(self))]
    fn delete(&mut self, id: u64) -> anyhow::Result<()> {
        let mut tasks = self.load()?;
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        if tasks.len() == before {
            return Err(anyhow!("task not found: {id}"));
        }
        self.save(&tasks)
    }
}

/// In-process backend. Failures can be queued per request kind, which is how
/// tests exercise the optimistic-update path.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tasks: Vec<TaskDto>,
    next_id: u64,
    failures: VecDeque<(SyncRequest, String)>,
    pub calls: Vec<SyncRequest>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<TaskDto>) -> Self {
        let next_id = tasks.iter().map(|t| t.id).max().unwrap_or(0);
        Self {
            tasks,
            next_id,
            ..Self::default()
        }
    }

    /// The next request of kind `request` fails with `message`.
    pub fn fail_next(&mut self, request: SyncRequest, message: impl Into<String>) {
        self.failures.push_back((request, message.into()));
    }

    pub fn tasks(&self) -> &[TaskDto] {
        &self.tasks
    }

    fn check(&mut self, request: SyncRequest) -> anyhow::Result<()> {
        self.calls.push(request);
        if let Some(idx) = self.failures.iter().position(|(kind, _)| *kind == request)
            && let Some((_, message)) = self.failures.remove(idx)
        {
            return Err(anyhow!(message));
        }
        Ok(())
    }
}

impl TaskBackend for MemoryBackend {
    fn fetch_all(&mut self) -> anyhow::Result<Vec<TaskDto>> {
        self.check(SyncRequest::Fetch)?;
        Ok(self.tasks.clone())
    }

    fn create(&mut self, create: &TaskCreate) -> anyhow::Result<TaskDto> {
        self.check(SyncRequest::Create)?;
        self.next_id += 1;
        let dto = TaskDto {
            id: self.next_id,
            title: create.title.clone(),
            description: create.description.clone(),
            date: create.date.clone(),
            done: create.done,
        };
        self.tasks.push(dto.clone());
        Ok(dto)
    }

    fn update(&mut self, update: &TaskUpdateArgs) -> anyhow::Result<TaskDto> {
        self.check(SyncRequest::Update)?;
        let task = self
            .tasks
            .iter_mut()
            .find(|task| task.id == update.id)
            .ok_or_else(|| anyhow!("task not found: {}", update.id))?;
        update.patch.apply_to(task);
        Ok(task.clone())
    }

    fn delete(&mut self, id: u64) -> anyhow::Result<()> {
        self.check(SyncRequest::Delete)?;
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        if self.tasks.len() == before {
            return Err(anyhow!("task not found: {id}"));
        }
        Ok(())
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<TaskDto>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: TaskDto = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[TaskDto]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tasklist_shared::{TaskCreate, TaskPatch, TaskUpdateArgs};
    use tempfile::tempdir;

    use super::{JsonlBackend, MemoryBackend, TaskBackend};
    use crate::events::SyncRequest;

    fn create(title: &str) -> TaskCreate {
        TaskCreate {
            title: title.to_string(),
            description: String::new(),
            date: "2026-03-01T10:00:00.000Z".to_string(),
            done: false,
        }
    }

    #[test]
    fn jsonl_backend_assigns_ids_and_persists() {
        let temp = tempdir().expect("tempdir");
        let mut backend = JsonlBackend::open(temp.path(), "todo").expect("open backend");

        let first = backend.create(&create("water plants")).expect("create first");
        let second = backend.create(&create("feed cat")).expect("create second");
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);

        backend
            .update(&TaskUpdateArgs {
                id: first.id,
                patch: TaskPatch {
                    done: Some(true),
                    ..TaskPatch::default()
                },
            })
            .expect("update");
        backend.delete(second.id).expect("delete");
        assert!(backend.delete(second.id).is_err());

        let mut reopened = JsonlBackend::open(temp.path(), "todo").expect("reopen");
        let tasks = reopened.fetch_all().expect("fetch");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "water plants");
        assert!(tasks[0].done);
    }

    #[test]
    fn empty_patch_leaves_the_file_alone() {
        let temp = tempdir().expect("tempdir");
        let mut backend = JsonlBackend::open(temp.path(), "todo").expect("open backend");
        let task = backend.create(&create("water plants")).expect("create");
        let before = std::fs::metadata(&backend.collection_path)
            .and_then(|meta| meta.modified())
            .expect("mtime");

        let same = backend
            .update(&TaskUpdateArgs {
                id: task.id,
                patch: TaskPatch::default(),
            })
            .expect("update");
        assert_eq!(same.title, "water plants");
        let after = std::fs::metadata(&backend.collection_path)
            .and_then(|meta| meta.modified())
            .expect("mtime");
        assert_eq!(before, after);
        assert!(backend
            .update(&TaskUpdateArgs {
                id: 99,
                patch: TaskPatch::default(),
            })
            .is_err());
    }

    #[test]
    fn jsonl_backend_rejects_path_like_collections() {
        let temp = tempdir().expect("tempdir");
        assert!(JsonlBackend::open(temp.path(), "../escape").is_err());
        assert!(JsonlBackend::open(temp.path(), "").is_err());
    }

    #[test]
    fn memory_backend_fails_only_the_queued_request() {
        let mut backend = MemoryBackend::new();
        backend.fail_next(SyncRequest::Create, "server down");

        assert!(backend.fetch_all().is_ok());
        assert!(backend.create(&create("first")).is_err());
        let dto = backend.create(&create("second")).expect("second create");
        assert_eq!(dto.id, 1);
        assert_eq!(backend.tasks().len(), 1);
        assert_eq!(
            backend.calls,
            vec![SyncRequest::Fetch, SyncRequest::Create, SyncRequest::Create]
        );
    }
}
