use std::io::{self, Write};

use anyhow::anyhow;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::TaskBackend;
use crate::cli::Command;
use crate::list::ListController;
use crate::render::Render;
use crate::row::CommitOutcome;

/// Applies one CLI command to an initialized list, flushes the outbox and
/// prints the resulting list.
#[tracing::instrument(skip(list, out))]
pub fn dispatch<B, R, W>(
    list: &mut ListController<B, R>,
    command: Command,
    out: &mut W,
) -> anyhow::Result<()>
where
    B: TaskBackend,
    R: Render,
    W: Write,
{
    match command {
        Command::List { filter, order } => {
            if let Some(order) = order {
                list.set_sort_order(order);
            }
            if let Some(filter) = filter {
                list.set_filter(filter);
            }
        }
        Command::Add {
            title,
            description,
            due,
        } => {
            let key = list.create_from_input(&title, &description, &due)?;
            info!(%key, "task added");
        }
        Command::Edit {
            position,
            field,
            value,
        } => {
            let key = resolve(list, position)?;
            match list.apply_edit(key, field, &value)? {
                CommitOutcome::Destroyed => writeln!(out, "deleted task {position}")?,
                CommitOutcome::Unchanged => writeln!(out, "task {position} unchanged")?,
                CommitOutcome::Updated => {}
            }
        }
        Command::Toggle { position } => {
            let key = resolve(list, position)?;
            list.toggle_done(key)?;
        }
        Command::Delete { position } => {
            let key = resolve(list, position)?;
            list.delete(key)?;
        }
        Command::ToggleAll { undone } => {
            let changed = list.toggle_all_complete(!undone);
            info!(changed, "toggled all tasks");
        }
        Command::ClearCompleted => {
            let cleared = list.clear_completed();
            writeln!(out, "cleared {cleared} completed task(s)")?;
        }
    }

    let report = list.sync();
    if report.failed > 0 {
        warn!(?report, "some changes were not saved");
        writeln!(out, "warning: {} change(s) were not saved", report.failed)?;
    }

    writeln!(out, "{}", list.render())?;
    out.flush()?;
    Ok(())
}

fn resolve<B, R>(list: &ListController<B, R>, position: usize) -> anyhow::Result<Uuid>
where
    B: TaskBackend,
    R: Render,
{
    list.key_at(position)
        .ok_or_else(|| anyhow!("no task at position {position} ({} tasks)", list.store().len()))
}

pub fn stdout() -> io::StdoutLock<'static> {
    io::stdout().lock()
}
