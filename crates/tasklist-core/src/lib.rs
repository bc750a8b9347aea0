pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod events;
pub mod list;
pub mod record;
pub mod render;
pub mod row;
pub mod store;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting todo CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.todorc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir = cfg
    .data_dir(cli.data.as_deref())
    .context(
      "failed to resolve data \
       directory"
    )?;

  let backend =
    backend::JsonlBackend::open(
      &data_dir,
      &cfg.collection()
    )
    .with_context(|| {
      format!(
        "failed to open task \
         collection at {}",
        data_dir.display()
      )
    })?;

  let tz = cfg.timezone()?;
  let renderer =
    render::TextRenderer::new(&cfg)?;
  let store = store::TaskStore::new(
    cfg.sort_order()?
  );

  let mut list =
    list::ListController::new(
      store, backend, renderer, tz
    );
  list.initialize()?;
  list.set_filter(cfg.filter()?);

  let command = cli.command.unwrap_or(
    cli::Command::List {
      filter: None,
      order:  None
    }
  );
  commands::dispatch(
    &mut list,
    command,
    &mut commands::stdout()
  )?;

  info!("done");
  Ok(())
}
