use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::parse_timezone;
use crate::list::FilterCategory;
use crate::store::SortOrder;

const RC_ENV_VAR: &str = "TODORC";
const RC_FILE_NAME: &str = ".todorc";
const DEFAULT_DATA_DIR: &str = "~/.todo";
const DEFAULT_COLLECTION: &str = "todo";
const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", DEFAULT_DATA_DIR),
      ("collection", DEFAULT_COLLECTION),
      ("sort.order", "newer-first"),
      ("filter", "all"),
      ("color", "on"),
      ("timezone", "UTC")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();
    match locate_rc(rc_override) {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.read_rc(&path, 0)?;
      }
      | None => {
        debug!("no rc file; defaults only")
      }
    }
    Ok(cfg)
  }

  /// Layers `rc.key=value` style overrides
  /// on top of whatever the rc files set.
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    self.map.extend(
      overrides.into_iter().map(
        |(key, value)| {
          let key = match key
            .strip_prefix("rc.")
          {
            | Some(bare) => {
              bare.to_string()
            }
            | None => key
          };
          debug!(%key, %value, "rc override");
          (key, value)
        }
      )
    );
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn collection(&self) -> String {
    self
      .get("collection")
      .filter(|name| {
        !name.trim().is_empty()
      })
      .unwrap_or_else(|| {
        DEFAULT_COLLECTION.to_string()
      })
  }

  pub fn sort_order(
    &self
  ) -> anyhow::Result<SortOrder> {
    match self.get("sort.order") {
      | Some(raw) => raw
        .parse()
        .context("invalid sort.order"),
      | None => Ok(SortOrder::default())
    }
  }

  pub fn filter(
    &self
  ) -> anyhow::Result<FilterCategory> {
    match self.get("filter") {
      | Some(raw) => raw
        .parse()
        .context("invalid filter"),
      | None => {
        Ok(FilterCategory::default())
      }
    }
  }

  pub fn timezone(
    &self
  ) -> anyhow::Result<Tz> {
    parse_timezone(
      &self
        .get("timezone")
        .unwrap_or_default()
    )
  }

  /// Resolves the data directory (explicit
  /// flag first, then `data.location`) and
  /// creates it when missing.
  #[tracing::instrument(skip(self))]
  pub fn data_dir(
    &self,
    flag: Option<&Path>
  ) -> anyhow::Result<PathBuf> {
    let dir = match flag {
      | Some(path) => path.to_path_buf(),
      | None => expand_tilde(Path::new(
        &self
          .get("data.location")
          .unwrap_or_else(|| {
            DEFAULT_DATA_DIR.to_string()
          })
      ))
    };

    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "cannot create data \
           directory {}",
          dir.display()
        )
      })?;
    debug!(dir = %dir.display(), "data directory ready");
    Ok(dir)
  }

  fn read_rc(
    &mut self,
    path: &Path,
    depth: usize
  ) -> anyhow::Result<()> {
    if depth > MAX_INCLUDE_DEPTH {
      return Err(anyhow!(
        "includes nested deeper than \
         {MAX_INCLUDE_DEPTH} at {}",
        path.display()
      ));
    }

    let path = expand_tilde(path);
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "cannot read rc file {}",
          path.display()
        )
      })?;
    self.loaded_files.push(path.clone());
    let dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw)
        .with_context(|| {
          format!(
            "{}:{}",
            path.display(),
            idx + 1
          )
        })?;

      match parsed {
        | None => {}
        | Some(RcLine::Setting {
          key,
          value
        }) => {
          trace!(key, value, "rc setting");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
        | Some(RcLine::Include(target)) => {
          let target =
            include_target(&dir, target);
          if self
            .loaded_files
            .contains(&target)
          {
            warn!(include = %target.display(), "rc file already loaded; skipping");
          } else if !target.is_file() {
            warn!(include = %target.display(), "included rc file missing; skipping");
          } else {
            self.read_rc(
              &target,
              depth + 1
            )?;
          }
        }
      }
    }

    Ok(())
  }
}

/// One meaningful line of an rc file.
#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
  Include(&'a str),
  Setting {
    key:   &'a str,
    value: &'a str
  }
}

/// `None` for blank and comment-only
/// lines.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>> {
  let line = match raw.find('#') {
    | Some(cut) => &raw[..cut],
    | None => raw
  }
  .trim();

  if line.is_empty() {
    return Ok(None);
  }
  if let Some(target) =
    line.strip_prefix("include ")
  {
    let target = target.trim();
    if target.is_empty() {
      return Err(anyhow!(
        "include needs a path"
      ));
    }
    return Ok(Some(RcLine::Include(
      target
    )));
  }

  let (key, value) =
    line.split_once('=').ok_or_else(
      || {
        anyhow!(
          "expected key=value, got \
           {line:?}"
        )
      }
    )?;
  let key = key.trim();
  if key.is_empty() {
    return Err(anyhow!(
      "setting without a key"
    ));
  }
  Ok(Some(RcLine::Setting {
    key,
    value: value.trim()
  }))
}

/// Explicit path, then `$TODORC`
/// (`/dev/null` disables), then
/// `~/.todorc` when it exists.
fn locate_rc(
  explicit: Option<&Path>
) -> Option<PathBuf> {
  if let Some(path) = explicit {
    return Some(path.to_path_buf());
  }
  match std::env::var_os(RC_ENV_VAR) {
    | Some(value) if value == "/dev/null" => {
      None
    }
    | Some(value) => {
      Some(PathBuf::from(value))
    }
    | None => dirs::home_dir()
      .map(|home| home.join(RC_FILE_NAME))
      .filter(|candidate| {
        candidate.is_file()
      })
  }
}

fn include_target(
  dir: &Path,
  target: &str
) -> PathBuf {
  let target =
    expand_tilde(Path::new(target));
  if target.is_relative() {
    dir.join(target)
  } else {
    target
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  match (
    path.strip_prefix("~"),
    dirs::home_dir()
  ) {
    | (Ok(rest), Some(home)) => {
      home.join(rest)
    }
    | _ => path.to_path_buf()
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::Config;
  use crate::list::FilterCategory;
  use crate::store::SortOrder;

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let temp =
      tempdir().expect("tempdir");
    let main = temp.path().join("todorc");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &main,
      "# main\ncollection = chores\n\
       include extra.rc\n\
       sort.order = older-first # trailing\n"
    )
    .expect("write rc");
    fs::write(
      &extra,
      "filter = pending\n\
       timezone = Europe/Madrid\n"
    )
    .expect("write include");

    let mut cfg = Config::load(Some(
      main.as_path()
    ))
    .expect("load config");
    assert_eq!(cfg.collection(), "chores");
    assert_eq!(
      cfg.sort_order().expect("order"),
      SortOrder::OlderFirst
    );
    assert_eq!(
      cfg.filter().expect("filter"),
      FilterCategory::Pending
    );
    assert_eq!(
      cfg.timezone().expect("tz").name(),
      "Europe/Madrid"
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    cfg.apply_overrides([(
      "rc.filter".to_string(),
      "completed".to_string()
    )]);
    assert_eq!(
      cfg.filter().expect("filter"),
      FilterCategory::Completed
    );
  }

  #[test]
  fn malformed_line_is_rejected() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(&rc, "collection\n")
      .expect("write rc");
    assert!(
      Config::load(Some(rc.as_path()))
        .is_err()
    );
  }

  #[test]
  fn rc_lines_parse_and_self_include_is_skipped()
  {
    use super::{
      RcLine,
      parse_rc_line
    };

    assert_eq!(
      parse_rc_line("  # only a comment")
        .expect("comment"),
      None
    );
    assert_eq!(
      parse_rc_line("color = off # tty")
        .expect("setting"),
      Some(RcLine::Setting {
        key:   "color",
        value: "off"
      })
    );
    assert!(parse_rc_line("= off").is_err());
    assert!(parse_rc_line("include ").is_err());

    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("todorc");
    fs::write(
      &rc,
      "include todorc\ncolor = off\n"
    )
    .expect("write rc");
    let cfg = Config::load(Some(
      rc.as_path()
    ))
    .expect("self include is skipped");
    assert_eq!(
      cfg.get("color").as_deref(),
      Some("off")
    );
    assert_eq!(cfg.loaded_files.len(), 1);
  }

  #[test]
  fn data_dir_flag_wins_and_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let wanted =
      temp.path().join("nested/data");
    let cfg = Config::default();
    let dir = cfg
      .data_dir(Some(wanted.as_path()))
      .expect("data dir");
    assert_eq!(dir, wanted);
    assert!(dir.is_dir());
  }

  #[test]
  fn defaults_are_usable() {
    let cfg = Config::default();
    assert_eq!(cfg.collection(), "todo");
    assert_eq!(
      cfg.sort_order().expect("order"),
      SortOrder::NewerFirst
    );
    assert_eq!(
      cfg.timezone().expect("tz"),
      chrono_tz::UTC
    );
  }
}
