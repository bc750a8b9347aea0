use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::list::FilterCategory;
use crate::row::EditField;
use crate::store::SortOrder;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "todo",
    version,
    about = "Task list with optimistic sync to a task collection",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "todorc")]
    pub todorc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the list
    List {
        #[arg(long, value_parser = parse_filter)]
        filter: Option<FilterCategory>,
        #[arg(long, value_parser = parse_order)]
        order: Option<SortOrder>,
    },
    /// Create a task; an empty title gets a placeholder
    Add {
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        due: String,
    },
    /// Edit one field of the task at POSITION; an empty title deletes it
    Edit {
        position: usize,
        #[arg(value_parser = parse_field)]
        field: EditField,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Flip the done flag of the task at POSITION
    Toggle { position: usize },
    /// Delete the task at POSITION
    Delete { position: usize },
    /// Mark every task done, or not done with --undone
    ToggleAll {
        #[arg(long)]
        undone: bool,
    },
    /// Delete every completed task
    ClearCompleted,
}

fn parse_filter(s: &str) -> anyhow::Result<FilterCategory> {
    s.parse()
}

fn parse_order(s: &str) -> anyhow::Result<SortOrder> {
    s.parse()
}

fn parse_field(s: &str) -> anyhow::Result<EditField> {
    s.parse()
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};
    use crate::list::FilterCategory;
    use crate::row::EditField;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["todo", "rc.filter:old", "list", "rc.color=off"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, args(&["todo", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.filter".to_string(), "old".to_string()),
                ("rc.color".to_string(), "off".to_string()),
            ]
        );
    }

    #[test]
    fn edit_accepts_empty_value_and_field_names() {
        let cli = GlobalCli::parse_from(args(&["todo", "edit", "2", "title", ""]));
        match cli.command {
            Some(Command::Edit {
                position,
                field,
                value,
            }) => {
                assert_eq!(position, 2);
                assert_eq!(field, EditField::Title);
                assert!(value.is_empty());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn list_parses_filter() {
        let cli = GlobalCli::parse_from(args(&["todo", "-v", "list", "--filter", "completed"]));
        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Some(Command::List {
                filter: Some(FilterCategory::Completed),
                order: None
            })
        ));
    }
}
