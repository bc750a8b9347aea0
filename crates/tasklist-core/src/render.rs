use std::io::{self, IsTerminal};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::Config;
use crate::datetime::{format_due, parse_timezone};
use crate::list::FilterCategory;
use crate::record::{DisplayClasses, TaskRecord};
use crate::row::EditField;
use crate::store::SortOrder;

const TITLE_WIDTH: usize = 32;
const DESCRIPTION_WIDTH: usize = 40;

/// Everything a row fragment is rendered from.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    pub position: usize,
    pub record: &'a TaskRecord,
    pub classes: DisplayClasses,
    pub editing: Option<(EditField, &'a str)>,
    pub sync_error: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListSummary {
    pub total: usize,
    pub done: usize,
    pub remaining: usize,
    pub visible: usize,
    pub order: SortOrder,
    pub filter: FilterCategory,
}

/// Turns rows and the list shell into display fragments. Rendering the same
/// view twice must give the same output.
pub trait Render {
    fn render_row(&self, view: &RowView<'_>) -> String;

    fn render_shell(&self, summary: &ListSummary) -> String;
}

#[derive(Debug, Clone)]
pub struct TextRenderer {
    color: bool,
    tz: Tz,
}

impl TextRenderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };
        let tz = parse_timezone(&cfg.get("timezone").unwrap_or_default())?;

        Ok(Self { color, tz })
    }

    pub fn plain(tz: Tz) -> Self {
        Self { color: false, tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

impl Render for TextRenderer {
    fn render_row(&self, view: &RowView<'_>) -> String {
        let record = view.record;
        let check = if record.done { "[x]" } else { "[ ]" };
        let due = format_due(record.due, self.tz);
        let due = if view.classes.old {
            self.paint(&due, "31")
        } else if view.classes.pending {
            self.paint(&due, "33")
        } else {
            due
        };

        let (title, description) = match view.editing {
            Some((EditField::Title, buffer)) => (format!("{buffer}_"), record.description.clone()),
            Some((EditField::Description, buffer)) => (record.title.clone(), format!("{buffer}_")),
            _ => (record.title.clone(), record.description.clone()),
        };
        let due = match view.editing {
            Some((EditField::DueDate, buffer)) => format!("{buffer}_"),
            _ => due,
        };

        let mut line = format!(
            "{:>3} {} {} {} {}",
            view.position,
            check,
            fit(&due, 16),
            fit(&title, TITLE_WIDTH),
            fit(&description, DESCRIPTION_WIDTH),
        );

        let classes = view.classes.names().join(" ");
        if !classes.is_empty() {
            line.push_str(&format!(" ({classes})"));
        }
        if view.editing.is_some() {
            line.push_str(" [editing]");
        }
        if let Some(err) = view.sync_error {
            line.push_str(&self.paint(&format!(" ! not saved: {err}"), "31"));
        }
        line.trim_end().to_string()
    }

    fn render_shell(&self, summary: &ListSummary) -> String {
        format!(
            "{} tasks, {} done, {} remaining | order: {} | filter: {} ({} shown)",
            summary.total,
            summary.done,
            summary.remaining,
            summary.order,
            summary.filter,
            summary.visible,
        )
    }
}

/// Pads or truncates `text` to exactly `width` display columns.
fn fit(text: &str, width: usize) -> String {
    let visible = UnicodeWidthStr::width(strip_ansi(text).as_str());
    if visible <= width {
        return format!("{text}{}", " ".repeat(width - visible));
    }

    let plain = strip_ansi(text);
    let mut out = String::with_capacity(width);
    let mut used = 0;
    for ch in plain.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    used += 1;
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Render, RowView, TextRenderer, fit};
    use crate::record::{TaskAttrs, TaskRecord};
    use crate::row::EditField;

    #[test]
    fn fit_pads_and_truncates_by_display_width() {
        assert_eq!(fit("abc", 5), "abc  ");
        assert_eq!(fit("abcdefgh", 5), "abcd…");
        assert_eq!(fit("日本語テキスト", 7), "日本語…");
    }

    #[test]
    fn row_rendering_is_idempotent_and_shows_state() {
        let now = Utc::now();
        let record = TaskRecord::new(
            TaskAttrs {
                title: Some("pay rent".to_string()),
                due: Some(now - Duration::days(1)),
                ..TaskAttrs::default()
            },
            now,
        );
        let renderer = TextRenderer::plain(chrono_tz::UTC);
        let view = RowView {
            position: 2,
            record: &record,
            classes: record.display_classes(now),
            editing: None,
            sync_error: None,
        };

        let first = renderer.render_row(&view);
        assert_eq!(first, renderer.render_row(&view));
        assert!(first.starts_with("  2 [ ]"));
        assert!(first.contains("pay rent"));
        assert!(first.ends_with("(old)"));

        let editing = RowView {
            editing: Some((EditField::Title, "pay rent today")),
            sync_error: Some("offline"),
            ..view
        };
        let line = renderer.render_row(&editing);
        assert!(line.contains("pay rent today_"));
        assert!(line.contains("[editing]"));
        assert!(line.ends_with("! not saved: offline"));
    }
}
