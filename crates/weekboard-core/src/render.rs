use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::categorize::{Bucket, CategorizedResult};
use crate::config::Config;
use crate::dashboard::DashboardState;
use crate::datetime::{DateRange, format_local};
use crate::task::{Board, ColumnValue, Owner, Task};

const NO_OWNERS: &str = "No owners found for the selected board.";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
        })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn write_boards<W: Write>(&self, mut out: W, boards: &[Board]) -> anyhow::Result<()> {
        if boards.is_empty() {
            writeln!(out, "No boards found.")?;
            return Ok(());
        }
        let headers = vec!["ID".to_string(), "Board".to_string()];
        let rows = boards
            .iter()
            .map(|b| vec![self.paint(&b.id, "33"), b.name.clone()])
            .collect();
        write_table(&mut out, headers, rows)
    }

    pub fn write_owners<W: Write>(&self, mut out: W, owners: &[Owner]) -> anyhow::Result<()> {
        writeln!(out, "Board Owners:")?;
        if owners.is_empty() {
            writeln!(out, "{NO_OWNERS}")?;
        }
        for owner in owners {
            writeln!(out, "  - {}", owner.name)?;
        }
        Ok(())
    }

    pub fn write_range<W: Write>(
        &self,
        mut out: W,
        range: &DateRange,
        zone: &Tz,
    ) -> anyhow::Result<()> {
        writeln!(out, "week start  {}", format_local(range.week_start, zone))?;
        writeln!(out, "now         {}", format_local(range.now, zone))?;
        writeln!(out, "week end    {}", format_local(range.week_end, zone))?;
        Ok(())
    }

    /// Four panels in display order; closed ones show only their header.
    #[tracing::instrument(skip_all)]
    pub fn write_buckets<W: Write>(
        &self,
        mut out: W,
        result: &CategorizedResult,
        is_open: impl Fn(Bucket) -> bool,
        show_subitems: bool,
    ) -> anyhow::Result<()> {
        writeln!(out, "Tasks:")?;
        for (bucket, tasks) in result.iter() {
            let open = is_open(bucket);
            let marker = if open { "▼" } else { "►" };
            let header = format!("{} ({}) {}", bucket.title(), tasks.len(), marker);
            writeln!(out, "{}", self.paint(&header, bucket_color(bucket)))?;
            if open && !tasks.is_empty() {
                self.write_task_table(&mut out, tasks, show_subitems)?;
                writeln!(out)?;
            }
        }
        Ok(())
    }

    pub fn write_dashboard<W: Write>(
        &self,
        mut out: W,
        state: &mut DashboardState,
        range: &DateRange,
        zone: &Tz,
    ) -> anyhow::Result<()> {
        match state.selected_board() {
            Some(board) => writeln!(out, "Board: {} ({})", board.name, board.id)?,
            None => match state.selected() {
                Some(id) => writeln!(out, "Board: {id}")?,
                None => writeln!(out, "Select a board.")?,
            },
        }

        if let Some(message) = state.error() {
            writeln!(out, "{}", self.paint(message, "31"))?;
            return Ok(());
        }
        if state.selected().is_none() {
            return Ok(());
        }
        if state.is_loading() {
            writeln!(out, "Loading...")?;
            return Ok(());
        }

        self.write_owners(&mut out, state.owners())?;
        writeln!(out)?;

        let show_subitems = state.show_subitems();
        let open: Vec<Bucket> = Bucket::ALL
            .into_iter()
            .filter(|b| state.is_open(*b))
            .collect();
        let result = state.categorized(range, zone);
        self.write_buckets(&mut out, result, |b| open.contains(&b), show_subitems)
    }

    fn write_task_table<W: Write>(
        &self,
        out: W,
        tasks: &[Task],
        show_subitems: bool,
    ) -> anyhow::Result<()> {
        let columns = column_headers(tasks);
        let mut headers = Vec::with_capacity(columns.len() + 1);
        headers.push("Task Name".to_string());
        headers.extend(columns.iter().cloned());

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            rows.push(row_cells(&task.name, &task.column_values, &columns));
            if show_subitems {
                for sub in &task.subitems {
                    let name = format!("  ↳ {}", sub.name);
                    rows.push(row_cells(&name, &sub.column_values, &columns));
                }
            }
        }

        write_table(out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn bucket_color(bucket: Bucket) -> &'static str {
    match bucket {
        Bucket::Past => "31",
        Bucket::Current => "33",
        Bucket::Upcoming => "32",
        Bucket::Undated => "37",
    }
}

/// Column titles of the first task, de-duplicated, in their original order.
pub fn column_headers(tasks: &[Task]) -> Vec<String> {
    let Some(first) = tasks.first() else {
        return vec![];
    };
    let mut seen = std::collections::HashSet::new();
    first
        .column_values
        .iter()
        .filter(|c| seen.insert(c.title.as_str()))
        .map(|c| c.title.clone())
        .collect()
}

fn row_cells(name: &str, values: &[ColumnValue], columns: &[String]) -> Vec<String> {
    let mut cells = Vec::with_capacity(columns.len() + 1);
    cells.push(name.to_string());
    for title in columns {
        let text = values
            .iter()
            .find(|c| &c.title == title)
            .map(|c| c.display_text().to_string())
            .unwrap_or_default();
        cells.push(text);
    }
    cells
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
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
