//! Table output formatting for CLI commands
//!
//! Task lists and failure reports rendered with comfy-table. Colors are
//! dropped when `NO_COLOR` is set or the terminal is dumb.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::application::FailedTask;
use crate::domain::models::{truncate_chars, Task, TaskStatus};

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Format a list of tasks as a table
    pub fn format_tasks(&self, tasks: &[Task]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&[
            "ID",
            "Status",
            "Retries",
            "Worker",
            "Description",
            "Summary",
        ]));

        for task in tasks {
            table.add_row(vec![
                Cell::new(task.short_id()),
                self.status_cell(task.status),
                Cell::new(task.retries),
                Cell::new(task.worker.to_string()),
                Cell::new(truncate_chars(&task.description, 60)),
                Cell::new(truncate_chars(&task.summary, 40)),
            ]);
        }

        table.to_string()
    }

    /// Format failed and cascade-failed tasks with their last error
    pub fn format_failures(&self, failures: &[FailedTask]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Status", "Description", "Error"]));

        for failure in failures {
            let error = if failure.error.is_empty() {
                "no error recorded".to_string()
            } else {
                truncate_chars(&failure.error, 80)
            };
            table.add_row(vec![
                Cell::new(&failure.id),
                self.status_cell(failure.status),
                Cell::new(truncate_chars(&failure.description, 50)),
                Cell::new(error),
            ]);
        }

        table.to_string()
    }

    fn status_cell(&self, status: TaskStatus) -> Cell {
        if self.use_colors {
            Cell::new(status.as_str()).fg(status_color(status))
        } else {
            Cell::new(format!("{} {}", status_icon(status), status.as_str()))
        }
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if let Some(width) = self.max_width {
            table.set_width(width);
        }
        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

/// Check if color output is supported
fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Pending => Color::White,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::CascadeFailed => Color::DarkRed,
    }
}

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "○",
        TaskStatus::Running => "⟳",
        TaskStatus::Completed => "✓",
        TaskStatus::Failed => "✗",
        TaskStatus::CascadeFailed => "⊗",
    }
}
