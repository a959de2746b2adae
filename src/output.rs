use std::fs;
use std::path::Path;

use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use crate::error::Result;

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    for r in rows {
        wtr.serialize(r)?;
    }
    wtr.flush()?;
    info!(path = %path.display(), rows = rows.len(), "wrote table");
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    fs::write(path, s)?;
    info!(path = %path.display(), "wrote summary");
    Ok(())
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)?;
    info!(path = %path.display(), bytes = contents.len(), "wrote document");
    Ok(())
}

/// Print a numbered section header followed by a Markdown preview of the
/// first `max_rows` rows.
pub fn preview_table<T>(section_no: usize, title: &str, note: Option<&str>, rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    println!("\nSection {}: {}", section_no, title);
    if let Some(n) = note {
        println!("({})", n);
    }
    println!();
    preview_table_rows(rows, max_rows);
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().take(max_rows).cloned().collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    println!("{}\n", markdown_table(slice));
}

pub fn markdown_table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).with(Style::markdown()).to_string()
}
