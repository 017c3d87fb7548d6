use rust_xlsxwriter::{Format, Workbook, XlsxError};
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::database::{Database, EntryFilter, StoreError};
use crate::rounding::RoundingConfig;

const HEADERS: [&str; 8] = [
    "Date",
    "Project",
    "Work package",
    "Start",
    "End",
    "Duration (s)",
    "Hours",
    "Ticket",
];

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("No entries to export.")]
    NoData,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Spreadsheet could not be written: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Writes the matching entries to an `.xlsx` file and returns how many rows were written.
pub fn export_entries(
    db: &Database,
    filter: &EntryFilter,
    catalog: &Config,
    path: &Path,
) -> Result<usize, ExportError> {
    let entries = db.entries(filter)?;
    if entries.is_empty() {
        return Err(ExportError::NoData);
    }

    let rounding: RoundingConfig = catalog.rounding;
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Entries")?;

    for (col, title) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *title, &header)?;
    }

    for (index, entry) in entries.iter().enumerate() {
        let row = index as u32 + 1;
        let package = catalog.work_package_label(&entry.project, &entry.work_package);
        sheet.write_string(row, 0, entry.date().format("%Y-%m-%d").to_string())?;
        sheet.write_string(row, 1, &entry.project)?;
        sheet.write_string(row, 2, &package)?;
        sheet.write_string(row, 3, entry.started_at.format("%H:%M:%S").to_string())?;
        sheet.write_string(row, 4, entry.ended_at.format("%H:%M:%S").to_string())?;
        sheet.write_number(row, 5, entry.duration_secs)?;
        sheet.write_number(row, 6, rounding.hours(entry.duration_secs))?;
        if let Some(issue) = entry.remote_issue_id {
            sheet.write_number(row, 7, issue as f64)?;
        }
    }

    sheet.set_column_width(1, 20)?;
    sheet.set_column_width(2, 32)?;
    workbook.save(path)?;

    info!(path = %path.display(), rows = entries.len(), "entries exported");
    Ok(entries.len())
}
