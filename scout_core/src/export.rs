//! CSV export of projected entries.

use crate::entries::EntryPoint;
use crate::units::{scale_mgdl, GlucoseUnits};
use crate::Result;
use chrono::{DateTime, SecondsFormat};
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    mills: i64,
    time: Option<String>,
    kind: &'static str,
    mgdl: f64,
    scaled: f64,
    units: GlucoseUnits,
    color: &'static str,
    direction: Option<String>,
    device: Option<String>,
}

impl CsvRow {
    fn new(entry: &EntryPoint, units: GlucoseUnits) -> Self {
        CsvRow {
            mills: entry.mills,
            time: DateTime::from_timestamp_millis(entry.mills)
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            kind: entry.kind.as_str(),
            mgdl: entry.mgdl,
            scaled: scale_mgdl(entry.mgdl, units),
            units,
            color: entry.color.as_str(),
            direction: entry.direction.clone(),
            device: entry.device.clone(),
        }
    }
}

/// Append entries to a CSV file, writing headers only when the file is new.
///
/// The file is flushed and synced before returning. Returns the number of
/// rows written.
pub fn append_entries_csv(
    entries: &[EntryPoint],
    csv_path: &Path,
    units: GlucoseUnits,
) -> Result<usize> {
    if entries.is_empty() {
        tracing::info!("No entries to export");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for entry in entries {
        writer.serialize(CsvRow::new(entry, units))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} entries to {:?}", entries.len(), csv_path);
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entries::{EntryKind, PointColor};

    fn entry(mills: i64, mgdl: f64) -> EntryPoint {
        EntryPoint {
            mills,
            mgdl,
            color: PointColor::Grey,
            kind: EntryKind::Sgv,
            direction: Some("Flat".into()),
            noise: None,
            filtered: None,
            unfiltered: None,
            device: None,
        }
    }

    #[test]
    fn test_export_creates_file_with_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("out").join("entries.csv");

        let count = append_entries_csv(&[entry(0, 180.0)], &csv_path, GlucoseUnits::Mmol).unwrap();
        assert_eq!(count, 1);

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "mills");
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[1], "1970-01-01T00:00:00.000Z");
        assert_eq!(&row[2], "sgv");
        assert_eq!(&row[4], "10.0");
        assert_eq!(&row[5], "mmol");
    }

    #[test]
    fn test_export_appends_without_repeating_headers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("entries.csv");

        append_entries_csv(&[entry(1, 100.0)], &csv_path, GlucoseUnits::MgDl).unwrap();
        append_entries_csv(&[entry(2, 110.0), entry(3, 120.0)], &csv_path, GlucoseUnits::MgDl)
            .unwrap();

        let reader = csv::Reader::from_path(&csv_path).unwrap();
        assert_eq!(reader.into_records().count(), 3);
    }

    #[test]
    fn test_export_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("entries.csv");
        assert_eq!(append_entries_csv(&[], &csv_path, GlucoseUnits::MgDl).unwrap(), 0);
        assert!(!csv_path.exists());
    }
}
