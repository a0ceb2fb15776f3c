//! Append-only CSV record log.
//!
//! - The header row is written once, when the file is new or empty.
//! - Reads skip rows that no longer deserialize (hand edits, torn final lines) with a warning.
//! - Appends are a single buffered write followed by a flush; there is no rewrite path.

use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct AppendLog<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> AppendLog<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AppendLog {
            path: path.into(),
            _record: PhantomData,
        }
    }

    /// Every readable record in file order. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<T>, StoreError> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(file);
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (index, row) in reader.deserialize::<T>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    // header is line 1
                    warn!("{}: skipping line {}: {}", self.path.display(), index + 2, e);
                }
            }
        }
        if skipped > 0 {
            warn!("{}: skipped {} unreadable record(s)", self.path.display(), skipped);
        }
        Ok(records)
    }

    pub fn append(&self, records: &[T]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        let is_empty = file.metadata().map_err(|source| self.io_error(source))?.len() == 0;
        // terminate a torn final line so the new rows start on their own line
        if !is_empty && !ends_with_newline(&mut file).map_err(|source| self.io_error(source))? {
            file.write_all(b"\n").map_err(|source| self.io_error(source))?;
        }

        let mut writer = csv::WriterBuilder::new().has_headers(is_empty).from_writer(file);
        for record in records {
            writer.serialize(record).map_err(|source| self.csv_error(source))?;
        }
        writer.flush().map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> StoreError {
        StoreError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::forecast::{AccuracyRecord, PredictionRecord};
    use crate::models::telemetry::NodeId;
    use chrono::{TimeZone, Utc};

    fn prediction(hours: u32, predicted_pct: f64) -> PredictionRecord {
        PredictionRecord {
            made_at: Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap(),
            node_id: NodeId::new("!9eed0410"),
            horizon_hours: hours,
            predicted_pct,
            current_battery_at_prediction: 80.0,
            weather_description: "clear sky, 5% clouds, 22.0C".to_string(),
        }
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log: AppendLog<PredictionRecord> = AppendLog::new(dir.path().join("none.csv"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn header_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power_predictions.csv");
        let log = AppendLog::new(&path);
        log.append(&[prediction(6, 71.0)]).unwrap();
        log.append(&[prediction(12, 62.5), prediction(24, 44.0)]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "made_at,node_id,horizon_hours,predicted_pct,current_battery_at_prediction,weather_description"
        );
        assert_eq!(content.matches("made_at").count(), 1);

        let back = log.read_all().unwrap();
        assert_eq!(back, vec![prediction(6, 71.0), prediction(12, 62.5), prediction(24, 44.0)]);
    }

    #[test]
    fn pre_created_empty_file_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power_predictions.csv");
        fs::File::create(&path).unwrap();
        let log = AppendLog::new(&path);
        log.append(&[prediction(6, 71.0)]).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power_predictions.csv");
        let log = AppendLog::new(&path);
        log.append(&[prediction(6, 71.0)]).unwrap();
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("garbage,row\n2025-07-01T12:00:00Z,!9eed0410,six,1,2,x\n");
        fs::write(&path, content).unwrap();
        log.append(&[prediction(24, 40.0)]).unwrap();

        let back = log.read_all().unwrap();
        assert_eq!(back, vec![prediction(6, 71.0), prediction(24, 40.0)]);
    }

    #[test]
    fn torn_last_line_does_not_swallow_the_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("power_predictions.csv");
        let log = AppendLog::new(&path);
        log.append(&[prediction(6, 71.0)]).unwrap();
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("2025-07-01T12:00:00Z,!9eed0410,12");
        fs::write(&path, content).unwrap();

        log.append(&[prediction(24, 40.0)]).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        assert_eq!(content.lines().count(), 4);
        assert_eq!(log.read_all().unwrap(), vec![prediction(6, 71.0), prediction(24, 40.0)]);
    }

    #[test]
    fn empty_accuracy_columns_read_back_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::new(dir.path().join("prediction_accuracy.csv"));
        let record = AccuracyRecord {
            checked_at: Utc.with_ymd_and_hms(2025, 7, 1, 18, 0, 0).unwrap(),
            node_id: NodeId::new("!9eed0410"),
            prediction_made_at: Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap(),
            predicted_6h: Some(72.0),
            actual_6h: Some(70.0),
            predicted_12h: None,
            actual_12h: None,
            predicted_24h: None,
            actual_24h: None,
            error_6h: Some(2.0),
            error_12h: None,
            error_24h: None,
            weather_description: "few clouds".to_string(),
        };
        log.append(std::slice::from_ref(&record)).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![record]);
    }

    #[test]
    fn appends_into_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::new(dir.path().join("data").join("power_predictions.csv"));
        log.append(&[prediction(6, 71.0)]).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }
}
