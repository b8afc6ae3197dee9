//! Append-only CSV log of sample records.
//!
//! Layout: `Timestamp,Thermistor1..K,Thermocouple,Comment`. The header is
//! written once, when the file is empty at open time, so a run can append to an
//! earlier log with the same name. Readers accept logs written without the
//! Comment column.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use log::warn;

use crate::error::{LabError, Result};
use crate::models::{CommentOutcome, SampleRecord};

const TIMESTAMP_COLUMN: &str = "Timestamp";
const THERMISTOR_PREFIX: &str = "Thermistor";
const THERMOCOUPLE_COLUMN: &str = "Thermocouple";
const COMMENT_COLUMN: &str = "Comment";
const COMMENT_SEPARATOR: &str = "; ";

pub fn header(thermistor_count: usize) -> Vec<String> {
    let mut columns = Vec::with_capacity(thermistor_count + 3);
    columns.push(TIMESTAMP_COLUMN.to_string());
    columns.extend((1..=thermistor_count).map(|i| format!("{THERMISTOR_PREFIX}{i}")));
    columns.push(THERMOCOUPLE_COLUMN.to_string());
    columns.push(COMMENT_COLUMN.to_string());
    columns
}

fn format_reading(value: f64) -> String {
    format!("{value:.2}")
}

fn parse_reading(field: &str) -> f64 {
    let field = field.trim();
    if field.is_empty() {
        return f64::NAN;
    }
    field.parse().unwrap_or(f64::NAN)
}

fn record_row(record: &SampleRecord) -> Vec<String> {
    let mut row = Vec::with_capacity(record.thermistors.len() + 3);
    row.push(record.timestamp_key());
    row.extend(record.thermistors.iter().copied().map(format_reading));
    row.push(format_reading(record.thermocouple));
    row.push(record.comment.clone().unwrap_or_default());
    row
}

/// Open handle on one session's log. Every append is flushed and synced
/// before returning, so a crash loses at most the record being written.
pub struct LogStore {
    path: PathBuf,
    thermistor_count: usize,
    writer: Option<csv::Writer<File>>,
}

impl LogStore {
    pub fn open(path: impl Into<PathBuf>, thermistor_count: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| LabError::io(parent, err))?;
            }
        }

        let mut store = Self {
            path,
            thermistor_count,
            writer: None,
        };
        let needs_header = store.reopen()?;
        if needs_header {
            store.write_row(&header(thermistor_count))?;
        }
        Ok(store)
    }

    /// Returns true when the file is empty.
    fn reopen(&mut self) -> Result<bool> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| LabError::io(&self.path, err))?;
        let empty = file
            .metadata()
            .map_err(|err| LabError::io(&self.path, err))?
            .len()
            == 0;
        self.writer = Some(WriterBuilder::new().flexible(true).from_writer(file));
        Ok(empty)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn thermistor_count(&self) -> usize {
        self.thermistor_count
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    pub fn append(&mut self, record: &SampleRecord) -> Result<()> {
        self.write_row(&record_row(record))
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(LabError::WorkerStopped("log store"))?;
        writer.write_record(row)?;
        writer.flush().map_err(|err| LabError::io(&self.path, err))?;
        writer
            .get_ref()
            .sync_data()
            .map_err(|err| LabError::io(&self.path, err))
    }

    /// Patch the comment of the first record stamped `timestamp`. The file is
    /// rewritten through a temporary and renamed over, so the append handle is
    /// reopened afterwards.
    pub fn patch_comment(&mut self, timestamp: &str, text: &str) -> Result<CommentOutcome> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|err| LabError::io(&self.path, err))?;
        }
        let outcome = patch_comment_file(&self.path, timestamp, text);
        self.reopen()?;
        outcome
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|err| LabError::io(&self.path, err))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|err| LabError::io(&self.path, err))?;
        }
        Ok(())
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Failed to close log {}: {err}", self.path.display());
        }
    }
}

struct Columns {
    thermistors: Vec<usize>,
    thermocouple: Option<usize>,
    comment: Option<usize>,
}

impl Columns {
    fn from_header(header: &StringRecord) -> Self {
        let mut columns = Columns {
            thermistors: Vec::new(),
            thermocouple: None,
            comment: None,
        };
        for (idx, name) in header.iter().enumerate() {
            let name = name.trim();
            if name.starts_with(THERMISTOR_PREFIX) {
                columns.thermistors.push(idx);
            } else if name == THERMOCOUPLE_COLUMN {
                columns.thermocouple = Some(idx);
            } else if name == COMMENT_COLUMN {
                columns.comment = Some(idx);
            }
        }
        columns
    }

    fn parse(&self, row: &StringRecord) -> Option<SampleRecord> {
        let timestamp = SampleRecord::parse_timestamp(row.get(0)?)?;
        let field = |idx: usize| row.get(idx).map(parse_reading).unwrap_or(f64::NAN);
        let comment = self
            .comment
            .and_then(|idx| row.get(idx))
            .map(str::to_string)
            .filter(|c| !c.is_empty());

        Some(SampleRecord {
            timestamp,
            thermistors: self.thermistors.iter().map(|&idx| field(idx)).collect(),
            thermocouple: self.thermocouple.map(field).unwrap_or(f64::NAN),
            comment,
        })
    }
}

/// Every record in the log, in file order.
pub fn read_records(path: &Path) -> Result<Vec<SampleRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?;

    let columns = Columns::from_header(reader.headers()?);
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        match columns.parse(&row) {
            Some(record) => records.push(record),
            None => warn!("Skipping malformed row in {}: {:?}", path.display(), row),
        }
    }
    Ok(records)
}

/// The last `n` records, oldest first.
pub fn latest_records(path: &Path, n: usize) -> Result<Vec<SampleRecord>> {
    let mut records = read_records(path)?;
    let skip = records.len().saturating_sub(n);
    Ok(records.split_off(skip))
}

/// Set (or append to) the comment of the first row whose timestamp equals
/// `timestamp` exactly. A log without a Comment column gains one.
pub fn patch_comment_file(path: &Path, timestamp: &str, text: &str) -> Result<CommentOutcome> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows: Vec<StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

    let Some(header_row) = rows.first() else {
        return Ok(CommentOutcome::NotFound);
    };
    let mut header: Vec<String> = header_row.iter().map(str::to_string).collect();
    let comment_idx = match header.iter().position(|h| h.trim() == COMMENT_COLUMN) {
        Some(idx) => idx,
        None => {
            header.push(COMMENT_COLUMN.to_string());
            header.len() - 1
        }
    };
    let width = header.len();

    let target = rows
        .iter()
        .skip(1)
        .position(|row| row.get(0).map(str::trim) == Some(timestamp))
        .map(|pos| pos + 1);
    let Some(target) = target else {
        return Ok(CommentOutcome::NotFound);
    };

    rows[0] = StringRecord::from(header);
    let mut fields: Vec<String> = rows[target].iter().map(str::to_string).collect();
    fields.resize(width, String::new());
    let existing = fields[comment_idx].trim().to_string();
    fields[comment_idx] = if existing.is_empty() {
        text.to_string()
    } else {
        format!("{existing}{COMMENT_SEPARATOR}{text}")
    };
    rows[target] = StringRecord::from(fields);

    let tmp_path = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp_path).map_err(|err| LabError::io(&tmp_path, err))?;
        let mut writer = WriterBuilder::new().flexible(true).from_writer(file);
        for row in &rows {
            if row.len() < width {
                let mut padded: Vec<&str> = row.iter().collect();
                padded.resize(width, "");
                writer.write_record(&padded)?;
            } else {
                writer.write_record(row)?;
            }
        }
        writer.flush().map_err(|err| LabError::io(&tmp_path, err))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|err| LabError::io(&tmp_path, err))?;
    }
    fs::rename(&tmp_path, path).map_err(|err| LabError::io(path, err))?;

    Ok(CommentOutcome::Found)
}
