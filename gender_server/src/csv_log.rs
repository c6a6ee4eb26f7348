//! Append-only CSV log of gender observations.
//!
//! The file starts with a `Timestamp,Gender,Confidence` header and every
//! following row is one [`Observation`]. Rows are never rewritten: each
//! append opens the file, writes one line and closes it again.
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDateTime;

use crate::decision::LabelSet;

pub const HEADER: &str = "Timestamp,Gender,Confidence";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One logged classification.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub timestamp: NaiveDateTime,
    pub label: String,
    /// Percentage in [0, 100].
    pub confidence: f32,
}

impl Observation {
    pub fn new(timestamp: NaiveDateTime, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            timestamp,
            label: label.into(),
            confidence,
        }
    }

    /// Render as `2024-05-01 12:00:00.000000,Female,45.00%`.
    pub fn to_row(&self) -> String {
        format!(
            "{},{},{:.2}%",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.label,
            self.confidence
        )
    }

    pub fn parse_row(row: &str) -> Result<Self> {
        let mut fields = row.trim_end_matches(['\r', '\n']).split(',');
        let (timestamp, label, confidence) = match (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) {
            (Some(t), Some(l), Some(c), None) => (t, l, c),
            _ => bail!("expected 3 fields in row {row:?}"),
        };

        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_PARSE_FORMAT)
            .with_context(|| format!("invalid timestamp {timestamp:?}"))?;

        if LabelSet::parse(label).is_none() {
            bail!("unknown label {label:?}");
        }

        let confidence: f32 = confidence
            .strip_suffix('%')
            .ok_or_else(|| anyhow!("confidence {confidence:?} lacks a percent sign"))?
            .parse()
            .with_context(|| format!("invalid confidence {confidence:?}"))?;
        if !(0.0..=100.0).contains(&confidence) {
            bail!("confidence {confidence} out of range");
        }

        Ok(Self::new(timestamp, label, confidence))
    }
}

/// Handle to the CSV file on disk.
///
/// Appends from different streams are serialised through an internal lock,
/// the file itself is only held open for the duration of a single write.
pub struct GenderLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl GenderLog {
    /// Use the file at `path`, creating it with a header if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure_header(&path)?;
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, observation: &Observation) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("log lock poisoned"))?;

        // Recreate the header should the file have been removed meanwhile
        ensure_header(&self.path)?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{}", observation.to_row())?;

        log::debug!("Logged {}", observation.to_row());
        Ok(())
    }

    /// Parse every observation in the file.
    pub fn read_all(&self) -> Result<Vec<Observation>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut lines = reader.lines();

        let header = lines.next().transpose()?;
        if header.as_deref().map(str::trim_end) != Some(HEADER) {
            bail!("{} lacks the CSV header", self.path.display());
        }

        lines
            .filter(|line| !matches!(line, Ok(l) if l.trim().is_empty()))
            .map(|line| Observation::parse_row(&line?))
            .collect()
    }

    /// Raw file contents, as served for download.
    pub fn contents(&self) -> Result<Vec<u8>> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("log lock poisoned"))?;
        ensure_header(&self.path)?;
        Ok(std::fs::read(&self.path)?)
    }
}

/// Create the file with only the header line, leaving existing files alone.
fn ensure_header(path: &Path) -> Result<()> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            writeln!(file, "{HEADER}")?;
            log::info!("Created gender log {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to create {}", path.display())),
    }
}
