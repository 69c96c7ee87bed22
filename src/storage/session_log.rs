//! Append-only session log
//!
//! One JSON object per line, one line per settled record. The file is
//! replaced when a new session starts and removed when the store is cleared.
//! Callers serialize access; the store keeps the log behind a mutex.

use crate::error::InspectorError;
use crate::models::TrafficRecord;
use anyhow::Context;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    file: Option<File>,
}

impl SessionLog {
    /// Start a fresh log at `path`, replacing any file already there
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        remove_if_exists(&path)?;
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &TrafficRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(record).context("serializing record")?;
        line.push(b'\n');

        if self.file.is_none() {
            self.file = Some(
                open_append(&self.path)
                    .with_context(|| format!("reopening session log {:?}", self.path))?,
            );
        }
        if let Some(file) = self.file.as_mut() {
            // A single write per line keeps lines whole.
            file.write_all(&line)
                .with_context(|| format!("writing session log {:?}", self.path))?;
            file.flush()?;
        }
        Ok(())
    }

    /// Delete the file. The next append starts a new one at the same path.
    pub fn remove(&mut self) -> io::Result<()> {
        self.file = None;
        remove_if_exists(&self.path)
    }

    /// Parse a log written by [`SessionLog::append`]
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<TrafficRecord>, InspectorError> {
        let contents = fs::read_to_string(path)?;
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| InspectorError::MalformedLog {
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
