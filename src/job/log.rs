use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StartupError;
use crate::job::run::JobSummary;

pub const JOB_LOG_FILE: &str = "jobs.jsonl";

#[derive(Serialize)]
struct JobLogRecord<'a> {
    logged_at: DateTime<Utc>,
    #[serde(flatten)]
    job: &'a JobSummary,
}

/// Append-only record of terminated jobs, one JSON object per line.
#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JobLog {
    /// Open (or create) the log inside `dir`, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self, StartupError> {
        let path = dir.join(JOB_LOG_FILE);
        let to_err = |source| StartupError::JobLog {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(to_err)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(to_err)?;

        tracing::info!(path = %path.display(), "Job log opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, job: &JobSummary) -> io::Result<()> {
        let record = JobLogRecord {
            logged_at: Utc::now(),
            job,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    pub fn close(mut self) -> io::Result<()> {
        self.writer.flush()?;
        tracing::info!(path = %self.path.display(), "Job log closed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
