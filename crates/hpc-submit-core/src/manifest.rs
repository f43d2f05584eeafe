//! Array manifests.
//!
//! A manifest is a plain-text file with one work unit per line. Fields are
//! tab-separated and every record of a persisted manifest has the full
//! arity of its module's input shape, with absent optional files left as
//! empty fields. Line `i` (1-based) belongs to array task `i`.
//!
//! A persisted manifest is never rewritten with different records: queued
//! tasks of an earlier array still read it by line number. `persist`
//! refuses to replace one whose contents differ.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{SubmitError, SubmitResult};
use crate::job::{InputShape, JobInputs, JobSet};

/// Separator between the fields of one record.
pub const FIELD_DELIMITER: char = '\t';

/// A non-blank, non-comment manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// 1-based line number in the file.
    pub line: usize,
    pub fields: Vec<String>,
}

impl ManifestRecord {
    /// Error pointing at this record.
    pub fn error(&self, path: &Path, message: impl Into<String>) -> SubmitError {
        SubmitError::ManifestRecord {
            path: path.to_path_buf(),
            line: self.line,
            message: message.into(),
        }
    }
}

/// Read the records of a user-supplied or persisted manifest.
///
/// Blank lines and lines starting with `#` are skipped. Fields are trimmed
/// but empty fields are kept.
pub fn read_records(path: &Path) -> SubmitResult<Vec<ManifestRecord>> {
    if !path.is_file() {
        return Err(SubmitError::InputNotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|e| SubmitError::io(path, e))?;

    let records = text
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .map(|(index, line)| ManifestRecord {
            line: index + 1,
            fields: line
                .split(FIELD_DELIMITER)
                .map(|field| field.trim().to_string())
                .collect(),
        })
        .collect();

    Ok(records)
}

/// Path of the manifest persisted for `job_name` in `dir`.
pub fn manifest_path(dir: &Path, job_name: &str) -> PathBuf {
    dir.join(format!(".{job_name}.manifest"))
}

/// Write the job set as a manifest next to the submission.
///
/// Paths are absolute so the file resolves from any working directory.
/// An existing manifest with identical records is reused; one with other
/// records is a usage error.
pub fn persist(jobs: &JobSet, dir: &Path, job_name: &str) -> SubmitResult<PathBuf> {
    let mut text = String::new();
    for job in jobs.jobs() {
        let fields = job.inputs.fields();
        if let Some(bad) = fields
            .iter()
            .find(|f| f.contains(FIELD_DELIMITER) || f.contains('\n'))
        {
            return Err(SubmitError::usage(format!(
                "Input path contains a tab or newline: {bad:?}"
            )));
        }
        text.push_str(&fields.join("\t"));
        text.push('\n');
    }

    let path = manifest_path(dir, job_name);
    match fs::read_to_string(&path) {
        Ok(existing) if existing == text => {
            debug!("Reusing manifest {}", path.display());
            return Ok(path);
        }
        Ok(_) => {
            return Err(SubmitError::usage(format!(
                "Manifest {} already exists with other inputs and may belong to a queued array; \
                 choose another job name with -j or remove it",
                path.display()
            )));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(SubmitError::io(&path, e)),
    }
    fs::write(&path, text).map_err(|e| SubmitError::io(&path, e))?;
    debug!("Wrote manifest {} ({} records)", path.display(), jobs.len());
    Ok(path)
}

/// Inputs of array task `index` (1-based), as a worker would see them.
pub fn resolve(path: &Path, index: usize, shape: InputShape) -> SubmitResult<JobInputs> {
    let records = read_records(path)?;
    let record = index
        .checked_sub(1)
        .and_then(|i| records.get(i))
        .ok_or_else(|| SubmitError::ManifestRecord {
            path: path.to_path_buf(),
            line: index,
            message: format!("no record for task {index} ({} records)", records.len()),
        })?;

    let fields: Vec<&str> = record.fields.iter().map(String::as_str).collect();
    JobInputs::from_fields(shape, &fields).ok_or_else(|| {
        record.error(
            path,
            format!(
                "expected {} fields, found {}",
                shape.field_count(),
                fields.len()
            ),
        )
    })
}
