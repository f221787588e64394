//! Input file reading
//!
//! Each line is `URL[,source]`. Lines that do not parse into a URL with a
//! host are skipped with a warning.

use crate::ScanError;
use std::path::Path;
use url::Url;

/// One task from the input file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    /// URL exactly as written in the input
    pub raw_url: String,
    pub url: Url,
    /// Free-form tag carried into the result document; may be empty
    pub source: String,
    pub hostname: String,
}

impl TaskLine {
    /// Parses one `URL[,source]` record
    ///
    /// Returns `None` for blank lines, unparsable URLs and URLs without a host.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (raw_url, source) = match line.split_once(',') {
            Some((url, source)) => (url.trim(), source.trim()),
            None => (line, ""),
        };

        let url = Url::parse(raw_url).ok()?;
        let hostname = url.host_str()?.to_string();

        Some(Self {
            raw_url: raw_url.to_string(),
            url,
            source: source.to_string(),
            hostname,
        })
    }
}

/// Reads every task from the input file
///
/// # Returns
///
/// * `Ok(Vec<TaskLine>)` - Parsed tasks in file order
/// * `Err(ScanError::MissingFile)` - The input file could not be read
pub fn read_task_lines(path: &Path) -> Result<Vec<TaskLine>, ScanError> {
    let content = std::fs::read_to_string(path).map_err(|source| ScanError::MissingFile {
        path: path.display().to_string(),
        source,
    })?;

    let mut tasks = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match TaskLine::parse(line) {
            Some(task) => tasks.push(task),
            None => tracing::warn!("Skipping malformed input line {}: {:?}", index + 1, line),
        }
    }

    tracing::info!("Read {} tasks from {}", tasks.len(), path.display());
    Ok(tasks)
}
