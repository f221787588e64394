//! Excluded-hostname list
//!
//! Loaded once at startup (a missing file is fatal) and re-read on a fixed
//! interval for the rest of the scan.

use crate::ScanError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Hostnames that must never be fetched
#[derive(Debug)]
pub struct ExcludedHosts {
    path: PathBuf,
    hosts: RwLock<HashSet<String>>,
}

impl ExcludedHosts {
    /// Loads the list from `path`
    ///
    /// # Returns
    ///
    /// * `Ok(ExcludedHosts)` - List loaded
    /// * `Err(ScanError::MissingFile)` - The file could not be read
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let hosts = read_hosts(path)?;
        tracing::info!("Loaded {} excluded hostnames", hosts.len());
        Ok(Self {
            path: path.to_path_buf(),
            hosts: RwLock::new(hosts),
        })
    }

    /// Builds a list that is never reloaded from disk
    pub fn from_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: PathBuf::new(),
            hosts: RwLock::new(hosts.into_iter().map(Into::into).collect()),
        }
    }

    pub fn contains(&self, hostname: &str) -> bool {
        match self.hosts.read() {
            Ok(hosts) => hosts.contains(hostname),
            Err(poisoned) => poisoned.into_inner().contains(hostname),
        }
    }

    pub fn len(&self) -> usize {
        match self.hosts.read() {
            Ok(hosts) => hosts.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-reads the file, keeping the previous list if that fails
    pub fn reload(&self) -> Result<usize, ScanError> {
        let fresh = read_hosts(&self.path)?;
        let count = fresh.len();
        match self.hosts.write() {
            Ok(mut hosts) => *hosts = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(count)
    }

    /// Spawns the periodic reload loop
    pub fn spawn_reload_loop(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately; the list was just loaded
            interval.tick().await;
            loop {
                interval.tick().await;
                match self.reload() {
                    Ok(count) => tracing::debug!("Reloaded {} excluded hostnames", count),
                    Err(e) => tracing::warn!("Keeping previous excluded hostnames: {}", e),
                }
            }
        })
    }
}

fn read_hosts(path: &Path) -> Result<HashSet<String>, ScanError> {
    let content = std::fs::read_to_string(path).map_err(|source| ScanError::MissingFile {
        path: path.display().to_string(),
        source,
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_and_contains() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "blocked.example.com").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "  spaced.example.com  ").unwrap();
        file.flush().unwrap();

        let excluded = ExcludedHosts::load(file.path()).unwrap();
        assert_eq!(excluded.len(), 2);
        assert!(excluded.contains("blocked.example.com"));
        assert!(excluded.contains("spaced.example.com"));
        assert!(!excluded.contains("example.com"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ExcludedHosts::load(Path::new("/nonexistent/excluded.txt"));
        assert!(matches!(result, Err(ScanError::MissingFile { .. })));
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a.example.com").unwrap();
        file.flush().unwrap();

        let excluded = ExcludedHosts::load(file.path()).unwrap();
        assert!(!excluded.contains("b.example.com"));

        writeln!(file, "b.example.com").unwrap();
        file.flush().unwrap();

        assert_eq!(excluded.reload().unwrap(), 2);
        assert!(excluded.contains("b.example.com"));
    }
}
