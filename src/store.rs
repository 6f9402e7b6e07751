//! Append-only name logs backing the checkpoint and error stores.
//!
//! Each log is a plain text file with one company name per line. Writes
//! during a run are single-line appends, synced before returning, so a
//! crash loses at most the call in flight. Because appends are not
//! transactional the file may hold duplicates; [`NameLog::load`] always
//! deduplicates (first occurrence wins) and [`NameLog::rewrite`] replaces
//! the whole file atomically through a temp file and a rename.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::types::normalize_name;
use crate::{CartographeError, Result};

/// Insertion-ordered set of company names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a name; returns false if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.seen.contains(&name) {
            return false;
        }
        self.seen.insert(name.clone());
        self.order.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Names in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for NameSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = NameSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

/// One name-per-line log file.
///
/// Appends are serialized through an internal lock so concurrent callers
/// never interleave partial lines.
#[derive(Debug)]
pub struct NameLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl NameLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the log, normalizing names, dropping blanks and duplicates.
    ///
    /// A missing file is an empty set.
    pub fn load(&self) -> Result<NameSet> {
        Ok(self.read_lines()?.into_iter().collect())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CartographeError::io(&self.path, e)),
        };
        Ok(content
            .lines()
            .map(normalize_name)
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Append one name and sync it to disk before returning.
    pub fn append(&self, name: &str) -> Result<()> {
        let line = normalize_name(name);
        if line.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_parent()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CartographeError::io(&self.path, e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| CartographeError::io(&self.path, e))
    }

    /// Replace the whole file with `names` (atomic write via tmp + rename).
    pub fn rewrite<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_parent()?;

        let tmp_path = tmp_path_for(&self.path);
        let file = File::create(&tmp_path).map_err(|e| CartographeError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0usize;
        for name in names {
            let line = normalize_name(name);
            if line.is_empty() {
                continue;
            }
            writeln!(writer, "{line}").map_err(|e| CartographeError::io(&tmp_path, e))?;
            written += 1;
        }
        let file = writer
            .into_inner()
            .map_err(|e| CartographeError::io(&tmp_path, e.into_error()))?;
        file.sync_all()
            .map_err(|e| CartographeError::io(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| CartographeError::io(&self.path, e))?;
        debug!(path = %self.path.display(), names = written, "rewrote name log");
        Ok(())
    }

    /// Rewrite the file without duplicates if it has any. Returns the set.
    pub fn compact(&self) -> Result<NameSet> {
        let lines = self.read_lines()?;
        let total = lines.len();
        let set: NameSet = lines.into_iter().collect();
        if set.len() < total {
            info!(
                path = %self.path.display(),
                duplicates = total - set.len(),
                "compacting name log"
            );
            self.rewrite(set.iter())?;
        }
        Ok(set)
    }

    fn ensure_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| CartographeError::io(parent, e))
            }
            _ => Ok(()),
        }
    }
}

pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "names".into());
    file_name.push(".tmp");
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_set_keeps_first_seen_order() {
        let set: NameSet = ["b", "a", "b", "c", "a"].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = NameLog::new(dir.path().join("absent.txt"));
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn load_trims_and_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, "Acme\n  Beta  \n\nAcme\r\nGamma\n").unwrap();

        let set = NameLog::new(&path).load().unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["Acme", "Beta", "Gamma"]);
    }

    #[test]
    fn append_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep").join("nested").join("log.txt");
        let log = NameLog::new(&path);

        log.append("Acme").unwrap();
        log.append("Beta").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Acme\nBeta\n");
    }

    #[test]
    fn append_flattens_line_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let log = NameLog::new(&path);

        log.append("Acme\nLabs").unwrap();
        log.append("   ").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Acme Labs\n");
    }

    #[test]
    fn rewrite_replaces_contents_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.txt");
        fs::write(&path, "a\nb\nc\n").unwrap();
        let log = NameLog::new(&path);

        log.rewrite(["c", "a"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "c\na\n");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn rewrite_with_nothing_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.txt");
        fs::write(&path, "a\n").unwrap();

        NameLog::new(&path).rewrite(std::iter::empty()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn compact_removes_duplicate_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.txt");
        fs::write(&path, "a\nb\na\nb\nc\n").unwrap();

        let set = NameLog::new(&path).compact().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path_for(Path::new("/x/errors.txt")),
            PathBuf::from("/x/errors.txt.tmp")
        );
    }
}
