use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Snapshot, SubjectMap};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no subjects to save")]
    Empty,

    #[error("permission denied writing {0}")]
    PermissionDenied(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not encode timetable: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ExportError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            ExportError::PermissionDenied(path.to_path_buf())
        } else {
            ExportError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

impl Snapshot {
    /// Subject name followed by every section's details.
    ///
    /// ```text
    /// NAME
    ///
    ///  1, Open  , ROOM
    /// TIME, TEACHER
    ///
    /// ```
    pub fn all_sections_of(&self, subject_id: &str) -> Option<String> {
        let subject = self.subject(subject_id)?;
        let mut info = String::new();

        if let Some(name) = subject.name() {
            info.push_str(&format!("{}\n\n", name));
        }
        for (section_id, data) in &subject.sections {
            info.push_str(&format!(
                "{:>2}, {:<6}, {}\n{}, {}\n\n",
                section_id, data.status, data.room, data.time, data.teacher
            ));
        }
        Some(info)
    }

    /// Subject name and a single details line for one section
    pub fn one_section(&self, subject_id: &str, section_id: &str) -> Option<String> {
        let data = self.subject(subject_id)?.section(section_id)?;
        Some(format!(
            "{}\n{:<6}, {}, {}, {}\n",
            data.name, data.status, data.room, data.time, data.teacher
        ))
    }

    /// Subjects whose name contains `needle` (case-sensitive), as id -> name.
    /// An empty needle returns every subject.
    pub fn search_by_name(&self, needle: &str) -> IndexMap<String, String> {
        self.subjects
            .iter()
            .filter_map(|(id, subject)| {
                let name = subject.name().unwrap_or("");
                name.contains(needle)
                    .then(|| (id.clone(), name.to_string()))
            })
            .collect()
    }

    /// Write the subject -> section -> fields structure as JSON.
    ///
    /// The JSON goes to a sibling `.tmp` file that is renamed over `path`
    /// once complete, so a failed export leaves any previous file untouched.
    pub fn export(&self, path: &Path) -> Result<(), ExportError> {
        if self.is_empty() {
            warn!(path = %path.display(), "No subjects to save");
            return Err(ExportError::Empty);
        }

        let json = serde_json::to_string_pretty(&self.subjects)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ExportError::from_io(parent, e))?;
            }
        }

        let staging = staging_path(path);
        let mut file = File::create(&staging).map_err(|e| ExportError::from_io(&staging, e))?;
        if let Err(e) = file.write_all(json.as_bytes()).and_then(|_| file.sync_all()) {
            drop(file);
            discard(&staging);
            return Err(ExportError::from_io(&staging, e));
        }
        drop(file);

        if let Err(e) = fs::rename(&staging, path) {
            discard(&staging);
            return Err(ExportError::from_io(path, e));
        }

        info!(
            path = %path.display(),
            subjects = self.subject_count(),
            bytes = json.len(),
            "Timetable exported"
        );
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "export".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn discard(staging: &Path) {
    if let Err(e) = fs::remove_file(staging) {
        warn!(path = %staging.display(), error = %e, "Could not remove partial export");
    }
}

/// Read a file written by [`Snapshot::export`] back into a snapshot
pub fn import_snapshot(path: &Path) -> Result<Snapshot, ExportError> {
    let contents = fs::read_to_string(path).map_err(|e| ExportError::from_io(path, e))?;
    let subjects: SubjectMap = serde_json::from_str(&contents)?;
    debug!(path = %path.display(), subjects = subjects.len(), "Timetable imported");
    Ok(Snapshot::new(subjects))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{SectionRecord, SubjectRecord};

    pub(crate) fn sample_snapshot() -> Snapshot {
        let mut subjects = SubjectMap::new();

        let mut programming = SubjectRecord::default();
        programming.sections.insert(
            "1".to_string(),
            SectionRecord::new("برمجة 1", "Sun 08:00-09:30", "IT-101", "Open", "Dr. Sami"),
        );
        programming.sections.insert(
            "12".to_string(),
            SectionRecord::new("برمجة 1", "Mon 10:00-11:30", "IT-204", "Closed", "Dr. Lina"),
        );
        subjects.insert("508365".to_string(), programming);

        let mut calculus = SubjectRecord::default();
        calculus.sections.insert(
            "3".to_string(),
            SectionRecord::new("Calculus 1", "Tue 12:00", "S-1", "Open", "Dr. Omar"),
        );
        subjects.insert("185103".to_string(), calculus);

        let mut calculus_lab = SubjectRecord::default();
        calculus_lab.sections.insert(
            "1".to_string(),
            SectionRecord::new("Calculus 1", "Wed 14:00", "Lab-2", "Open", "Dr. Omar"),
        );
        subjects.insert("185104".to_string(), calculus_lab);

        subjects.insert("999999".to_string(), SubjectRecord::default());

        Snapshot::new(subjects)
    }

    #[test]
    fn test_all_sections_of() {
        let snapshot = sample_snapshot();
        let info = snapshot.all_sections_of("508365").unwrap();

        assert_eq!(
            info,
            "برمجة 1\n\n \
             1, Open  , IT-101\nSun 08:00-09:30, Dr. Sami\n\n\
             12, Closed, IT-204\nMon 10:00-11:30, Dr. Lina\n\n"
        );
        let lines: Vec<&str> = info.lines().collect();
        assert_eq!(lines[0], "برمجة 1");
    }

    #[test]
    fn test_all_sections_of_missing_subject() {
        let snapshot = sample_snapshot();
        assert_eq!(snapshot.all_sections_of("000000"), None);
        assert_eq!(snapshot.all_sections_of("999999"), Some(String::new()));
    }

    #[test]
    fn test_one_section() {
        let snapshot = sample_snapshot();
        assert_eq!(
            snapshot.one_section("185103", "3").unwrap(),
            "Calculus 1\nOpen  , S-1, Tue 12:00, Dr. Omar\n"
        );
        assert_eq!(snapshot.one_section("185103", "4"), None);
        assert_eq!(snapshot.one_section("000000", "3"), None);
    }

    #[test]
    fn test_search_by_name() {
        let snapshot = sample_snapshot();

        let found = snapshot.search_by_name("Calculus");
        assert_eq!(found.len(), 2);
        assert_eq!(found["185103"], "Calculus 1");
        assert_eq!(found["185104"], "Calculus 1");

        assert!(snapshot.search_by_name("calculus").is_empty());
        assert_eq!(snapshot.search_by_name("برمجة").len(), 1);
    }

    #[test]
    fn test_search_empty_returns_everything() {
        let snapshot = sample_snapshot();
        let found = snapshot.search_by_name("");
        assert_eq!(
            found.keys().collect::<Vec<_>>(),
            vec!["508365", "185103", "185104", "999999"]
        );
        assert_eq!(found["999999"], "");
    }

    #[test]
    fn test_export_then_import_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("subjects_list.json");
        let snapshot = sample_snapshot();

        snapshot.export(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("برمجة 1"));
        assert!(contents.contains("\"class\": \"IT-101\""));

        let restored = import_snapshot(&path).unwrap();
        assert_eq!(restored.subjects, snapshot.subjects);
        assert_eq!(
            restored.subjects.keys().collect::<Vec<_>>(),
            snapshot.subjects.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_export_empty_snapshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");

        let err = Snapshot::new(SubjectMap::new()).export(&path).unwrap_err();
        assert!(matches!(err, ExportError::Empty));
        assert!(!path.exists());
    }

    #[test]
    fn test_export_to_directory_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = sample_snapshot().export(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Io { .. } | ExportError::PermissionDenied(_)
        ));
    }

    #[test]
    fn test_failed_export_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects_list.json");
        sample_snapshot().export(&path).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // A directory where the staging file should go makes the write fail
        fs::create_dir(dir.path().join("subjects_list.json.tmp")).unwrap();
        let err = sample_snapshot().export(&path).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Io { .. } | ExportError::PermissionDenied(_)
        ));

        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(dir.path().join("subjects_list.json.tmp").is_dir());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_removes_only_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects_list.json");
        fs::write(&path, "previous export").unwrap();

        // Opens fine, then every write fails with ENOSPC
        let staging = dir.path().join("subjects_list.json.tmp");
        std::os::unix::fs::symlink("/dev/full", &staging).unwrap();

        let err = sample_snapshot().export(&path).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "previous export");
        assert!(fs::symlink_metadata(&staging).is_err());
    }

    #[test]
    fn test_export_replaces_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects_list.json");
        fs::write(&path, "stale").unwrap();

        sample_snapshot().export(&path).unwrap();
        assert_eq!(import_snapshot(&path).unwrap().subject_count(), 4);
        assert!(!dir.path().join("subjects_list.json.tmp").exists());
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = import_snapshot(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
    }
}
