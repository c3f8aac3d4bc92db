use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// subject id -> section ids, in the order they were added
pub type UserFavorites = IndexMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum FavoritesError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid favorites file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed,
    SubjectNotFound,
    SectionNotFound,
}

/// Per-user favorite sections, saved to a JSON file after every change
#[derive(Debug)]
pub struct Favorites {
    path: PathBuf,
    users: IndexMap<String, UserFavorites>,
}

impl Favorites {
    /// Load favorites from `path`; a missing file means no favorites yet
    pub fn load(path: &Path) -> Result<Self, FavoritesError> {
        let users = match fs::read_to_string(path) {
            Ok(contents) if contents.trim().is_empty() => IndexMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => IndexMap::new(),
            Err(e) => {
                return Err(FavoritesError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        info!(
            path = %path.display(),
            users = users.len(),
            "Favorites loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            users,
        })
    }

    pub fn list(&self, user_id: &str) -> Vec<(String, String)> {
        self.users
            .get(user_id)
            .map(|subjects| {
                subjects
                    .iter()
                    .flat_map(|(subject, sections)| {
                        sections.iter().map(move |s| (subject.clone(), s.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns false if the section was already a favorite
    pub fn add(&mut self, user_id: &str, subject_id: &str, section: &str) -> Result<bool, FavoritesError> {
        let before = self.users.clone();
        let sections = self
            .users
            .entry(user_id.to_string())
            .or_default()
            .entry(subject_id.to_string())
            .or_default();

        if sections.iter().any(|s| s == section) {
            return Ok(false);
        }
        sections.push(section.to_string());
        self.save_or_restore(before)?;
        Ok(true)
    }

    pub fn remove(&mut self, user_id: &str, subject_id: &str, section: &str) -> Result<Removal, FavoritesError> {
        let before = self.users.clone();
        let Some(subjects) = self.users.get_mut(user_id) else {
            return Ok(Removal::SubjectNotFound);
        };
        let Some(sections) = subjects.get_mut(subject_id) else {
            return Ok(Removal::SubjectNotFound);
        };
        let Some(pos) = sections.iter().position(|s| s == section) else {
            return Ok(Removal::SectionNotFound);
        };

        sections.remove(pos);
        if sections.is_empty() {
            subjects.shift_remove(subject_id);
        }
        self.save_or_restore(before)?;
        Ok(Removal::Removed)
    }

    /// Returns whether the user had any favorites
    pub fn clear(&mut self, user_id: &str) -> Result<bool, FavoritesError> {
        let before = self.users.clone();
        let had_any = self
            .users
            .shift_remove(user_id)
            .is_some_and(|subjects| !subjects.is_empty());
        self.save_or_restore(before)?;
        Ok(had_any)
    }

    /// Persist the current state; on failure put `before` back so memory
    /// matches what is on disk
    fn save_or_restore(
        &mut self,
        before: IndexMap<String, UserFavorites>,
    ) -> Result<(), FavoritesError> {
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "Favorites not saved, change undone");
            self.users = before;
            return Err(e);
        }
        Ok(())
    }

    fn save(&self) -> Result<(), FavoritesError> {
        let io_err = |source| FavoritesError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(&self.users)?;
        fs::write(&self.path, json).map_err(io_err)?;

        debug!(path = %self.path.display(), "Favorites saved");
        Ok(())
    }
}
