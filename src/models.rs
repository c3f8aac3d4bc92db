use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// One section of a subject as published in the timetable.
///
/// Every field is kept verbatim; the portal's values are opaque strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub time: String,
    #[serde(default, rename = "class")]
    pub room: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub teacher: String,
}

#[cfg(test)]
impl SectionRecord {
    pub fn new(name: &str, time: &str, room: &str, status: &str, teacher: &str) -> Self {
        Self {
            name: name.to_string(),
            time: time.to_string(),
            room: room.to_string(),
            status: status.to_string(),
            teacher: teacher.to_string(),
        }
    }
}

/// Sections of one subject, in the order they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectRecord {
    pub sections: IndexMap<String, SectionRecord>,
}

impl SubjectRecord {
    /// Display name, taken from the first section
    pub fn name(&self) -> Option<&str> {
        self.sections.values().next().map(|s| s.name.as_str())
    }

    pub fn section(&self, section_id: &str) -> Option<&SectionRecord> {
        self.sections.get(section_id)
    }
}

pub type SubjectMap = IndexMap<String, SubjectRecord>;

/// Complete timetable produced by one successful fetch.
///
/// A snapshot is never mutated after it is published; a refresh builds a
/// new one and swaps it in.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub subjects: SubjectMap,
    pub produced_at: DateTime<Utc>,
    created: Instant,
}

impl Snapshot {
    pub fn new(subjects: SubjectMap) -> Self {
        Self {
            subjects,
            produced_at: Utc::now(),
            created: Instant::now(),
        }
    }

    /// Time since this snapshot was produced
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn subject(&self, subject_id: &str) -> Option<&SubjectRecord> {
        self.subjects.get(subject_id)
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn section_count(&self) -> usize {
        self.subjects.values().map(|s| s.sections.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}
