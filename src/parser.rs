use scraper::{Html, Selector};
use tracing::{debug, info, trace};

use crate::field::FieldKind;
use crate::models::{SectionRecord, Snapshot, SubjectMap};
use crate::session::RawPayload;

/// One `<label>` from the schedule table: its id and trimmed text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: String,
    pub text: String,
}

impl Fragment {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn kind(&self) -> FieldKind {
        FieldKind::from_label_id(&self.id)
    }
}

/// Build a snapshot from a successful data POST
pub fn parse(payload: &RawPayload) -> Snapshot {
    let fragments = extract_fragments(payload.as_str());
    debug!(fragments = fragments.len(), "Extracted label fragments");

    let subjects = build_subjects(fragments);
    let snapshot = Snapshot::new(subjects);

    info!(
        subjects = snapshot.subject_count(),
        sections = snapshot.section_count(),
        "Parsed timetable"
    );
    snapshot
}

/// All labelled fragments in document order.
///
/// The portal wraps the table in a JSF partial response whose markup sits in
/// CDATA blocks; those markers are dropped so the HTML parser sees the table.
pub fn extract_fragments(markup: &str) -> Vec<Fragment> {
    let markup = markup.replace("<![CDATA[", "").replace("]]>", "");
    let document = Html::parse_document(&markup);
    let label_selector = Selector::parse("label[id]").expect("Invalid label selector");

    document
        .select(&label_selector)
        .filter_map(|label| {
            let id = label.value().attr("id")?;
            let text = label.text().collect::<String>();
            Some(Fragment::new(id, text.trim()))
        })
        .collect()
}

/// Rebuild subject -> section -> fields from the flat fragment stream.
///
/// An IDENTIFIER opens a subject, a SECTION registers a section under it, and
/// the remaining fields accumulate in a buffer that is written to the open
/// section at the next section or subject boundary (or at the end).
pub fn build_subjects<I>(fragments: I) -> SubjectMap
where
    I: IntoIterator<Item = Fragment>,
{
    let mut subjects = SubjectMap::new();
    let mut current_subject: Option<String> = None;
    let mut pending_section: Option<String> = None;
    let mut buffer = SectionRecord::default();

    for fragment in fragments {
        let kind = fragment.kind();
        let text = fragment.text;

        match kind {
            FieldKind::Identifier => {
                if let (Some(subject), Some(section)) =
                    (current_subject.as_deref(), pending_section.take())
                {
                    commit(&mut subjects, subject, section, std::mem::take(&mut buffer));
                }
                buffer = SectionRecord::default();
                subjects.entry(text.clone()).or_default();
                current_subject = Some(text);
            }
            FieldKind::Section => match current_subject.as_deref() {
                Some(subject) => {
                    if let Some(previous) = pending_section.take() {
                        commit(&mut subjects, subject, previous, buffer.clone());
                    }
                    if let Some(record) = subjects.get_mut(subject) {
                        record.sections.entry(text.clone()).or_default();
                    }
                    pending_section = Some(text);
                }
                None => {
                    debug!(section = %text, "Dropping section with no subject");
                }
            },
            FieldKind::Name => buffer.name = text,
            FieldKind::Time => buffer.time = text,
            FieldKind::Room => buffer.room = text,
            FieldKind::Status => buffer.status = text,
            FieldKind::Teacher => buffer.teacher = text,
            FieldKind::Unknown => {
                trace!(id = %fragment.id, "Ignoring unrecognised label");
            }
        }
    }

    if let (Some(subject), Some(section)) = (current_subject.as_deref(), pending_section) {
        commit(&mut subjects, subject, section, buffer);
    }

    subjects
}

fn commit(subjects: &mut SubjectMap, subject: &str, section: String, record: SectionRecord) {
    if let Some(entry) = subjects.get_mut(subject) {
        entry.sections.insert(section, record);
    }
}
