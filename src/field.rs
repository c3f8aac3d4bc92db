/// Field carried by a `<label>` fragment in the timetable markup.
///
/// The portal encodes the field as the last two characters of the label id
/// (e.g. `serviceContents:scheduleDtl:12:j_idt86` is a section number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Identifier,
    Name,
    Time,
    Room,
    Section,
    Status,
    Teacher,
    /// Decorative or otherwise unrecognised label
    Unknown,
}

impl FieldKind {
    /// Map a two-character positional code to its field
    pub fn classify(code: &str) -> Self {
        match code {
            "76" => FieldKind::Identifier,
            "78" => FieldKind::Name,
            "82" => FieldKind::Time,
            "84" => FieldKind::Room,
            "86" => FieldKind::Section,
            "88" => FieldKind::Status,
            "90" => FieldKind::Teacher,
            _ => FieldKind::Unknown,
        }
    }

    /// Classify a full label id by its trailing code
    pub fn from_label_id(id: &str) -> Self {
        Self::classify(code_of(id))
    }
}

/// Last two characters of a label id, or the whole id if it is shorter.
pub fn code_of(id: &str) -> &str {
    let id = id.trim_end();
    match id.char_indices().rev().nth(1) {
        Some((pos, _)) => &id[pos..],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_codes() {
        assert_eq!(FieldKind::classify("76"), FieldKind::Identifier);
        assert_eq!(FieldKind::classify("78"), FieldKind::Name);
        assert_eq!(FieldKind::classify("82"), FieldKind::Time);
        assert_eq!(FieldKind::classify("84"), FieldKind::Room);
        assert_eq!(FieldKind::classify("86"), FieldKind::Section);
        assert_eq!(FieldKind::classify("88"), FieldKind::Status);
        assert_eq!(FieldKind::classify("90"), FieldKind::Teacher);
    }

    #[test]
    fn test_classify_unknown_codes() {
        assert_eq!(FieldKind::classify("80"), FieldKind::Unknown);
        assert_eq!(FieldKind::classify(""), FieldKind::Unknown);
        assert_eq!(FieldKind::classify("7"), FieldKind::Unknown);
        assert_eq!(FieldKind::classify("760"), FieldKind::Unknown);
    }

    #[test]
    fn test_code_of_label_id() {
        assert_eq!(code_of("serviceContents:scheduleDtl:0:j_idt76"), "76");
        assert_eq!(code_of("serviceContents:scheduleDtl:1203:j_idt90"), "90");
        assert_eq!(code_of("9"), "9");
        assert_eq!(code_of(""), "");
        assert_eq!(
            FieldKind::from_label_id("serviceContents:scheduleDtl:5:j_idt86"),
            FieldKind::Section
        );
        assert_eq!(
            FieldKind::from_label_id("serviceContents:header"),
            FieldKind::Unknown
        );
    }
}
