use std::fmt;

/// A label as produced by a classifier or stored in a test set.
#[derive(Debug, Clone, PartialEq)]
pub enum RawLabel {
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    Float(f64),
}

/// Generic string form. Bytes render as an escaped `b"..."` literal.
impl fmt::Display for RawLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawLabel::Bytes(bytes) => write!(f, "b\"{}\"", bytes.escape_ascii()),
            RawLabel::Text(text) => f.write_str(text),
            RawLabel::Int(value) => write!(f, "{}", value),
            RawLabel::Float(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for RawLabel {
    fn from(value: &str) -> Self {
        RawLabel::Text(value.to_string())
    }
}

impl From<&[u8]> for RawLabel {
    fn from(value: &[u8]) -> Self {
        RawLabel::Bytes(value.to_vec())
    }
}

impl From<i64> for RawLabel {
    fn from(value: i64) -> Self {
        RawLabel::Int(value)
    }
}

/// Decode a label for display. Never fails: bytes that are not valid UTF-8
/// fall back to the generic string form.
pub fn decode_label(label: &RawLabel) -> String {
    match label {
        RawLabel::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => label.to_string(),
        },
        other => other.to_string(),
    }
}

/// Map an integral class index to its configured name. Labels that are not
/// indices, or fall outside `class_labels`, are returned unchanged.
pub fn resolve_class(label: RawLabel, class_labels: &[String]) -> RawLabel {
    let index = match &label {
        RawLabel::Int(id) => usize::try_from(*id).ok(),
        RawLabel::Float(value) if value.fract() == 0.0 && *value >= 0.0 => Some(*value as usize),
        _ => None,
    };
    match index.and_then(|idx| class_labels.get(idx)) {
        Some(name) => RawLabel::Text(name.clone()),
        None => label,
    }
}

pub fn labels_match(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bytes() {
        assert_eq!(decode_label(&RawLabel::from(&b"cat"[..])), "cat");
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_label(&RawLabel::from("dog")), "dog");
    }

    #[test]
    fn test_decode_scalars_use_generic_form() {
        assert_eq!(decode_label(&RawLabel::Int(1)), "1");
        assert_eq!(decode_label(&RawLabel::Float(0.5)), "0.5");
    }

    #[test]
    fn test_invalid_utf8_falls_back() {
        let label = RawLabel::Bytes(vec![0x63, 0xff]);
        assert_eq!(decode_label(&label), "b\"c\\xff\"");
    }

    #[test]
    fn test_resolve_class() {
        let classes = vec!["cat".to_string(), "dog".to_string()];
        assert_eq!(resolve_class(RawLabel::Int(1), &classes), RawLabel::from("dog"));
        assert_eq!(resolve_class(RawLabel::Float(0.0), &classes), RawLabel::from("cat"));
        assert_eq!(resolve_class(RawLabel::Int(7), &classes), RawLabel::Int(7));
        assert_eq!(resolve_class(RawLabel::Float(0.5), &classes), RawLabel::Float(0.5));
        assert_eq!(resolve_class(RawLabel::from("bird"), &classes), RawLabel::from("bird"));
    }

    #[test]
    fn test_labels_match_ignores_case() {
        assert!(labels_match("Cat", "cAT"));
        assert!(!labels_match("cat", "dog"));
    }
}
