//! Subject line normalization.

use regex::Regex;

/// Remove every match of each filter, in order, trimming after each pass.
///
/// `"[Ext-List] Queue1"` with filter `\[.*\]` → `"Queue1"`.
pub fn filter_subject(subject: &str, filters: &[Regex]) -> String {
    filters.iter().fold(subject.trim().to_string(), |subj, re| {
        re.replace_all(&subj, "").trim().to_string()
    })
}

/// Turn a subject into a queue-style name.
///
/// The text is split on every character that is not an ASCII letter or
/// digit. Each word is capitalized and the words are joined:
/// `"package admin"` → `"PackageAdmin"`, `"h@s special chars'"` → `"HSSpecialChars"`.
pub fn canonicalize(subject: &str) -> String {
    subject
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(word.len());
            out.push(first.to_ascii_uppercase());
            out.push_str(&chars.as_str().to_ascii_lowercase());
            out
        }
        None => String::new(),
    }
}

/// Filter, then canonicalize.
pub fn normalize_subject(subject: &str, filters: &[Regex]) -> String {
    canonicalize(&filter_subject(subject, filters))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bracket_filter() -> Vec<Regex> {
        vec![Regex::new(r"\[.*\]").unwrap()]
    }

    #[test]
    fn test_filter_removes_list_tag() {
        assert_eq!(filter_subject("[Ext-List] Queue1", &bracket_filter()), "Queue1");
    }

    #[test]
    fn test_filter_no_match_keeps_subject() {
        assert_eq!(filter_subject("  Queue1 ", &bracket_filter()), "Queue1");
    }

    #[test]
    fn test_filters_apply_in_order() {
        let filters = vec![
            Regex::new(r"\[.*\]").unwrap(),
            Regex::new(r"(?i)^(re|fwd?):").unwrap(),
        ];
        assert_eq!(filter_subject("[List] RE: Queue2", &filters), "Queue2");
    }

    #[test]
    fn test_no_filters() {
        assert_eq!(filter_subject("[List] Queue1", &[]), "[List] Queue1");
    }

    #[test]
    fn test_canonicalize_words() {
        assert_eq!(canonicalize("This is a test of camel case"), "ThisIsATestOfCamelCase");
        assert_eq!(canonicalize("package admin"), "PackageAdmin");
    }

    #[test]
    fn test_canonicalize_special_chars() {
        assert_eq!(canonicalize("h@s special chars'"), "HSSpecialChars");
    }

    #[test]
    fn test_canonicalize_lowercases_rest() {
        assert_eq!(canonicalize("QUEUE1"), "Queue1");
        assert_eq!(canonicalize("Queue1"), "Queue1");
    }

    #[test]
    fn test_canonicalize_empty() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("!!!"), "");
    }

    #[test]
    fn test_canonicalize_drops_non_ascii() {
        assert_eq!(canonicalize("café menu"), "CafMenu");
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("[Ext-List] queue1", &bracket_filter()), "Queue1");
    }
}
