//! The `@@@langfuseMedia:...@@@` reference grammar embedded in event bodies
//! in place of raw media bytes.

use std::fmt;

const PREFIX: &str = "@@@langfuseMedia:";
const SUFFIX: &str = "@@@";

/// A parsed media reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub content_type: String,
    pub media_id: String,
    pub source: String,
}

impl MediaReference {
    pub fn new(
        content_type: impl Into<String>,
        media_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            media_id: media_id.into(),
            source: source.into(),
        }
    }

    /// Parse a reference out of a string that is expected to contain exactly
    /// one, with no surrounding content. Splits on `|` then on `=`; keys may
    /// appear in any order but all three (`type`, `id`, `source`) are
    /// required. Returns `None` for anything that doesn't match the grammar,
    /// including a structurally-valid reference missing one of the fields.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.strip_prefix(PREFIX)?;
        let s = s.strip_suffix(SUFFIX)?;
        let mut content_type = None;
        let mut media_id = None;
        let mut source = None;
        for part in s.split('|') {
            let (key, value) = part.split_once('=')?;
            match key {
                "type" => content_type = Some(value.to_string()),
                "id" => media_id = Some(value.to_string()),
                "source" => source = Some(value.to_string()),
                _ => return None,
            }
        }
        Some(Self {
            content_type: content_type?,
            media_id: media_id?,
            source: source?,
        })
    }
}

impl MediaReference {
    /// Find every well-formed `@@@langfuseMedia:...@@@` occurrence inside an
    /// arbitrary string, in left-to-right order. Unlike [`Self::parse`] this
    /// does not require the reference to be the whole string — a chat
    /// message can embed a reference alongside other text.
    pub fn find_all(s: &str) -> Vec<(std::ops::Range<usize>, MediaReference)> {
        let mut out = Vec::new();
        let mut cursor = 0;
        while let Some(start_rel) = s[cursor..].find(PREFIX) {
            let start = cursor + start_rel;
            let after_prefix = start + PREFIX.len();
            match s[after_prefix..].find(SUFFIX) {
                Some(end_rel) => {
                    let end = after_prefix + end_rel + SUFFIX.len();
                    if let Some(reference) = Self::parse(&s[start..end]) {
                        out.push((start..end, reference));
                    }
                    cursor = end;
                }
                None => break,
            }
        }
        out
    }
}

impl fmt::Display for MediaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}type={}|id={}|source={}{SUFFIX}",
            self.content_type, self.media_id, self.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_matches_grammar() {
        let r = MediaReference::new("image/png", "abc123", "base64_data_uri");
        assert_eq!(
            r.to_string(),
            "@@@langfuseMedia:type=image/png|id=abc123|source=base64_data_uri@@@"
        );
    }

    #[test]
    fn parse_roundtrips_render() {
        let r = MediaReference::new("audio/wav", "m1", "bytes");
        let rendered = r.to_string();
        assert_eq!(MediaReference::parse(&rendered), Some(r));
    }

    #[test]
    fn parse_rejects_missing_fields() {
        assert_eq!(
            MediaReference::parse("@@@langfuseMedia:type=image/png|id=abc123@@@"),
            None
        );
    }

    #[test]
    fn parse_rejects_non_reference_text() {
        assert_eq!(MediaReference::parse("just a string"), None);
        assert_eq!(MediaReference::parse(""), None);
    }

    #[test]
    fn parse_order_of_fields_is_insensitive_after_type() {
        let s = "@@@langfuseMedia:type=image/png|source=bytes|id=abc123@@@";
        assert_eq!(
            MediaReference::parse(s),
            Some(MediaReference::new("image/png", "abc123", "bytes"))
        );
    }

    #[test]
    fn parse_accepts_type_in_any_position() {
        let s = "@@@langfuseMedia:id=abc123|source=bytes|type=image/png@@@";
        assert_eq!(
            MediaReference::parse(s),
            Some(MediaReference::new("image/png", "abc123", "bytes"))
        );
    }

    #[test]
    fn parse_rejects_unknown_key() {
        let s = "@@@langfuseMedia:type=image/png|id=abc123|source=bytes|extra=x@@@";
        assert_eq!(MediaReference::parse(s), None);
    }

    #[test]
    fn find_all_locates_embedded_reference_with_surrounding_text() {
        let r = MediaReference::new("image/png", "m1", "base64_data_uri");
        let text = format!("see attached: {r} (uploaded earlier)");
        let found = MediaReference::find_all(&text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, r);
        assert_eq!(&text[found[0].0.clone()], r.to_string());
    }

    #[test]
    fn find_all_locates_multiple_references_in_order() {
        let a = MediaReference::new("image/png", "m1", "bytes");
        let b = MediaReference::new("audio/wav", "m2", "file");
        let text = format!("first {a} then {b}");
        let found = MediaReference::find_all(&text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].1, a);
        assert_eq!(found[1].1, b);
    }

    #[test]
    fn find_all_returns_empty_for_plain_text() {
        assert!(MediaReference::find_all("nothing to see here").is_empty());
    }
}
