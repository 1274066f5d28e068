//! Mustache-style `{{variable}}` substitution, with no HTML escaping.

use serde_json::Value;
use std::collections::BTreeMap;

/// Replace every `{{name}}` occurrence with the matching entry of
/// `variables`. String values are inlined verbatim; any other JSON value is
/// inlined as its compact encoding. A `{{name}}` with no matching entry is
/// left in the output untouched.
pub fn substitute(text: &str, variables: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = find_close(text, i + 2) {
                let name = text[i + 2..end].trim();
                match variables.get(name) {
                    Some(value) => {
                        out.push_str(&value_to_text(value));
                        i = end + 2;
                        continue;
                    }
                    None => {
                        out.push_str(&text[i..end + 2]);
                        i = end + 2;
                        continue;
                    }
                }
            }
        }
        let ch = text[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn find_close(text: &str, from: usize) -> Option<usize> {
    text[from..].find("}}").map(|p| from + p)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn substitutes_string_value_as_is() {
        let v = vars(&[("j", json!("{\"k\":1}"))]);
        assert_eq!(substitute("val={{j}}", &v), "val={\"k\":1}");
    }

    #[test]
    fn substitutes_number_as_compact_json() {
        let v = vars(&[("n", json!(42))]);
        assert_eq!(substitute("n={{n}}", &v), "n=42");
    }

    #[test]
    fn substitutes_object_as_compact_json() {
        let v = vars(&[("o", json!({"a": 1}))]);
        assert_eq!(substitute("o={{o}}", &v), "o={\"a\":1}");
    }

    #[test]
    fn leaves_unresolved_placeholder_untouched() {
        assert_eq!(substitute("hi {{name}}", &BTreeMap::new()), "hi {{name}}");
    }

    #[test]
    fn trims_whitespace_inside_braces() {
        let v = vars(&[("name", json!("Ada"))]);
        assert_eq!(substitute("hi {{ name }}", &v), "hi Ada");
    }

    #[test]
    fn handles_multiple_occurrences() {
        let v = vars(&[("x", json!("1"))]);
        assert_eq!(substitute("{{x}}-{{x}}-{{x}}", &v), "1-1-1");
    }

    #[test]
    fn unterminated_braces_pass_through() {
        assert_eq!(substitute("hi {{name", &BTreeMap::new()), "hi {{name");
    }
}
