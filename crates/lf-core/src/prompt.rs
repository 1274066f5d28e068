//! Prompt objects, chat items, and the mustache-style compile step.

use crate::template;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One turn of a chat prompt, or a named slot to be filled at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatItem {
    Message { role: String, content: String },
    Placeholder { name: String },
}

/// The type-specific payload of a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptBody {
    Text { prompt: String },
    Chat { prompt: Vec<ChatItem> },
}

/// A prompt fetched from, or about to be created on, the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// True when this value was never returned by the backend and is instead
    /// the caller-supplied fallback (invariant E2: fallback prompts never
    /// produce a prompt linkage on the generations compiled from them).
    #[serde(default)]
    pub is_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(flatten)]
    pub body: PromptBody,
}

/// The result of compiling a [`Prompt`] against a variable map.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledPrompt {
    Text(String),
    Chat(Vec<ChatItem>),
}

impl Prompt {
    /// The key under which this version is cached: `name@version` or, for a
    /// label lookup, `name@label:<label>`. A bare `name` key (no version or
    /// label given) resolves to the `production` label server-side, but the
    /// cache always keys on the concrete lookup the caller asked for.
    pub fn cache_key(name: &str, version: Option<u32>, label: Option<&str>) -> String {
        match (version, label) {
            (Some(v), _) => format!("{name}@{v}"),
            (None, Some(l)) => format!("{name}@label:{l}"),
            (None, None) => format!("{name}@label:production"),
        }
    }

    /// Substitute `{{variable}}` placeholders (and, for chat prompts, named
    /// placeholder turns) without any HTML escaping.
    ///
    /// String-valued variables are inlined as-is; any other JSON value is
    /// inlined as its compact JSON encoding. Variables or placeholders with
    /// no matching entry are left untouched in the output.
    pub fn compile(
        &self,
        variables: &BTreeMap<String, Value>,
        placeholders: &[ChatItem],
    ) -> CompiledPrompt {
        match &self.body {
            PromptBody::Text { prompt } => {
                CompiledPrompt::Text(template::substitute(prompt, variables))
            }
            PromptBody::Chat { prompt } => {
                let mut out = Vec::with_capacity(prompt.len());
                for item in prompt {
                    match item {
                        ChatItem::Message { role, content } => out.push(ChatItem::Message {
                            role: role.clone(),
                            content: template::substitute(content, variables),
                        }),
                        ChatItem::Placeholder { name } => {
                            if let Some(resolved) = resolve_placeholder(name, placeholders) {
                                for r in resolved {
                                    out.push(match r {
                                        ChatItem::Message { role, content } => ChatItem::Message {
                                            role: role.clone(),
                                            content: template::substitute(content, variables),
                                        },
                                        other => other.clone(),
                                    });
                                }
                            } else {
                                out.push(ChatItem::Placeholder { name: name.clone() });
                            }
                        }
                    }
                }
                CompiledPrompt::Chat(out)
            }
        }
    }
}

/// Placeholders are supplied as `(name, messages)` pairs flattened into a
/// single slice: a `Placeholder { name }` marker immediately followed by the
/// `Message` items it expands to, up to the next marker or the end of the
/// slice. This mirrors how a caller builds the `placeholders` argument: one
/// marker per named slot, with its replacement messages inline after it.
fn resolve_placeholder<'a>(name: &str, placeholders: &'a [ChatItem]) -> Option<Vec<&'a ChatItem>> {
    let start = placeholders.iter().position(|p| match p {
        ChatItem::Placeholder { name: n } => n == name,
        ChatItem::Message { .. } => false,
    })?;
    let mut out = Vec::new();
    for item in &placeholders[start + 1..] {
        match item {
            ChatItem::Placeholder { .. } => break,
            ChatItem::Message { .. } => out.push(item),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    // ── cache key formatting ─────────────────────────────────────────────

    #[test]
    fn cache_key_prefers_version() {
        assert_eq!(Prompt::cache_key("greeting", Some(3), Some("staging")), "greeting@3");
    }

    #[test]
    fn cache_key_falls_back_to_label() {
        assert_eq!(Prompt::cache_key("greeting", None, Some("staging")), "greeting@label:staging");
    }

    #[test]
    fn cache_key_defaults_to_production_label() {
        assert_eq!(Prompt::cache_key("greeting", None, None), "greeting@label:production");
    }

    // ── text prompt compile ─────────────────────────────────────────────

    #[test]
    fn text_compile_substitutes_string_variable_as_is() {
        let prompt = Prompt {
            name: "p".into(),
            version: 1,
            config: json!({}),
            labels: vec![],
            tags: vec![],
            is_fallback: false,
            commit_message: None,
            body: PromptBody::Text { prompt: "val={{j}}".into() },
        };
        let vars = vars(&[("j", json!("{\"k\":1}"))]);
        let out = prompt.compile(&vars, &[]);
        assert_eq!(out, CompiledPrompt::Text("val={\"k\":1}".into()));
    }

    #[test]
    fn text_compile_encodes_non_string_variable_as_json() {
        let prompt = Prompt {
            name: "p".into(),
            version: 1,
            config: json!({}),
            labels: vec![],
            tags: vec![],
            is_fallback: false,
            commit_message: None,
            body: PromptBody::Text { prompt: "n={{n}}".into() },
        };
        let vars = vars(&[("n", json!(42))]);
        assert_eq!(prompt.compile(&vars, &[]), CompiledPrompt::Text("n=42".into()));
    }

    #[test]
    fn text_compile_leaves_unresolved_variable_untouched() {
        let prompt = Prompt {
            name: "p".into(),
            version: 1,
            config: json!({}),
            labels: vec![],
            tags: vec![],
            is_fallback: false,
            commit_message: None,
            body: PromptBody::Text { prompt: "hi {{name}}".into() },
        };
        assert_eq!(
            prompt.compile(&BTreeMap::new(), &[]),
            CompiledPrompt::Text("hi {{name}}".into())
        );
    }

    // ── chat prompt compile ─────────────────────────────────────────────

    #[test]
    fn chat_compile_substitutes_variables_in_messages() {
        let prompt = Prompt {
            name: "p".into(),
            version: 1,
            config: json!({}),
            labels: vec![],
            tags: vec![],
            is_fallback: false,
            commit_message: None,
            body: PromptBody::Chat {
                prompt: vec![ChatItem::Message {
                    role: "user".into(),
                    content: "hello {{name}}".into(),
                }],
            },
        };
        let vars = vars(&[("name", json!("Ada"))]);
        assert_eq!(
            prompt.compile(&vars, &[]),
            CompiledPrompt::Chat(vec![ChatItem::Message {
                role: "user".into(),
                content: "hello Ada".into(),
            }])
        );
    }

    #[test]
    fn chat_compile_expands_placeholder_from_supplied_messages() {
        let prompt = Prompt {
            name: "p".into(),
            version: 1,
            config: json!({}),
            labels: vec![],
            tags: vec![],
            is_fallback: false,
            commit_message: None,
            body: PromptBody::Chat {
                prompt: vec![
                    ChatItem::Message { role: "system".into(), content: "base".into() },
                    ChatItem::Placeholder { name: "history".into() },
                ],
            },
        };
        let placeholders = vec![
            ChatItem::Placeholder { name: "history".into() },
            ChatItem::Message { role: "user".into(), content: "q1".into() },
            ChatItem::Message { role: "assistant".into(), content: "a1".into() },
        ];
        let CompiledPrompt::Chat(out) = prompt.compile(&BTreeMap::new(), &placeholders) else {
            panic!("expected chat");
        };
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], ChatItem::Message { role: "user".into(), content: "q1".into() });
        assert_eq!(out[2], ChatItem::Message { role: "assistant".into(), content: "a1".into() });
    }

    #[test]
    fn chat_compile_preserves_unresolved_placeholder() {
        let prompt = Prompt {
            name: "p".into(),
            version: 1,
            config: json!({}),
            labels: vec![],
            tags: vec![],
            is_fallback: false,
            commit_message: None,
            body: PromptBody::Chat {
                prompt: vec![ChatItem::Placeholder { name: "missing".into() }],
            },
        };
        let CompiledPrompt::Chat(out) = prompt.compile(&BTreeMap::new(), &[]) else {
            panic!("expected chat");
        };
        assert_eq!(out, vec![ChatItem::Placeholder { name: "missing".into() }]);
    }
}
