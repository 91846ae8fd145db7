//! Source-tag-keyed prompt selection.
//!
//! An ordered list of entries evaluated top-to-bottom: exact match, then
//! case-insensitive exact, then substring containment (so "facebook_lead"
//! resolves to the "facebook" entry), with the default as the final
//! catch-all.

use crate::config::PromptsConfig;

#[derive(Debug, Clone)]
pub struct PromptEntry {
    pub tag: String,
    pub system_prompt: String,
    pub first_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptBook {
    entries: Vec<PromptEntry>,
    default_prompt: String,
    default_first_message: String,
}

impl PromptBook {
    pub fn from_config(config: &PromptsConfig) -> Self {
        Self {
            entries: config
                .sources
                .iter()
                .map(|s| PromptEntry {
                    tag: s.tag.clone(),
                    system_prompt: s.system_prompt.clone(),
                    first_message: s.first_message.clone(),
                })
                .collect(),
            default_prompt: config.default_prompt.clone(),
            default_first_message: config.default_first_message.clone(),
        }
    }

    pub fn resolve_prompt(&self, source_tag: Option<&str>) -> &str {
        self.resolve_entry(source_tag)
            .map(|e| e.system_prompt.as_str())
            .unwrap_or(&self.default_prompt)
    }

    /// First outreach text for a new contact, with `[name]` substituted.
    pub fn resolve_first_message(&self, source_tag: Option<&str>, contact_name: &str) -> String {
        let template = self
            .resolve_entry(source_tag)
            .and_then(|e| e.first_message.as_deref())
            .unwrap_or(&self.default_first_message);
        template.replace("[name]", contact_name)
    }

    pub fn known_tags(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tag.as_str()).collect()
    }

    fn resolve_entry(&self, source_tag: Option<&str>) -> Option<&PromptEntry> {
        let tag = source_tag?.trim();
        if tag.is_empty() {
            return None;
        }

        if let Some(entry) = self.entries.iter().find(|e| e.tag == tag) {
            return Some(entry);
        }
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.tag.eq_ignore_ascii_case(tag))
        {
            return Some(entry);
        }

        // Partial match: "facebook_lead" and "facebook_ad" both fall under a
        // "facebook" entry.
        let tag_lower = tag.to_lowercase();
        self.entries
            .iter()
            .find(|e| tag_lower.contains(&e.tag.to_lowercase()))
    }
}
