//! Citation numbering for contributing documents
//!
//! A registry lives for exactly one retrieval cycle. Ids start at 1 and are
//! handed out in order of first appearance; a title seen again gets its
//! existing id back and the stored record is left untouched.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A deduplicated citation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: usize,
    pub title: String,
    pub url: String,
    pub created_at: String,
}

impl Source {
    /// `[id] title`, the form cited in prompts
    pub fn label(&self) -> String {
        format!("[{}] {}", self.id, self.title)
    }
}

/// Per-cycle title to id mapping
#[derive(Debug, Default)]
pub struct SourceRegistry {
    ids: HashMap<String, usize>,
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `title` to its citation id, allocating the next id on first sight
    pub fn register(&mut self, title: &str, url: &str, created_at: &str) -> usize {
        if let Some(&id) = self.ids.get(title) {
            return id;
        }

        let id = self.sources.len() + 1;
        self.ids.insert(title.to_string(), id);
        self.sources.push(Source {
            id,
            title: title.to_string(),
            url: url.to_string(),
            created_at: created_at.to_string(),
        });
        id
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Sources in id order
    pub fn into_sources(self) -> Vec<Source> {
        self.sources
    }
}

/// Render the source appendix shown under an answer.
///
/// Empty input renders as an empty string.
pub fn render_sources_markdown(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n\n### Sources:\n");
    for source in sources {
        out.push_str(&format!(
            "- [{}] [{}]({}) (Created: {})\n",
            source.id,
            source.title,
            source.url,
            format_created_at(&source.created_at)
        ));
    }
    out
}

/// `14:05 Thursday, May 02, 2024`, or the raw value if it does not parse.
/// Any UTC offset suffix is ignored; the wall-clock time is shown as stored.
fn format_created_at(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .map(|dt| dt.format("%H:%M %A, %B %d, %Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_first_appearance() {
        let mut registry = SourceRegistry::new();
        let ids: Vec<usize> = ["X", "Y", "X", "Z"]
            .iter()
            .map(|title| registry.register(title, "", ""))
            .collect();

        assert_eq!(ids, vec![1, 2, 1, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_repeat_registration_keeps_first_record() {
        let mut registry = SourceRegistry::new();
        registry.register("Macro Weekly", "https://a.example", "2024-05-01T08:00:00");
        registry.register("Macro Weekly", "https://b.example", "2024-06-01T08:00:00");

        let sources = registry.into_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://a.example");
        assert_eq!(sources[0].created_at, "2024-05-01T08:00:00");
        assert_eq!(sources[0].label(), "[1] Macro Weekly");
    }

    #[test]
    fn test_render_markdown() {
        let sources = vec![
            Source {
                id: 1,
                title: "RBA Minutes".to_string(),
                url: "https://docs.example/rba".to_string(),
                created_at: "2024-05-02T14:05:00+10:00".to_string(),
            },
            Source {
                id: 2,
                title: "Desk Note".to_string(),
                url: String::new(),
                created_at: "yesterday".to_string(),
            },
        ];

        assert_eq!(
            render_sources_markdown(&sources),
            "\n\n### Sources:\n\
             - [1] [RBA Minutes](https://docs.example/rba) (Created: 14:05 Thursday, May 02, 2024)\n\
             - [2] [Desk Note]() (Created: yesterday)\n"
        );
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_sources_markdown(&[]), "");
    }
}
