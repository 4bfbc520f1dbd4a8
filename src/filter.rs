//! NIP-01 subscription filters.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::event::Event;

/// Filter parameters used when building a Nostr `REQ` subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    /// Restrict to specific event IDs.
    pub ids: Option<Vec<String>>,
    /// Restrict to specific authors.
    pub authors: Option<Vec<String>>,
    /// Restrict to event kinds.
    pub kinds: Option<Vec<u32>>,
    /// Tag filters keyed by tag name without the `#` prefix (e.g. `d`).
    pub tags: BTreeMap<String, Vec<String>>,
    /// NIP-50 full-text search term.
    pub search: Option<String>,
    /// Lower bound for `created_at`.
    pub since: Option<u64>,
    /// Inclusive upper bound for `created_at`.
    pub until: Option<u64>,
    /// Maximum number of events requested.
    pub limit: Option<usize>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    /// Restrict to `authors` only when `pubkey` is present.
    pub fn author_opt(self, pubkey: Option<&str>) -> Self {
        match pubkey {
            Some(pk) => self.author(pk),
            None => self,
        }
    }

    pub fn tag(mut self, name: &str, value: impl Into<String>) -> Self {
        self.tags
            .entry(name.trim_start_matches('#').to_string())
            .or_default()
            .push(value.into());
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn until(mut self, until: Option<u64>) -> Self {
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Convert into the JSON object sent inside a `REQ` message.
    pub fn to_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(ids) = &self.ids {
            map.insert("ids".into(), strings(ids));
        }
        if let Some(authors) = &self.authors {
            if !authors.is_empty() {
                map.insert("authors".into(), strings(authors));
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.is_empty() {
                map.insert(
                    "kinds".into(),
                    Value::Array(kinds.iter().map(|k| Value::Number((*k).into())).collect()),
                );
            }
        }
        for (tag, values) in &self.tags {
            if values.is_empty() {
                continue;
            }
            map.insert(format!("#{tag}"), strings(values));
        }
        if let Some(search) = &self.search {
            map.insert("search".into(), Value::String(search.clone()));
        }
        if let Some(since) = self.since {
            map.insert("since".into(), Value::Number(since.into()));
        }
        if let Some(until) = self.until {
            map.insert("until".into(), Value::Number(until.into()));
        }
        if let Some(limit) = self.limit {
            map.insert("limit".into(), Value::Number(limit.into()));
        }
        map
    }

    /// Local evaluation of the filter against an event.
    ///
    /// `search` is treated as a plain substring match on the content, which is
    /// the weakest behaviour a NIP-50 relay may implement.
    pub fn matches(&self, ev: &Event) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|id| id == &ev.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.is_empty() && !authors.iter().any(|a| a == &ev.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.is_empty() && !kinds.contains(&ev.kind) {
                return false;
            }
        }
        for (tag, values) in &self.tags {
            let hit = ev
                .tags_named(tag)
                .filter_map(|t| t.get(1))
                .any(|v| values.iter().any(|want| want == v));
            if !hit {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !ev.content.contains(search.as_str()) {
                return false;
            }
        }
        self.since.map_or(true, |s| ev.created_at >= s)
            && self.until.map_or(true, |u| ev.created_at <= u)
    }
}

fn strings(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn event(id: &str, kind: u32, created_at: u64, tags: Vec<Tag>, content: &str) -> Event {
        Event {
            id: id.into(),
            pubkey: "p1".into(),
            kind,
            created_at,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn to_json_fields() {
        let f = Filter::new()
            .kinds([30023])
            .author("p1")
            .tag("#d", "slug")
            .search("👀")
            .until(Some(9))
            .limit(1);
        let json = Value::Object(f.to_json());
        assert_eq!(
            json,
            serde_json::json!({
                "kinds": [30023],
                "authors": ["p1"],
                "#d": ["slug"],
                "search": "👀",
                "until": 9,
                "limit": 1
            })
        );
    }

    #[test]
    fn to_json_defaults_empty() {
        assert!(Filter::new().to_json().is_empty());
        assert!(Filter::new().author_opt(None).until(None).to_json().is_empty());
    }

    #[test]
    fn matches_applies_every_field() {
        let ev = event(
            "aa",
            30023,
            5,
            vec![Tag(vec!["d".into(), "slug".into()])],
            "look 👀",
        );
        assert!(Filter::new().kinds([30023]).tag("d", "slug").matches(&ev));
        assert!(Filter::new().search("👀").until(Some(5)).matches(&ev));
        assert!(!Filter::new().until(Some(4)).matches(&ev));
        assert!(!Filter::new().tag("d", "other").matches(&ev));
        assert!(!Filter::new().ids(["bb".to_string()]).matches(&ev));
        assert!(!Filter::new().author("p2").matches(&ev));
        assert!(!Filter::new().search("🙈").matches(&ev));
    }
}
