//! Decide whether an event is a lookmark and of which type.

use serde::{Deserialize, Serialize};

use crate::{
    event::{Event, KIND_NOTE, KIND_REACTION},
    reference::{references, RefKind},
};

/// The marker glyph that turns a note or reaction into a lookmark.
pub const EYES: &str = "👀";

/// How a lookmark was expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookmarkType {
    /// Kind 7 reaction with 👀 content.
    Reaction,
    /// Kind 1 note with 👀 that references another event.
    Reply,
    /// Kind 1 note with 👀 and a `q` tag.
    Quote,
}

/// Content carries the marker glyph.
pub fn has_eyes(ev: &Event) -> bool {
    ev.content.contains(EYES)
}

/// The event references another event through a `q`, `e` or `a` tag.
pub fn is_referential(ev: &Event) -> bool {
    !references(ev).is_empty()
}

/// Classify `ev`, returning `None` when it is not a lookmark.
pub fn classify(ev: &Event) -> Option<LookmarkType> {
    if !has_eyes(ev) {
        return None;
    }
    let refs = references(ev);
    match ev.kind {
        KIND_REACTION => refs
            .iter()
            .any(|r| r.kind == RefKind::Direct)
            .then_some(LookmarkType::Reaction),
        KIND_NOTE if refs.is_empty() => None,
        KIND_NOTE if refs.iter().any(|r| r.kind == RefKind::Quote) => Some(LookmarkType::Quote),
        KIND_NOTE => Some(LookmarkType::Reply),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tag;

    fn event(kind: u32, content: &str, tags: &[&[&str]]) -> Event {
        Event {
            id: "f".repeat(64),
            pubkey: "9".repeat(64),
            kind,
            created_at: 1,
            tags: tags
                .iter()
                .map(|t| Tag(t.iter().map(|s| s.to_string()).collect()))
                .collect(),
            content: content.into(),
            sig: String::new(),
        }
    }

    #[test]
    fn quote_iff_q_tag() {
        let q = event(1, "👀", &[&["q", "x"], &["e", "y"]]);
        assert_eq!(classify(&q), Some(LookmarkType::Quote));
        let e = event(1, "look 👀", &[&["e", "y", "", "mention"]]);
        assert_eq!(classify(&e), Some(LookmarkType::Reply));
        let a = event(1, "👀", &[&["a", "30023:pk:d"]]);
        assert_eq!(classify(&a), Some(LookmarkType::Reply));
    }

    #[test]
    fn note_without_reference_is_not_a_lookmark() {
        assert_eq!(classify(&event(1, "👀", &[])), None);
        assert_eq!(classify(&event(1, "👀", &[&["p", "pk"], &["t", "eyes"]])), None);
        // a tag with no value is treated as absent
        assert_eq!(classify(&event(1, "👀", &[&["e"]])), None);
    }

    #[test]
    fn reaction_needs_e_tag() {
        assert_eq!(
            classify(&event(7, "👀", &[&["e", "y"]])),
            Some(LookmarkType::Reaction)
        );
        assert_eq!(classify(&event(7, "👀", &[&["p", "pk"]])), None);
        assert_eq!(classify(&event(7, "👀", &[&["q", "y"]])), None);
    }

    #[test]
    fn requires_marker_glyph() {
        assert_eq!(classify(&event(7, "+", &[&["e", "y"]])), None);
        assert_eq!(classify(&event(1, "hello", &[&["q", "y"]])), None);
    }

    #[test]
    fn other_kinds_rejected() {
        assert_eq!(classify(&event(6, "👀", &[&["e", "y"]])), None);
        assert!(is_referential(&event(6, "", &[&["a", "x"]])));
        assert!(has_eyes(&event(6, "👀👀", &[])));
    }
}
