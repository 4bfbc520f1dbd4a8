//! Outbound references carried in event tags and the targets they resolve to.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    classify::LookmarkType,
    event::{Event, Tag},
};

/// Tag family a [`Reference`] was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// `e` tag.
    Direct,
    /// `q` tag.
    Quote,
    /// `a` tag.
    Addressable,
}

/// A reference tag parsed once from an event.
///
/// `hint` only holds relay URLs that passed [`valid_relay_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub kind: RefKind,
    pub value: String,
    pub hint: Option<String>,
    /// NIP-10 marker (`root`, `reply`, `mention`) on `e` tags.
    pub marker: Option<String>,
}

impl Reference {
    /// Parse an `e`, `q` or `a` tag. Tags without a value are ignored.
    pub fn from_tag(tag: &Tag) -> Option<Self> {
        let kind = match tag.name()? {
            "e" => RefKind::Direct,
            "q" => RefKind::Quote,
            "a" => RefKind::Addressable,
            _ => return None,
        };
        let value = tag.get(1)?.to_string();
        let hint = tag.get(2).filter(|h| valid_relay_url(h)).map(str::to_string);
        let marker = match kind {
            RefKind::Direct => tag.get(3).filter(|m| !m.is_empty()).map(str::to_string),
            _ => None,
        };
        Some(Self {
            kind,
            value,
            hint,
            marker,
        })
    }
}

/// All references carried by `ev`, in tag order.
pub fn references(ev: &Event) -> Vec<Reference> {
    ev.tags.iter().filter_map(Reference::from_tag).collect()
}

/// Addressable event coordinate `kind:pubkey:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub kind: u32,
    /// Not validated here; lookups skip coordinates whose author is not hex.
    pub pubkey: String,
    pub identifier: String,
}

impl FromStr for Coordinate {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [kind, pubkey, identifier] = parts.as_slice() else {
            return Err(());
        };
        let kind = kind.parse().map_err(|_| ())?;
        Ok(Self {
            kind,
            pubkey: pubkey.to_string(),
            identifier: identifier.to_string(),
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.pubkey, self.identifier)
    }
}

impl Coordinate {
    /// Coordinate an addressable event occupies, from its `d` tag.
    pub fn of_event(ev: &Event) -> Option<Self> {
        let identifier = ev.first_tag_value("d")?;
        Some(Self {
            kind: ev.kind,
            pubkey: ev.pubkey.clone(),
            identifier: identifier.to_string(),
        })
    }
}

/// What a lookmark points at.
///
/// Serialized as its string form: a hex id, or `kind:pubkey:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TargetRef {
    Id(String),
    Address(Coordinate),
}

impl TargetRef {
    /// Key used for grouping and for display when the target is unresolved.
    pub fn key(&self) -> String {
        match self {
            TargetRef::Id(id) => id.clone(),
            TargetRef::Address(c) => c.to_string(),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Id(id) => f.write_str(id),
            TargetRef::Address(c) => write!(f, "{c}"),
        }
    }
}

impl From<TargetRef> for String {
    fn from(t: TargetRef) -> Self {
        t.key()
    }
}

impl TryFrom<String> for TargetRef {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        parse_target(&s).ok_or_else(|| format!("invalid target reference: {s}"))
    }
}

/// A lookmark's target plus the relay hint that came with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub target: TargetRef,
    pub hint: Option<String>,
}

/// Extract the target of a classified lookmark.
///
/// - reactions point at their first `e` tag;
/// - quotes point at their first `q` tag;
/// - replies point at the first valid `a` coordinate, else the `e` tag marked
///   `reply`, else the last `e` tag.
///
/// Returns `None` when the chosen reference is malformed.
pub fn extract_target(ev: &Event, kind: LookmarkType) -> Option<Target> {
    let refs = references(ev);
    let pick = match kind {
        LookmarkType::Reaction => refs.iter().find(|r| r.kind == RefKind::Direct)?,
        LookmarkType::Quote => refs.iter().find(|r| r.kind == RefKind::Quote)?,
        LookmarkType::Reply => {
            let addressed = refs
                .iter()
                .filter(|r| r.kind == RefKind::Addressable)
                .find_map(|r| {
                    r.value.parse::<Coordinate>().ok().map(|c| Target {
                        target: TargetRef::Address(c),
                        hint: r.hint.clone(),
                    })
                });
            if addressed.is_some() {
                return addressed;
            }
            let direct: Vec<&Reference> =
                refs.iter().filter(|r| r.kind == RefKind::Direct).collect();
            direct
                .iter()
                .find(|r| r.marker.as_deref() == Some("reply"))
                .or_else(|| direct.last())
                .copied()?
        }
    };
    let target = match pick.kind {
        RefKind::Direct => is_hex_id(&pick.value).then(|| TargetRef::Id(pick.value.clone()))?,
        RefKind::Quote | RefKind::Addressable => parse_target(&pick.value)?,
    };
    Some(Target {
        target,
        hint: pick.hint.clone(),
    })
}

/// Parse a 64-char hex id or a `kind:pubkey:identifier` coordinate.
pub fn parse_target(value: &str) -> Option<TargetRef> {
    if is_hex_id(value) {
        return Some(TargetRef::Id(value.to_string()));
    }
    value.parse().ok().map(TargetRef::Address)
}

/// 64 hex characters, the shape of event ids and public keys.
pub fn is_hex_id(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Only `ws://` and `wss://` URLs with a host are accepted as relay hints.
pub fn valid_relay_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            matches!(url.scheme(), "ws" | "wss") && url.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}
