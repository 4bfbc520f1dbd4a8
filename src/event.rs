//! Nostr event model.

use anyhow::{anyhow, Result};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Kind number of NIP-01 short text notes.
pub const KIND_NOTE: u32 = 1;
/// Kind number of NIP-25 reactions.
pub const KIND_REACTION: u32 = 7;
/// Kind number of NIP-65 relay list metadata.
pub const KIND_RELAY_LIST: u32 = 10002;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The ones that matter for lookmarks are:
///
/// - `e` – links to another event ID, optionally with a relay hint and marker
/// - `q` – quotes another event ID (or coordinate), optionally with a relay hint
/// - `a` – links to an addressable event coordinate `kind:pubkey:identifier`
/// - `d` – unique identifier for addressable events
/// - `r` – relay URL in a NIP-65 relay list
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Tag name, e.g. `e` for `["e", "<id>"]`.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Positional element at `index` (the name is index 0).
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }
}

/// Core Nostr event as returned by relays.
///
/// ```json
/// {
///   "id": "aa11...",
///   "pubkey": "bb22...",
///   "kind": 7,
///   "created_at": 1700000000,
///   "tags": [["e", "cc33...", "wss://relay.example.com"]],
///   "content": "👀",
///   "sig": "deadbeef..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1`, `7` or `30023`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Tags such as `e`, `q`, `a` or `d`. Entries that are not arrays of
    /// strings are dropped while decoding.
    #[serde(default, deserialize_with = "lenient_tags")]
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// All tags named `name`, in order.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.name() == Some(name))
    }

    /// Value of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .filter(|t| t.name() == Some(name))
            .find_map(|t| t.get(1))
    }

    /// Verify the event ID and Schnorr signature.
    pub fn verify(&self) -> Result<()> {
        let hash = event_hash(self)?;
        let calc_id = hex::encode(hash);
        if calc_id != self.id {
            return Err(anyhow!("id mismatch"));
        }
        let sig = Signature::from_slice(&hex::decode(&self.sig)?)?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey)?)?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(&hash)?;
        secp.verify_schnorr(&sig, &msg, &pk)?;
        Ok(())
    }
}

fn lenient_tags<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Vec<Tag>, D::Error> {
    let raw = Vec::<Value>::deserialize(de)?;
    Ok(raw
        .into_iter()
        .filter_map(|v| serde_json::from_value::<Tag>(v).ok())
        .collect())
}

/// Recompute the Nostr event hash from its fields.
pub(crate) fn event_hash(ev: &Event) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let data = serde_json::to_vec(&arr)?;
    let hash = Sha256::digest(&data);
    Ok(hash.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::Keypair;

    fn signed_event(content: &str) -> Event {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, &[1u8; 32]).unwrap();
        let mut ev = Event {
            id: String::new(),
            pubkey: hex::encode(kp.x_only_public_key().0.serialize()),
            kind: KIND_REACTION,
            created_at: 1,
            tags: vec![Tag(vec!["e".into(), "ab".repeat(32)])],
            content: content.into(),
            sig: String::new(),
        };
        let hash = event_hash(&ev).unwrap();
        ev.id = hex::encode(hash);
        let msg = Message::from_digest_slice(&hash).unwrap();
        ev.sig = hex::encode(secp.sign_schnorr_no_aux_rand(&msg, &kp).as_ref());
        ev
    }

    #[test]
    fn verify_accepts_signed_event() {
        assert!(signed_event("👀").verify().is_ok());
    }

    #[test]
    fn verify_rejects_tampered_content() {
        let mut ev = signed_event("👀");
        ev.content = "🙈".into();
        assert!(ev.verify().is_err());
    }

    #[test]
    fn missing_sig_deserializes_as_empty() {
        let ev: Event = serde_json::from_value(serde_json::json!({
            "id": "aa",
            "pubkey": "bb",
            "kind": 1,
            "created_at": 5,
            "tags": [["e", "cc", "wss://r"]],
            "content": "hi"
        }))
        .unwrap();
        assert!(ev.sig.is_empty());
        assert_eq!(ev.first_tag_value("e"), Some("cc"));
        assert_eq!(ev.tags[0].get(2), Some("wss://r"));
        assert_eq!(ev.tags_named("q").count(), 0);
    }

    #[test]
    fn malformed_tags_are_skipped() {
        let ev: Event = serde_json::from_value(serde_json::json!({
            "id": "aa",
            "pubkey": "bb",
            "kind": 1,
            "created_at": 5,
            "tags": [["client", 1], "loose", ["q", "cc"], [null]],
            "content": "👀"
        }))
        .unwrap();
        assert_eq!(ev.tags, vec![Tag(vec!["q".into(), "cc".into()])]);
        assert_eq!(ev.first_tag_value("client"), None);
        assert_eq!(ev.first_tag_value("q"), Some("cc"));
    }
}
