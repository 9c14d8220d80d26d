//! Minimal Activity representation used for inbox dispatch.
//!
//! The full ActivityStreams vocabulary type hierarchy is out of scope here, but the inbox
//! dispatcher still needs to walk "from most-specific to `Activity`" to find a registered
//! listener. [`class_chain`] encodes just enough of that hierarchy for the handful of activity
//! kinds this core cares about; callers that need the full vocabulary should layer a richer type
//! on top and still produce an [`Activity`] for dispatch.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use url::Url;

/// A parsed JSON-LD activity, exposing just the fields the core's dispatch logic needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Raw JSON-LD document
    #[serde(flatten)]
    pub document: serde_json::Value,
}

impl Activity {
    /// Parse an activity from its JSON-LD bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, Error> {
        let document: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(Self { document })
    }

    /// The activity's `id` field.
    pub fn id(&self) -> Option<Url> {
        self.document.get("id")?.as_str().and_then(|s| Url::parse(s).ok())
    }

    /// The activity's `actor` field. May be a string IRI or an embedded object with an `id`.
    pub fn actor(&self) -> Option<Url> {
        let actor = self.document.get("actor")?;
        match actor {
            serde_json::Value::String(s) => Url::parse(s).ok(),
            serde_json::Value::Object(_) => actor.get("id")?.as_str().and_then(|s| Url::parse(s).ok()),
            _ => None,
        }
    }

    /// The activity's most specific `type` name, e.g. `"Follow"`.
    pub fn kind(&self) -> Option<&str> {
        match self.document.get("type")? {
            serde_json::Value::String(s) => Some(s.as_str()),
            serde_json::Value::Array(items) => items.first()?.as_str(),
            _ => None,
        }
    }

    /// Walk this activity's class chain, most-specific first, ending at `"Activity"`.
    pub fn class_chain(&self) -> Vec<&'static str> {
        class_chain(self.kind().unwrap_or("Activity"))
    }
}

/// Returns the class chain for `kind`, most specific first, always ending in `"Activity"`.
///
/// Unknown kinds are treated as direct subclasses of `Activity`.
pub fn class_chain(kind: &str) -> Vec<&'static str> {
    const KNOWN: &[(&str, &str)] = &[
        ("Follow", "Activity"),
        ("Accept", "Activity"),
        ("Reject", "Activity"),
        ("TentativeAccept", "Accept"),
        ("TentativeReject", "Reject"),
        ("Add", "Activity"),
        ("Remove", "Activity"),
        ("Like", "Activity"),
        ("Block", "Ignore"),
        ("Ignore", "Activity"),
        ("Create", "Activity"),
        ("Update", "Activity"),
        ("Delete", "Activity"),
        ("Undo", "Activity"),
        ("Announce", "Activity"),
        ("Move", "Activity"),
        ("Offer", "Activity"),
        ("Invite", "Offer"),
        ("Join", "Activity"),
        ("Leave", "Activity"),
        ("Flag", "Activity"),
        ("Dislike", "Activity"),
        ("Question", "IntransitiveActivity"),
        ("IntransitiveActivity", "Activity"),
        ("Arrive", "IntransitiveActivity"),
        ("Travel", "IntransitiveActivity"),
    ];
    let lookup = |name: &str| -> Option<&'static str> {
        KNOWN
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, parent)| *parent)
    };
    let known_name = KNOWN.iter().find(|(k, _)| *k == kind).map(|(k, _)| *k);
    let mut chain = Vec::new();
    let mut current = known_name.unwrap_or("Activity");
    chain.push(current);
    while current != "Activity" {
        current = lookup(current).unwrap_or("Activity");
        chain.push(current);
    }
    chain
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_and_actor() {
        let activity = Activity::from_json(
            br#"{"id":"https://example.com/1","actor":"https://example.com/person","type":"Follow"}"#,
        )
        .unwrap();
        assert_eq!(activity.id().unwrap().as_str(), "https://example.com/1");
        assert_eq!(activity.actor().unwrap().as_str(), "https://example.com/person");
        assert_eq!(activity.kind(), Some("Follow"));
    }

    #[test]
    fn actor_may_be_embedded_object() {
        let activity = Activity::from_json(
            br#"{"id":"https://example.com/1","actor":{"id":"https://example.com/person"},"type":"Follow"}"#,
        )
        .unwrap();
        assert_eq!(activity.actor().unwrap().as_str(), "https://example.com/person");
    }

    #[test]
    fn class_chain_walks_to_activity() {
        assert_eq!(class_chain("Follow"), vec!["Follow", "Activity"]);
        assert_eq!(
            class_chain("TentativeAccept"),
            vec!["TentativeAccept", "Accept", "Activity"]
        );
        assert_eq!(class_chain("Bespoke"), vec!["Activity"]);
    }
}
