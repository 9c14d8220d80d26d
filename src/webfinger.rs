//! WebFinger JRD types and `resource` parameter parsing.
//!
//! The `Webfinger`/`WebfingerLink` struct shapes follow the JRD format directly; the `resource`
//! parameter accepts both the `acct:user@host` form and the `https://host/users/handle` URI form.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// A WebFinger JSON Resource Descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webfinger {
    /// The resource this document describes, e.g. `acct:john@example.com`
    pub subject: String,
    /// Links describing the subject
    pub links: Vec<WebfingerLink>,
}

/// A single link within a [`Webfinger`] document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebfingerLink {
    /// Link relation, e.g. `"self"` or `"http://webfinger.net/rel/profile-page"`
    pub rel: Option<String>,
    /// Media type of the linked resource
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// The linked URL
    pub href: Option<Url>,
    #[serde(default)]
    /// Additional link properties
    pub properties: HashMap<String, String>,
}

/// Build the JRD returned for a known actor: a `self` link to the actor's ActivityPub URI, and
/// an optional `profile-page` alias.
pub fn build_webfinger_response(resource: String, actor_uri: Url, profile_page: Option<Url>) -> Webfinger {
    let mut links = vec![WebfingerLink {
        rel: Some("self".to_string()),
        kind: Some(crate::FEDERATION_CONTENT_TYPE.to_string()),
        href: Some(actor_uri),
        properties: HashMap::new(),
    }];
    if let Some(profile_page) = profile_page {
        links.push(WebfingerLink {
            rel: Some("http://webfinger.net/rel/profile-page".to_string()),
            kind: Some("text/html".to_string()),
            href: Some(profile_page),
            properties: HashMap::new(),
        });
    }
    Webfinger { subject: resource, links }
}

/// The parsed form of a WebFinger `resource` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebfingerResource {
    /// `acct:handle@host`
    Acct { handle: String, host: String },
    /// `https://host/users/handle`-shaped actor URI
    ActorUri(Url),
}

static ACCT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^acct:([^@]+)@(.+)$").expect("valid regex")
});

/// Parse a `resource=` query parameter into either an `acct:` handle or a plain actor URI.
///
/// Returns `None` if `resource` is neither shape (a malformed request, reported as 400).
pub fn parse_resource(resource: &str) -> Option<WebfingerResource> {
    if let Some(caps) = ACCT_RE.captures(resource) {
        return Some(WebfingerResource::Acct {
            handle: caps[1].to_string(),
            host: caps[2].to_string(),
        });
    }
    if resource.starts_with("https://") || resource.starts_with("http://") {
        return Url::parse(resource).ok().map(WebfingerResource::ActorUri);
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_acct_resource() {
        let parsed = parse_resource("acct:john@example.com").unwrap();
        assert_eq!(
            parsed,
            WebfingerResource::Acct {
                handle: "john".to_string(),
                host: "example.com".to_string()
            }
        );
    }

    #[test]
    fn parses_actor_uri_resource() {
        let parsed = parse_resource("https://example.com/users/john").unwrap();
        assert_eq!(
            parsed,
            WebfingerResource::ActorUri(Url::parse("https://example.com/users/john").unwrap())
        );
    }

    #[test]
    fn rejects_malformed_resource() {
        assert!(parse_resource("not-a-resource").is_none());
    }

    #[test]
    fn builds_response_with_profile_page() {
        let actor = Url::parse("https://example.com/users/john").unwrap();
        let profile = Url::parse("https://example.com/@john").unwrap();
        let jrd = build_webfinger_response(
            "acct:john@example.com".to_string(),
            actor.clone(),
            Some(profile.clone()),
        );
        assert_eq!(jrd.links.len(), 2);
        assert_eq!(jrd.links[0].href.as_ref().unwrap(), &actor);
        assert_eq!(jrd.links[1].href.as_ref().unwrap(), &profile);
    }
}
