//! NodeInfo discovery and document types.
//!
//! The teacher does not implement NodeInfo; this module follows its `webfinger.rs` idiom
//! (plain serde structs plus a small builder function) applied to the NodeInfo 2.x schema.

use serde::{Deserialize, Serialize};
use url::Url;

/// The `/.well-known/nodeinfo` discovery document: a JRD pointing at the actual NodeInfo
/// document's URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfoDiscovery {
    /// Discovery links
    pub links: Vec<NodeInfoDiscoveryLink>,
}

/// A single discovery link within [`NodeInfoDiscovery`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfoDiscoveryLink {
    /// NodeInfo schema version URI, e.g. `http://nodeinfo.diaspora.software/ns/schema/2.1`
    pub rel: String,
    /// URL of the actual NodeInfo document
    pub href: Url,
}

/// Build the discovery document pointing at `nodeinfo_url`.
pub fn build_discovery(nodeinfo_url: Url) -> NodeInfoDiscovery {
    NodeInfoDiscovery {
        links: vec![NodeInfoDiscoveryLink {
            rel: "http://nodeinfo.diaspora.software/ns/schema/2.1".to_string(),
            href: nodeinfo_url,
        }],
    }
}

/// The NodeInfo 2.x document describing this server's software and usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Schema version, e.g. `"2.1"`
    pub version: String,
    /// Software name and version
    pub software: NodeInfoSoftware,
    /// Supported federation protocols, e.g. `["activitypub"]`
    pub protocols: Vec<String>,
    /// Inbound/outbound service integrations (email, xmpp, ...); usually empty
    #[serde(default)]
    pub services: NodeInfoServices,
    /// Whether open registration is allowed
    pub open_registrations: bool,
    /// Usage counters
    pub usage: NodeInfoUsage,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Software identification within a [`NodeInfo`] document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfoSoftware {
    /// Software name, lowercase, no spaces
    pub name: String,
    /// Software version string
    pub version: String,
}

/// Third-party service integrations, per the NodeInfo schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfoServices {
    /// Services this node can receive messages from
    #[serde(default)]
    pub inbound: Vec<String>,
    /// Services this node can send messages to
    #[serde(default)]
    pub outbound: Vec<String>,
}

/// Usage counters within a [`NodeInfo`] document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoUsage {
    /// User counters
    pub users: NodeInfoUsageUsers,
    /// Number of posts made by local users
    #[serde(default)]
    pub local_posts: Option<u64>,
    /// Number of comments made by local users
    #[serde(default)]
    pub local_comments: Option<u64>,
}

/// User counters within [`NodeInfoUsage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfoUsageUsers {
    /// Total registered users
    #[serde(default)]
    pub total: Option<u64>,
    /// Users active in the last 180 days
    #[serde(default)]
    pub active_halfyear: Option<u64>,
    /// Users active in the last 30 days
    #[serde(default)]
    pub active_month: Option<u64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn discovery_points_at_nodeinfo_url() {
        let url = Url::parse("https://example.com/nodeinfo/2.1").unwrap();
        let discovery = build_discovery(url.clone());
        assert_eq!(discovery.links[0].href, url);
    }

    #[test]
    fn nodeinfo_round_trips_through_json() {
        let doc = NodeInfo {
            version: "2.1".to_string(),
            software: NodeInfoSoftware {
                name: "fedireg".to_string(),
                version: "0.1.0".to_string(),
            },
            protocols: vec!["activitypub".to_string()],
            services: NodeInfoServices::default(),
            open_registrations: false,
            usage: NodeInfoUsage {
                users: NodeInfoUsageUsers {
                    total: Some(1),
                    active_halfyear: None,
                    active_month: None,
                },
                local_posts: None,
                local_comments: None,
            },
            metadata: serde_json::json!({}),
        };
        let json = serde_json::to_string(&doc).unwrap();
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.software.name, "fedireg");
    }
}
