//! URI-template router: forward match and reverse build from a single set of named templates.
//!
//! Every federation surface (actor, object, inbox, ...) is registered here under a unique name
//! with an RFC 6570 "simple" template (`{var}` expansions only). The same template drives both
//! directions so that dispatch and URL minting never diverge.

use crate::error::RouterError;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use url::form_urlencoded::byte_serialize;

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone)]
struct Route {
    name: String,
    template: String,
    segments: Vec<Segment>,
    variables: BTreeSet<String>,
}

/// URI-template router with named routes.
///
/// See module docs. Not `Clone`: the registry owns a single instance behind an `Arc` and treats
/// it as read-only after the first `fetch`.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
    by_name: HashMap<String, usize>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `template` and register it under `name`, returning the set of variable names found.
    ///
    /// Fails with [`RouterError::DuplicateName`] if `name` is already registered, or
    /// [`RouterError::MalformedTemplate`] if the template cannot be parsed.
    pub fn add(&mut self, template: &str, name: &str) -> Result<BTreeSet<String>, RouterError> {
        if self.by_name.contains_key(name) {
            return Err(RouterError::DuplicateName(name.to_string()));
        }
        let segments = parse_template(template)?;
        let variables = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Variable(v) => Some(v.clone()),
                Segment::Literal(_) => None,
            })
            .collect::<BTreeSet<_>>();
        debug!("registering route `{name}` -> `{template}` (variables: {variables:?})");
        let route = Route {
            name: name.to_string(),
            template: template.to_string(),
            segments,
            variables: variables.clone(),
        };
        self.by_name.insert(name.to_string(), self.routes.len());
        self.routes.push(route);
        Ok(variables)
    }

    /// Returns true if a route with this name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Match `path` (no query/fragment) against every registered template, returning the first
    /// matching route's name and the captured variable values.
    ///
    /// Matching is case-sensitive and trailing slashes are significant. Variables match exactly
    /// one non-`/` path segment.
    pub fn route(&self, path: &str) -> Option<(String, HashMap<String, String>)> {
        let path_segments: Vec<&str> = split_path(path);
        let mut best: Option<(&Route, HashMap<String, String>)> = None;
        for route in &self.routes {
            if let Some(values) = match_segments(&route.segments, &path_segments) {
                let is_better = best
                    .as_ref()
                    .map(|(b, _)| route.segments.len() > b.segments.len())
                    .unwrap_or(true);
                if is_better {
                    best = Some((route, values));
                }
            }
        }
        best.map(|(route, values)| (route.name.clone(), values))
    }

    /// Build the path for route `name`, substituting each `{var}` with the percent-encoded
    /// value from `values`. Returns `None` if `name` is unknown or a required value is missing.
    pub fn build(&self, name: &str, values: &HashMap<String, String>) -> Option<String> {
        let idx = *self.by_name.get(name)?;
        let route = &self.routes[idx];
        let mut out = String::new();
        for segment in &route.segments {
            out.push('/');
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Variable(var) => {
                    let value = values.get(var)?;
                    out.push_str(&encode_segment(value));
                }
            }
        }
        if out.is_empty() {
            out.push('/');
        }
        Some(out)
    }

    /// Like [`Router::build`] but returns a [`RouterError`] describing what went wrong.
    pub fn build_or_err(
        &self,
        name: &str,
        values: &HashMap<String, String>,
    ) -> Result<String, RouterError> {
        if !self.has(name) {
            return Err(RouterError::UnknownRoute(name.to_string()));
        }
        let idx = self.by_name[name];
        let route = &self.routes[idx];
        for var in &route.variables {
            if !values.contains_key(var) {
                return Err(RouterError::MissingValue(var.clone()));
            }
        }
        self.build(name, values)
            .ok_or_else(|| RouterError::MissingValue(route.template.clone()))
    }
}

fn encode_segment(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect::<String>().replace('+', "%20")
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        vec![]
    } else {
        trimmed.split('/').collect()
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>, RouterError> {
    let segs = split_path(template);
    let mut out = Vec::with_capacity(segs.len());
    for seg in segs {
        if let Some(inner) = seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(RouterError::MalformedTemplate(template.to_string()));
            }
            out.push(Segment::Variable(inner.to_string()));
        } else if seg.contains('{') || seg.contains('}') {
            return Err(RouterError::MalformedTemplate(template.to_string()));
        } else {
            out.push(Segment::Literal(seg.to_string()));
        }
    }
    Ok(out)
}

fn match_segments(segments: &[Segment], path: &[&str]) -> Option<HashMap<String, String>> {
    if segments.len() != path.len() {
        return None;
    }
    let mut values = HashMap::new();
    for (segment, actual) in segments.iter().zip(path.iter()) {
        match segment {
            Segment::Literal(lit) => {
                if lit != actual {
                    return None;
                }
            }
            Segment::Variable(name) => {
                let decoded = percent_decode(actual);
                values.insert(name.clone(), decoded);
            }
        }
    }
    Some(values)
}

fn percent_decode(s: &str) -> String {
    url::form_urlencoded::parse(format!("x={s}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| s.to_string())
}

/// The required variable shape for each registerable federation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceShape {
    /// Exactly zero variables (NodeInfo)
    Zero,
    /// Exactly `{handle}` (actor, outbox, following, followers, personal inbox)
    Handle,
    /// One or more variables (typed objects)
    NonEmpty,
}

impl SurfaceShape {
    /// Check that a just-parsed variable set matches this shape, for a route named `name`.
    pub fn check(self, name: &str, variables: &BTreeSet<String>) -> Result<(), RouterError> {
        let ok = match self {
            SurfaceShape::Zero => variables.is_empty(),
            SurfaceShape::Handle => variables.len() == 1 && variables.contains("handle"),
            SurfaceShape::NonEmpty => !variables.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            let expected = match self {
                SurfaceShape::Zero => vec![],
                SurfaceShape::Handle => vec!["handle".to_string()],
                SurfaceShape::NonEmpty => vec!["<non-empty>".to_string()],
            };
            Err(RouterError::VariableMismatch(
                name.to_string(),
                expected,
                variables.iter().cloned().collect(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_duplicate_name() {
        let mut router = Router::new();
        router.add("/users/{handle}", "actor").unwrap();
        let err = router.add("/other/{handle}", "actor").unwrap_err();
        assert_eq!(err, RouterError::DuplicateName("actor".to_string()));
    }

    #[test]
    fn add_rejects_malformed_template() {
        let mut router = Router::new();
        let err = router.add("/users/{handle", "actor").unwrap_err();
        assert!(matches!(err, RouterError::MalformedTemplate(_)));
    }

    #[test]
    fn round_trips_build_then_route() {
        let mut router = Router::new();
        router.add("/users/{handle}", "actor").unwrap();
        let mut values = HashMap::new();
        values.insert("handle".to_string(), "john".to_string());
        let path = router.build("actor", &values).unwrap();
        assert_eq!(path, "/users/john");
        let (name, values2) = router.route(&path).unwrap();
        assert_eq!(name, "actor");
        assert_eq!(values2.get("handle").unwrap(), "john");
    }

    #[test]
    fn build_missing_variable_is_none() {
        let mut router = Router::new();
        router.add("/users/{handle}", "actor").unwrap();
        assert!(router.build("actor", &HashMap::new()).is_none());
    }

    #[test]
    fn route_requires_exact_segment_count() {
        let mut router = Router::new();
        router.add("/users/{handle}/inbox", "inbox").unwrap();
        assert!(router.route("/users/john").is_none());
        assert!(router.route("/users/john/inbox/extra").is_none());
        assert!(router.route("/users/john/inbox").is_some());
    }

    #[test]
    fn trailing_slash_is_significant() {
        let mut router = Router::new();
        router.add("/users/{handle}", "actor").unwrap();
        assert!(router.route("/users/john/").is_none());
    }

    #[test]
    fn longest_match_wins() {
        let mut router = Router::new();
        router.add("/.well-known/nodeinfo", "nodeinfo-discovery").unwrap();
        router.add("/.well-known/webfinger", "webfinger").unwrap();
        let (name, _) = router.route("/.well-known/webfinger").unwrap();
        assert_eq!(name, "webfinger");
    }

    #[test]
    fn surface_shape_checks() {
        let mut vars = BTreeSet::new();
        assert!(SurfaceShape::Zero.check("nodeinfo", &vars).is_ok());
        vars.insert("handle".to_string());
        assert!(SurfaceShape::Handle.check("actor", &vars).is_ok());
        assert!(SurfaceShape::Zero.check("actor", &vars).is_err());
        assert!(SurfaceShape::NonEmpty.check("object", &vars).is_ok());
        assert!(SurfaceShape::NonEmpty
            .check("object", &BTreeSet::new())
            .is_err());
    }
}
