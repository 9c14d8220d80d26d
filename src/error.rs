//! Error messages returned by this library

use url::Url;

/// Error messages returned by this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A dispatcher returned `None`, meaning the resource does not exist
    #[error("Object was not found")]
    NotFound,
    /// An `authorize` predicate returned `false`
    #[error("Request was not authorized")]
    Unauthorized,
    /// The request's `Accept` header did not contain an ActivityStreams-compatible media type
    #[error("Accept header is not ActivityStreams-compatible")]
    NotAcceptable,
    /// Incoming activity has an invalid or missing HTTP Signature
    #[error("Activity signature is missing or invalid")]
    SignatureInvalid,
    /// An outbound activity was sent without an `actor` field
    #[error("activity is missing required `actor` field")]
    ActivityMissingActor,
    /// A malformed request body or query parameter: unparseable inbox body, bad
    /// `Content-Type`, malformed WebFinger `resource`
    #[error("{0}")]
    BadRequest(String),
    /// A surface was requested with an HTTP method it does not support (e.g. `GET /inbox`)
    #[error("Method not allowed on this route")]
    MethodNotAllowed,
    /// `on_inbox` was called twice for the same activity class
    #[error("inbox listener for activity class `{0}` is already registered")]
    DuplicateInboxListener(String),
    /// A route was requested with a value missing for one of its template variables
    #[error(transparent)]
    Router(#[from] RouterError),
    /// Failed to fetch a remote document
    #[error("Failed to fetch remote document {0}: {1}")]
    FetchFailed(Url, String),
    /// Failed to (de)serialize a JSON-LD document
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Failed to parse or build a URL
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Outgoing HTTP request failed
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Outgoing HTTP request failed somewhere in middleware
    #[error(transparent)]
    ReqwestMiddleware(#[from] reqwest_middleware::Error),
    /// Any other error raised by a dispatcher or callback
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn other<T>(error: T) -> Self
    where
        T: Into<anyhow::Error>,
    {
        Error::Other(error.into())
    }
}

/// Errors raised by [`crate::router::Router`] registration or reverse-building
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Registering a route whose name is already taken
    #[error("route name `{0}` is already registered")]
    DuplicateName(String),
    /// The URI template could not be parsed
    #[error("malformed URI template `{0}`")]
    MalformedTemplate(String),
    /// A surface was registered with a template whose variable set does not match what the
    /// surface requires
    #[error("route `{0}` requires template variables {1:?}, found {2:?}")]
    VariableMismatch(String, Vec<String>, Vec<String>),
    /// No dispatcher has been registered for the given surface
    #[error("no dispatcher registered for `{0}`")]
    NotRegistered(&'static str),
    /// A variable required to build a path was missing from the supplied values
    #[error("missing value for route variable `{0}`")]
    MissingValue(String),
    /// The route name is not known to the router
    #[error("no such route `{0}`")]
    UnknownRoute(String),
}
