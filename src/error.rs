use thiserror::Error;

/// Typed errors returned by the business-logic layer.
///
/// The service layer inspects these values to decide whether to trigger
/// elicitation workflows; the tool layer converts them into the
/// `{status:"error", error:<msg>}` envelope. Callers must rely on the
/// variants rather than string comparison.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to get token from request context: missing value")]
    MissingToken,

    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("namespace is empty in token claims")]
    EmptyNamespaceClaim,

    /// The namespace derived from the request context has no connectors
    /// registered.
    #[error("namespace not found")]
    NamespaceNotFound,

    /// The requested connector name is missing in the namespace map.
    #[error("connector not found")]
    ConnectorNotFound,

    #[error("{0}")]
    Validation(String),

    /// User rejected an elicit, a pending entry is missing, or the
    /// interaction was cancelled.
    #[error("{0}")]
    Interaction(String),

    #[error("secret store: {0}")]
    Secret(String),

    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Both not-found kinds are treated uniformly by the recoverable
    /// elicit-and-retry path.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NamespaceNotFound | Self::ConnectorNotFound)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
