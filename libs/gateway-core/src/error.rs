/// Error taxonomy surfaced by the core.
///
/// `Transient` and `DeliveryFailed` are never returned to a REST caller; they
/// drive the retry engine and DLQ routing respectively and are logged/metered
/// at the point they occur.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("quota exceeded: tenant {tenant} has reached its subscription ceiling of {ceiling}")]
    QuotaExceeded { tenant: String, ceiling: u64 },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("delivery failed after retry exhaustion")]
    DeliveryFailed,

    #[error("transient error: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable, low-cardinality label for metrics (mirrors the taxonomy in
    /// spec §7, never includes caller-supplied content).
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound => "not_found",
            Error::AlreadyExists => "already_exists",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::DeliveryFailed => "delivery_failed",
            Error::Transient(_) => "transient",
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            Error::StorageUnavailable(Box::new(e))
        } else {
            Error::Transient(e.to_string())
        }
    }
}
