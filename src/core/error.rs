use thiserror::Error;

/// Centralized error types for the application
///
/// All errors inside the request path are converted to this enum. User-facing
/// text is never taken from these variants directly; it always goes through
/// the template mapper in `telegram::messages`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Redis / key-value store errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Telemetry store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Provider / download errors (raw provider text, for logs and telemetry)
    #[error("Download error: {0}")]
    Download(String),

    /// HTTP errors (short-link resolution, provider APIs, CDN fetches)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Validation errors (malformed input, unsupported host)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Per-user concurrency cap reached; the request is rejected, not queued
    #[error("User download slot unavailable")]
    SlotUnavailable,

    /// Gate required subscription proof and the user has none.
    /// The gate service has already rendered its own prompt.
    #[error("Blocked by subscription gate")]
    GateBlocked,

    /// File exceeds the hard upload ceiling
    #[error("File too large: {0} bytes")]
    SizeExceeded(u64),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Download(err)
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Download(err.to_string())
    }
}

impl AppError {
    /// Error category for logs and the failure telemetry row.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Redis(_) => "redis",
            AppError::Database(_) => "database",
            AppError::Telegram(_) => "telegram_api",
            AppError::Download(_) => "download",
            AppError::Http(_) => "http",
            AppError::Io(_) => "io",
            AppError::Url(_) => "url_parsing",
            AppError::Validation(_) => "validation",
            AppError::SlotUnavailable => "slot",
            AppError::GateBlocked => "gate",
            AppError::SizeExceeded(_) => "size",
        }
    }
}
