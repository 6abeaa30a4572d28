//! Muninn error types

/// Muninn error types
///
/// Expected misses and admission denials are ordinary return values
/// (`Option` / `bool`), never errors. This enum is reserved for genuinely
/// exceptional conditions: invalid configuration, resource exhaustion,
/// and I/O failures that cannot be self-healed.
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    /// The task queue already holds `capacity` pending tasks.
    ///
    /// Raised (not silently dropped) so that every accepted task is
    /// guaranteed to eventually reach a terminal state.
    #[error("task queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Webhook delivery transport failure. Recorded per attempt inside
    /// the drain loop; never propagated out of it.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The component is not running and cannot accept the operation.
    #[error("component is not running")]
    Shutdown,
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;

/// Opaque failure type a wrapped task operation may signal.
///
/// The queue does not interpret it beyond stringifying it into the
/// task's error field.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;
