//! Muninn - in-process orchestration primitives for AI chat bots
//!
//! This crate provides the task orchestration and admission-control core
//! a conversational bot needs to stay responsive while the heavy lifting
//! happens in external AI backends: a bounded priority [`TaskQueue`]
//! drained by a fixed worker pool, a sliding-window [`RateLimiter`], an
//! in-memory [`ResponseCache`], a disk-backed [`VoiceModelCache`], and a
//! [`WebhookNotifier`] for outbound event fan-out.
//!
//! The backends themselves (LLMs, TTS, face processing) stay external:
//! the queue wraps them as opaque callables and records their outcome
//! per task, so one slow or failing call never stalls the rest of the
//! bot.
//!
//! # Task queue example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use muninn::{QueueConfig, TaskOperation, TaskOwner, TaskPriority, TaskQueue};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let queue = TaskQueue::new(QueueConfig::new().max_workers(2))?;
//!     queue.start();
//!
//!     let id = queue.add_task(
//!         "generate_reply",
//!         TaskOperation::from_async(|| async { Ok(json!("hello")) }),
//!         TaskPriority::Normal,
//!         TaskOwner::user(42),
//!     )?;
//!
//!     let reply = queue.wait_for_task(id, Duration::from_secs(30)).await;
//!     println!("{reply:?}");
//!
//!     queue.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Admission control + response cache example
//!
//! ```rust
//! use muninn::{CacheConfig, RateLimiter, RateLimiterConfig, ResponseCache};
//!
//! # fn main() -> muninn::Result<()> {
//! let limiter = RateLimiter::new(RateLimiterConfig::new().max_requests(30))?;
//! let cache: ResponseCache<String> = ResponseCache::new(CacheConfig::new())?;
//!
//! if limiter.is_allowed("user-42") {
//!     if let Some(reply) = cache.lookup("What is Muninn?", "user-42") {
//!         println!("cache hit: {reply}");
//!     } else {
//!         // ... call the backend, then:
//!         cache.store("What is Muninn?", "user-42", "Odin's raven".into());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod limiter;
pub mod queue;
pub mod telemetry;
pub mod webhook;

// Re-export main types at crate root
pub use cache::{
    CacheConfig, CacheStats, ResponseCache, VoiceCacheConfig, VoiceCacheStats, VoiceModelCache,
};
pub use error::{MuninnError, Result, TaskError};
pub use limiter::{RateLimiter, RateLimiterConfig};
pub use queue::{
    QueueConfig, QueueStats, Task, TaskOperation, TaskOwner, TaskPriority, TaskQueue, TaskStatus,
};
pub use webhook::{
    Notification, NotificationPriority, WebhookConfig, WebhookEndpoint, WebhookNotifier,
    WebhookStats,
};
