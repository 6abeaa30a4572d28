//! Outbound webhook notification fan-out.
//!
//! [`WebhookNotifier`] accepts notifications onto an unbounded in-memory
//! queue (never blocking the caller) and drains them one at a time on a
//! single background loop. Each notification fans out concurrently to
//! every enabled endpoint; per-endpoint failures are retried with a
//! linearly increasing backoff up to the endpoint's configured count and
//! then abandoned. One endpoint exhausting its retries never blocks
//! delivery to other endpoints or subsequent notifications.
//!
//! Notifications are ephemeral: they are not persisted and not retried
//! across process restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::telemetry;
use crate::{MuninnError, Result};

/// One configured delivery target.
///
/// ```rust
/// # use muninn::WebhookEndpoint;
/// # use std::time::Duration;
/// let endpoint = WebhookEndpoint::new("ops", "https://example.com/hooks/ops")
///     .timeout(Duration::from_secs(5))
///     .retry_count(2)
///     .header("authorization", "Bearer token");
/// ```
#[derive(Debug, Clone)]
pub struct WebhookEndpoint {
    /// Human-readable endpoint name, used in logs and stats.
    pub name: String,
    pub url: String,
    /// Per-attempt request timeout. Default: 10s.
    pub timeout: Duration,
    /// Retries after the initial attempt. Default: 2.
    pub retry_count: u32,
    /// Extra headers sent with every delivery.
    pub headers: HashMap<String, String>,
    /// Disabled endpoints are skipped entirely. Default: enabled.
    pub enabled: bool,
}

impl WebhookEndpoint {
    /// Create an endpoint with default timeout and retry settings.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            timeout: Duration::from_secs(10),
            retry_count: 2,
            headers: HashMap::new(),
            enabled: true,
        }
    }

    /// Set the per-attempt request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retries after the initial attempt.
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n;
        self
    }

    /// Add a header sent with every delivery.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Enable or disable the endpoint.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate field ranges, returning one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.url.is_empty() {
            errors.push(format!("endpoint '{}': url must not be empty", self.name));
        }
        if self.timeout.is_zero() {
            errors.push(format!(
                "endpoint '{}': timeout must be greater than zero",
                self.name
            ));
        }
        errors
    }
}

/// Configuration for the notifier: its endpoints and retry pacing.
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Delivery targets. May be empty (notifications are then dropped
    /// after dequeue).
    pub endpoints: Vec<WebhookEndpoint>,
    /// Base backoff delay; attempt `n` waits `base * n` before retrying.
    /// Default: 500ms.
    pub retry_base_delay: Duration,
}

impl WebhookConfig {
    /// Create a config with no endpoints and the default backoff base.
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
            retry_base_delay: Duration::from_millis(500),
        }
    }

    /// Add a delivery target.
    pub fn endpoint(mut self, endpoint: WebhookEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Set the base backoff delay between retry attempts.
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Validate all endpoints, returning one message per violation.
    pub fn validate(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .flat_map(WebhookEndpoint::validate)
            .collect()
    }
}

/// Notification urgency tag, carried in the delivery body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// One queued notification.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub priority: NotificationPriority,
    pub created_at: SystemTime,
}

impl Notification {
    /// JSON body sent to every endpoint.
    fn body(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "event_type": self.event_type,
            "priority": self.priority,
            "payload": self.payload,
            "created_at": self
                .created_at
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        })
    }
}

/// Aggregate delivery statistics, as returned by
/// [`WebhookNotifier::get_webhook_stats`].
#[derive(Debug, Clone)]
pub struct WebhookStats {
    /// Notifications waiting in the queue.
    pub queued: usize,
    /// Configured endpoints (enabled or not).
    pub endpoints: usize,
    /// Notifications dequeued and fanned out.
    pub total_notifications: u64,
    /// Per-endpoint deliveries that succeeded.
    pub delivered: u64,
    /// Per-endpoint deliveries abandoned after exhausting retries.
    pub failed: u64,
}

struct NotifierInner {
    endpoints: Vec<WebhookEndpoint>,
    client: reqwest::Client,
    base_delay: Duration,
    queued: AtomicUsize,
    total_notifications: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Unbounded notification queue with a single background drain loop.
pub struct WebhookNotifier {
    inner: Arc<NotifierInner>,
    sender: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
    token: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl WebhookNotifier {
    /// Create a notifier, validating every configured endpoint.
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(MuninnError::Configuration(errors.join("; ")));
        }
        Ok(Self {
            inner: Arc::new(NotifierInner {
                endpoints: config.endpoints,
                client: reqwest::Client::new(),
                base_delay: config.retry_base_delay,
                queued: AtomicUsize::new(0),
                total_notifications: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            sender: Mutex::new(None),
            drain: Mutex::new(None),
            token: Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the drain loop. Idempotent: a no-op while already running.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context (called within an async fn).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        *self.sender.lock() = Some(tx);
        *self.token.lock() = token.clone();
        *self.drain.lock() = Some(tokio::spawn(drain_loop(
            Arc::clone(&self.inner),
            rx,
            token,
        )));
        debug!("webhook drain loop started");
    }

    /// Stop the drain loop and wait for it to wind down.
    ///
    /// A notification whose fan-out is in flight is delivered; anything
    /// still queued is dropped (notifications are ephemeral). Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.sender.lock() = None;
        self.token.lock().cancel();
        let handle = self.drain.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // The undrained backlog is dropped with the receiver; the queued
        // counter must not keep counting it.
        self.inner.queued.store(0, Ordering::SeqCst);
        debug!("webhook drain loop stopped");
    }

    /// Enqueue a notification for delivery. Never waits for delivery.
    ///
    /// Fails with [`MuninnError::Shutdown`] if the notifier is not
    /// running.
    pub fn send_notification(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        priority: NotificationPriority,
    ) -> Result<Uuid> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(MuninnError::Shutdown);
        };

        let notification = Notification {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            priority,
            created_at: SystemTime::now(),
        };
        let id = notification.id;
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        sender
            .send(notification)
            .map_err(|_| MuninnError::Shutdown)?;
        Ok(id)
    }

    /// Aggregate statistics snapshot.
    pub fn get_webhook_stats(&self) -> WebhookStats {
        WebhookStats {
            queued: self.inner.queued.load(Ordering::SeqCst),
            endpoints: self.inner.endpoints.len(),
            total_notifications: self.inner.total_notifications.load(Ordering::SeqCst),
            delivered: self.inner.delivered.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
        }
    }
}

/// Drain one notification at a time; fan out concurrently per endpoint.
async fn drain_loop(
    inner: Arc<NotifierInner>,
    mut rx: mpsc::UnboundedReceiver<Notification>,
    token: CancellationToken,
) {
    loop {
        let notification = tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(notification) => notification,
                None => break,
            },
        };

        inner.queued.fetch_sub(1, Ordering::SeqCst);
        inner.total_notifications.fetch_add(1, Ordering::SeqCst);

        let body = notification.body();
        let deliveries = inner
            .endpoints
            .iter()
            .filter(|endpoint| endpoint.enabled)
            .map(|endpoint| deliver_to_endpoint(&inner, endpoint, &body));
        join_all(deliveries).await;
    }
}

/// Deliver one notification to one endpoint with bounded retries.
///
/// Attempt `n` (1-indexed retries) waits `base_delay * n` first, so the
/// backoff grows linearly. Exhaustion is recorded and the delivery is
/// abandoned; the caller's fan-out proceeds regardless.
async fn deliver_to_endpoint(inner: &NotifierInner, endpoint: &WebhookEndpoint, body: &Value) {
    for attempt in 0..=endpoint.retry_count {
        if attempt > 0 {
            tokio::time::sleep(inner.base_delay * attempt).await;
            metrics::counter!(telemetry::WEBHOOK_RETRIES_TOTAL).increment(1);
        }

        match post_once(inner, endpoint, body).await {
            Ok(()) => {
                inner.delivered.fetch_add(1, Ordering::SeqCst);
                metrics::counter!(telemetry::WEBHOOK_DELIVERIES_TOTAL, "status" => "ok")
                    .increment(1);
                debug!(endpoint = %endpoint.name, attempt, "webhook delivered");
                return;
            }
            Err(e) => {
                warn!(
                    endpoint = %endpoint.name,
                    attempt = attempt + 1,
                    max_attempts = endpoint.retry_count + 1,
                    error = %e,
                    "webhook delivery attempt failed"
                );
            }
        }
    }

    inner.failed.fetch_add(1, Ordering::SeqCst);
    metrics::counter!(telemetry::WEBHOOK_DELIVERIES_TOTAL, "status" => "error").increment(1);
}

async fn post_once(
    inner: &NotifierInner,
    endpoint: &WebhookEndpoint,
    body: &Value,
) -> Result<()> {
    let mut request = inner
        .client
        .post(&endpoint.url)
        .timeout(endpoint.timeout)
        .json(body);
    for (name, value) in &endpoint.headers {
        request = request.header(name, value);
    }

    let response = request
        .send()
        .await
        .map_err(|e| MuninnError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(MuninnError::Http(format!(
            "endpoint '{}' returned {}",
            endpoint.name,
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_validation() {
        let errors = WebhookEndpoint::new("bad", "")
            .timeout(Duration::ZERO)
            .validate();
        assert_eq!(errors.len(), 2);

        assert!(
            WebhookEndpoint::new("ok", "https://example.com/hook")
                .validate()
                .is_empty()
        );
    }

    #[test]
    fn notification_body_shape() {
        let n = Notification {
            id: Uuid::new_v4(),
            event_type: "task_completed".into(),
            payload: json!({"task": "tts"}),
            priority: NotificationPriority::High,
            created_at: SystemTime::now(),
        };
        let body = n.body();
        assert_eq!(body["event_type"], "task_completed");
        assert_eq!(body["priority"], "high");
        assert_eq!(body["payload"]["task"], "tts");
        assert!(body["created_at"].is_u64());
    }

    #[test]
    fn send_before_start_is_rejected() {
        let notifier = WebhookNotifier::new(WebhookConfig::new()).unwrap();
        let result =
            notifier.send_notification("event", json!({}), NotificationPriority::Normal);
        assert!(matches!(result, Err(MuninnError::Shutdown)));
    }
}
