//! Inference service poll loop and state machine

use super::parse::{parse_catalog, parse_props, parse_slots, CatalogState, ModelProps};
use super::prom_text::parse_samples;
use crate::models::{InferenceSnapshot, InferenceStatus, SlotMetrics};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Period between poll cycles
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const HEALTH_TIMEOUT: Duration = Duration::from_secs(1);
const CATALOG_TIMEOUT: Duration = Duration::from_secs(10);
const SLOTS_TIMEOUT: Duration = Duration::from_secs(10);
const METRICS_TIMEOUT: Duration = Duration::from_secs(10);
const PROPS_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the inference service listens
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix placed in front of every endpoint, e.g. `/llama`
    pub api_prefix: String,
    pub api_key: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8081,
            api_prefix: String::new(),
            api_key: None,
        }
    }
}

impl InferenceConfig {
    pub fn base_url(&self) -> String {
        format!(
            "http://{}:{}{}",
            self.host,
            self.port,
            self.api_prefix.trim_end_matches('/')
        )
    }
}

/// Polls a llama.cpp-compatible server and keeps the latest snapshot
pub struct InferenceMonitor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    snapshot: RwLock<InferenceSnapshot>,
}

impl InferenceMonitor {
    pub fn new(config: &InferenceConfig) -> reqwest::Result<Self> {
        Self::with_base_url(config.base_url(), config.api_key.clone())
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            snapshot: RwLock::new(InferenceSnapshot::default()),
        })
    }

    /// Copy of the latest published snapshot
    pub async fn snapshot(&self) -> InferenceSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Poll until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(base_url = %self.base_url, "Starting inference service monitor");

        let mut ticker = interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down inference service monitor");
                    break;
                }
            }
        }
    }

    /// Run one poll cycle.
    ///
    /// A failed liveness probe publishes a fresh OFFLINE snapshot. A failed
    /// catalog query leaves the published snapshot untouched.
    pub async fn poll_once(&self) {
        let previous = self.snapshot().await;

        if self.get("/health", None, HEALTH_TIMEOUT).await.is_none() {
            self.publish(&previous, InferenceSnapshot::default()).await;
            return;
        }

        let Some(catalog) = self
            .get("/v1/models", None, CATALOG_TIMEOUT)
            .await
            .and_then(|body| parse_catalog(&body))
        else {
            debug!("Model catalog unavailable, keeping previous snapshot");
            return;
        };

        let next = match catalog {
            CatalogState::Idle => InferenceSnapshot {
                status: InferenceStatus::Idle,
                ..InferenceSnapshot::default()
            },
            CatalogState::Loading { model, progress } => InferenceSnapshot {
                status: InferenceStatus::Loading,
                model: Some(model),
                load_progress: progress,
                ..InferenceSnapshot::default()
            },
            CatalogState::Ready { model } => self.refresh_ready(&previous, model).await,
        };

        self.publish(&previous, next).await;
    }

    /// Build a READY snapshot on top of the previous one.
    ///
    /// Slots, metrics and props are fetched concurrently; each that fails
    /// leaves its fields at their previous values.
    async fn refresh_ready(&self, previous: &InferenceSnapshot, model: String) -> InferenceSnapshot {
        let mut next = if previous.status == InferenceStatus::Ready {
            previous.clone()
        } else {
            InferenceSnapshot::default()
        };
        next.status = InferenceStatus::Ready;
        next.load_progress = 1.0;
        next.model = Some(model.clone());

        let (slots, samples, props) = tokio::join!(
            self.fetch_slots(&model),
            self.fetch_metrics(&model),
            self.fetch_props(&model)
        );

        if let Some(slots) = slots {
            next.slots_total = slots.len();
            next.slots_used = slots.iter().filter(|s| s.is_busy()).count();
            next.slots = slots;
        }
        if let Some(samples) = samples {
            apply_samples(&mut next, &samples);
        }
        if let Some(props) = props {
            if let Some(alias) = props.model_alias {
                next.model = Some(alias);
            }
            if props.model_path.is_some() {
                next.model_path = props.model_path;
            }
            if let Some(n_ctx) = props.n_ctx {
                next.n_ctx = n_ctx;
            }
        }

        next
    }

    async fn fetch_slots(&self, model: &str) -> Option<Vec<SlotMetrics>> {
        let body = self.get("/slots", Some(model), SLOTS_TIMEOUT).await?;
        let slots = parse_slots(&body);
        if slots.is_none() {
            debug!("Unrecognized slots response");
        }
        slots
    }

    async fn fetch_metrics(&self, model: &str) -> Option<HashMap<String, f64>> {
        let body = self.get("/metrics", Some(model), METRICS_TIMEOUT).await?;
        Some(parse_samples(&body))
    }

    async fn fetch_props(&self, model: &str) -> Option<ModelProps> {
        let body = self.get("/props", Some(model), PROPS_TIMEOUT).await?;
        parse_props(&body)
    }

    /// GET an endpoint, returning the body only on a 2xx answer
    async fn get(&self, path: &str, model: Option<&str>, timeout: Duration) -> Option<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).timeout(timeout);
        if let Some(model) = model {
            request = request.query(&[("model", model)]);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Inference service request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(url = %url, status = %response.status(), "Inference service returned error");
            return None;
        }

        match response.text().await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!(url = %url, error = %e, "Failed to read inference service response");
                None
            }
        }
    }

    async fn publish(&self, previous: &InferenceSnapshot, next: InferenceSnapshot) {
        if previous.status != next.status {
            if next.status == InferenceStatus::Offline {
                warn!(
                    event = "inference_status",
                    from = %previous.status,
                    to = %next.status,
                    "Inference service went offline"
                );
            } else {
                info!(
                    event = "inference_status",
                    from = %previous.status,
                    to = %next.status,
                    model = ?next.model,
                    "Inference service status changed"
                );
            }
        }

        *self.snapshot.write().await = next;
    }
}

fn apply_samples(snapshot: &mut InferenceSnapshot, samples: &HashMap<String, f64>) {
    let get = |key: &str| {
        samples
            .get(&format!("llamacpp:{key}"))
            .copied()
            .unwrap_or(0.0)
    };
    let count = |key: &str| get(key).max(0.0) as u64;

    snapshot.prompt_tokens_total = count("prompt_tokens_total");
    snapshot.tokens_predicted_total = count("tokens_predicted_total");
    snapshot.prompt_seconds_total = get("prompt_seconds_total");
    snapshot.tokens_predicted_seconds_total = get("tokens_predicted_seconds_total");
    snapshot.n_decode_total = count("n_decode_total");
    snapshot.n_busy_slots_per_decode = get("n_busy_slots_per_decode");
    snapshot.prompt_tokens_seconds = get("prompt_tokens_seconds");
    snapshot.predicted_tokens_seconds = get("predicted_tokens_seconds");
    snapshot.kv_cache_usage_ratio = get("kv_cache_usage_ratio");
    snapshot.kv_cache_tokens = count("kv_cache_tokens");
    snapshot.requests_processing = count("requests_processing");
    snapshot.requests_deferred = count("requests_deferred");
    snapshot.n_tokens_max = count("n_tokens_max");
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const CATALOG_READY: &str = r#"{"data":[{"id":"qwen 2.5","status":{"value":"loaded"}}]}"#;
    const SLOTS: &str = r#"[{"id":0,"n_ctx":4096,"state":"processing","kv_cache":{"pos_max":99}},{"id":1,"n_ctx":4096,"state":"idle"}]"#;
    const METRICS: &str = "# TYPE llamacpp:prompt_tokens_total counter\nllamacpp:prompt_tokens_total 500\nllamacpp:requests_processing 1\n";
    const PROPS: &str = r#"{"model_alias":"coder","model_path":"/models/qwen.gguf","n_ctx":4096}"#;

    fn model_query() -> Matcher {
        Matcher::UrlEncoded("model".into(), "qwen 2.5".into())
    }

    async fn ready_server() -> (mockito::ServerGuard, Vec<mockito::Mock>) {
        let mut server = Server::new_async().await;
        let mocks = vec![
            server.mock("GET", "/health").with_status(200).with_body("{\"status\":\"ok\"}").create_async().await,
            server.mock("GET", "/v1/models").with_status(200).with_body(CATALOG_READY).create_async().await,
            server.mock("GET", "/slots").match_query(model_query()).with_status(200).with_body(SLOTS).create_async().await,
            server.mock("GET", "/metrics").match_query(model_query()).with_status(200).with_body(METRICS).create_async().await,
            server.mock("GET", "/props").match_query(model_query()).with_status(200).with_body(PROPS).create_async().await,
        ];
        (server, mocks)
    }

    #[tokio::test]
    async fn test_ready_cycle_populates_snapshot() {
        let (server, _mocks) = ready_server().await;
        let monitor = InferenceMonitor::with_base_url(server.url(), None).unwrap();

        monitor.poll_once().await;
        let snapshot = monitor.snapshot().await;

        assert_eq!(snapshot.status, InferenceStatus::Ready);
        assert_eq!(snapshot.model.as_deref(), Some("coder"));
        assert_eq!(snapshot.model_path.as_deref(), Some("/models/qwen.gguf"));
        assert_eq!(snapshot.n_ctx, 4096);
        assert_eq!(snapshot.slots_total, 2);
        assert_eq!(snapshot.slots_used, 1);
        assert_eq!(snapshot.slots[0].tokens_cached, 100);
        assert_eq!(snapshot.prompt_tokens_total, 500);
        assert_eq!(snapshot.requests_processing, 1);
        assert_eq!(snapshot.load_progress, 1.0);
    }

    #[tokio::test]
    async fn test_liveness_failure_resets_to_offline() {
        let (mut server, mocks) = ready_server().await;
        let monitor = InferenceMonitor::with_base_url(server.url(), None).unwrap();
        monitor.poll_once().await;
        assert_eq!(monitor.snapshot().await.status, InferenceStatus::Ready);

        let mut mocks = mocks.into_iter();
        if let Some(health) = mocks.next() {
            health.remove_async().await;
        }
        let _down = server.mock("GET", "/health").with_status(503).create_async().await;

        monitor.poll_once().await;
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot, InferenceSnapshot::default());
        assert_eq!(snapshot.model, None);
    }

    #[tokio::test]
    async fn test_catalog_failure_keeps_previous_snapshot() {
        let (mut server, mocks) = ready_server().await;
        let monitor = InferenceMonitor::with_base_url(server.url(), None).unwrap();
        monitor.poll_once().await;
        let before = monitor.snapshot().await;

        let mut mocks = mocks.into_iter();
        let _health = mocks.next();
        if let Some(catalog) = mocks.next() {
            catalog.remove_async().await;
        }
        let _busy = server.mock("GET", "/v1/models").with_status(500).create_async().await;

        monitor.poll_once().await;
        assert_eq!(monitor.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_unparseable_catalog_keeps_previous_snapshot() {
        let mut server = Server::new_async().await;
        let _health = server.mock("GET", "/health").with_status(200).create_async().await;
        let _catalog = server.mock("GET", "/v1/models").with_status(200).with_body("loading...").create_async().await;

        let monitor = InferenceMonitor::with_base_url(server.url(), None).unwrap();
        monitor.poll_once().await;
        assert_eq!(monitor.snapshot().await, InferenceSnapshot::default());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_ready_and_prior_fields() {
        let (mut server, mocks) = ready_server().await;
        let monitor = InferenceMonitor::with_base_url(server.url(), None).unwrap();
        monitor.poll_once().await;

        // Slots and props start failing, metrics keep answering with new counts
        let mut mocks = mocks.into_iter();
        let _health = mocks.next();
        let _catalog = mocks.next();
        if let Some(slots) = mocks.next() {
            slots.remove_async().await;
        }
        if let Some(metrics) = mocks.next() {
            metrics.remove_async().await;
        }
        if let Some(props) = mocks.next() {
            props.remove_async().await;
        }
        let _slots = server.mock("GET", "/slots").match_query(Matcher::Any).with_status(503).create_async().await;
        let _props = server.mock("GET", "/props").match_query(Matcher::Any).with_status(503).create_async().await;
        let _metrics = server
            .mock("GET", "/metrics")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("llamacpp:prompt_tokens_total 900\n")
            .create_async()
            .await;

        monitor.poll_once().await;
        let snapshot = monitor.snapshot().await;

        assert_eq!(snapshot.status, InferenceStatus::Ready);
        assert_eq!(snapshot.slots_total, 2);
        assert_eq!(snapshot.model_path.as_deref(), Some("/models/qwen.gguf"));
        assert_eq!(snapshot.n_ctx, 4096);
        assert_eq!(snapshot.prompt_tokens_total, 900);
        // Without props the catalog id is shown
        assert_eq!(snapshot.model.as_deref(), Some("qwen 2.5"));
    }

    #[tokio::test]
    async fn test_loading_and_idle() {
        let mut server = Server::new_async().await;
        let _health = server.mock("GET", "/health").with_status(200).create_async().await;
        let loading = server
            .mock("GET", "/v1/models")
            .with_status(200)
            .with_body(r#"{"data":[{"id":"big","status":{"value":"loading","load_progress":0.5}}]}"#)
            .create_async()
            .await;

        let monitor = InferenceMonitor::with_base_url(server.url(), None).unwrap();
        monitor.poll_once().await;
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.status, InferenceStatus::Loading);
        assert_eq!(snapshot.model.as_deref(), Some("big"));
        assert_eq!(snapshot.load_progress, 0.5);

        loading.remove_async().await;
        let _idle = server
            .mock("GET", "/v1/models")
            .with_status(200)
            .with_body(r#"{"data":[{"id":"big","status":{"value":"unloaded"}}]}"#)
            .create_async()
            .await;

        monitor.poll_once().await;
        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot.status, InferenceStatus::Idle);
        assert_eq!(snapshot.model, None);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_offline() {
        let monitor = InferenceMonitor::with_base_url("http://127.0.0.1:1", None).unwrap();
        monitor.poll_once().await;
        assert_eq!(monitor.snapshot().await.status, InferenceStatus::Offline);
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let mut server = Server::new_async().await;
        let health = server
            .mock("GET", "/health")
            .match_header("authorization", "Bearer sekrit")
            .with_status(200)
            .create_async()
            .await;
        let _catalog = server.mock("GET", "/v1/models").with_status(200).with_body(r#"{"data":[]}"#).create_async().await;

        let monitor = InferenceMonitor::with_base_url(server.url(), Some("sekrit".to_string())).unwrap();
        monitor.poll_once().await;

        health.assert_async().await;
        assert_eq!(monitor.snapshot().await.status, InferenceStatus::Idle);
    }

    #[test]
    fn test_base_url() {
        let config = InferenceConfig {
            host: "gpu-box".to_string(),
            port: 9000,
            api_prefix: "/llama/".to_string(),
            api_key: None,
        };
        assert_eq!(config.base_url(), "http://gpu-box:9000/llama");
        assert_eq!(InferenceConfig::default().base_url(), "http://localhost:8081");
    }
}
