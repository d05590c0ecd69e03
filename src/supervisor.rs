//! Engine Supervisor: ensures the right engine variant is live, serializes
//! transitions, and tears engines down on idle timeout or crash.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::{EngineKind, Model, ServerConfig, Variant};
use crate::engine::{EngineClient, LlamaEngineClient};
use crate::error::{Error, Result};
use crate::process::EngineProcess;

struct RunningEngine {
    model_name: String,
    variant_binary: String,
    variant_args: Vec<String>,
    connect_url: String,
    client: Arc<dyn EngineClient>,
    last_activity: Instant,
    generation: u64,
    stop_tx: oneshot::Sender<()>,
    monitor_handle: JoinHandle<()>,
}

impl RunningEngine {
    fn matches(&self, model: &Model, variant: &Variant, connect_url: &str) -> bool {
        self.model_name == model.name
            && self.variant_binary == variant.binary
            && self.variant_args == variant.args
            && self.connect_url == connect_url
    }
}

struct SupervisorState {
    current: Option<RunningEngine>,
    generation: u64,
}

struct Inner {
    server_config: ServerConfig,
    state: Mutex<SupervisorState>,
}

/// Cheaply cloneable handle; the supervisor lock lives inside the shared
/// `Inner` so background tasks (idle timer, crash watcher) can reach it.
#[derive(Clone)]
pub struct Supervisor(Arc<Inner>);

impl Supervisor {
    pub fn new(server_config: ServerConfig) -> Self {
        Self(Arc::new(Inner {
            server_config,
            state: Mutex::new(SupervisorState {
                current: None,
                generation: 0,
            }),
        }))
    }

    /// Makes `variant` the unique live engine for `model`, returning its
    /// client. Serializes with any other in-flight transition.
    pub async fn ensure(&self, model: &Model, variant: &Variant) -> Result<Arc<dyn EngineClient>> {
        let connect_url = variant.connect_url(model);
        let health_timeout = model.health_check_timeout(&self.0.server_config);
        let mut state = self.0.state.lock().await;

        if let Some(current) = state.current.as_mut() {
            if current.matches(model, variant, &connect_url) && current.client.check_health(health_timeout).await {
                current.last_activity = Instant::now();
                return Ok(current.client.clone());
            }
        }

        if let Some(old) = state.current.take() {
            state.generation += 1;
            tracing::info!(model = %old.model_name, "tearing down engine for variant switch");
            let _ = old.stop_tx.send(());
            let _ = old.monitor_handle.await;
        }

        state.generation += 1;
        let generation = state.generation;
        let engine = self.bring_up(model, variant, connect_url, generation).await?;
        let client = engine.client.clone();
        state.current = Some(engine);
        Ok(client)
    }

    async fn bring_up(
        &self,
        model: &Model,
        variant: &Variant,
        connect_url: String,
        generation: u64,
    ) -> Result<RunningEngine> {
        let mut process = EngineProcess::spawn(&variant.binary, &variant.args)?;

        let sideload = matches!(model.engine_type, EngineKind::LlamaCppSideload);
        let client: Arc<dyn EngineClient> = Arc::new(LlamaEngineClient::new(
            connect_url.clone(),
            sideload,
            self.0.server_config.default_max_tokens_reservation,
        ));

        let health_timeout = model.health_check_timeout(&self.0.server_config);
        let startup_timeout = model.engine_startup_timeout(&self.0.server_config);
        let start = Instant::now();

        loop {
            if client.check_health(health_timeout).await {
                break;
            }
            if process.has_exited() {
                process.stop().await;
                return Err(Error::EngineCrashed(format!(
                    "engine process for {} exited during startup",
                    model.name
                )));
            }
            if start.elapsed() >= startup_timeout {
                process.stop().await;
                return Err(Error::EngineStartupTimeout(startup_timeout));
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }

        tracing::info!(model = %model.name, elapsed = ?start.elapsed(), "engine ready");

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor_handle = tokio::spawn(monitor_process(process, stop_rx, self.clone(), generation));

        let idle_timeout = model.engine_idle_timeout(&self.0.server_config);
        tokio::spawn(idle_watcher(self.clone(), generation, idle_timeout));

        Ok(RunningEngine {
            model_name: model.name.clone(),
            variant_binary: variant.binary.clone(),
            variant_args: variant.args.clone(),
            connect_url,
            client,
            last_activity: Instant::now(),
            generation,
            stop_tx,
            monitor_handle,
        })
    }

    /// Updates `last_activity` for the currently-live engine, if any. A
    /// no-op if the request's engine has since been torn down.
    pub async fn touch_activity(&self) {
        let mut state = self.0.state.lock().await;
        if let Some(current) = state.current.as_mut() {
            current.last_activity = Instant::now();
        }
    }

    pub async fn current_model_name(&self) -> Option<String> {
        let state = self.0.state.lock().await;
        state.current.as_ref().map(|c| c.model_name.clone())
    }

    /// True if the live engine serves `model_name` and its client supports
    /// online tokenization, used by the selector to decide estimator path.
    pub async fn online_client_for(&self, model_name: &str) -> Option<Arc<dyn EngineClient>> {
        let state = self.0.state.lock().await;
        state.current.as_ref().and_then(|c| {
            if c.model_name == model_name && c.client.supports_online_tokenization() {
                Some(c.client.clone())
            } else {
                None
            }
        })
    }

    /// Idempotent: tears down the live engine, if any.
    pub async fn shutdown(&self) {
        let mut state = self.0.state.lock().await;
        if let Some(current) = state.current.take() {
            state.generation += 1;
            let _ = current.stop_tx.send(());
            let _ = current.monitor_handle.await;
        }
    }
}

async fn monitor_process(
    mut process: EngineProcess,
    stop_rx: oneshot::Receiver<()>,
    supervisor: Supervisor,
    generation: u64,
) {
    tokio::select! {
        _ = stop_rx => {
            process.stop().await;
        }
        result = process.wait() => {
            let mut state = supervisor.0.state.lock().await;
            if state.generation == generation {
                tracing::error!(?result, "engine process exited unexpectedly");
                state.current = None;
                state.generation += 1;
            }
        }
    }
}

async fn idle_watcher(supervisor: Supervisor, generation: u64, idle_timeout: std::time::Duration) {
    loop {
        tokio::time::sleep(idle_timeout).await;
        let mut state = supervisor.0.state.lock().await;
        let Some(current) = state.current.as_ref() else { return };
        if current.generation != generation {
            return;
        }
        let elapsed = current.last_activity.elapsed();
        if elapsed < idle_timeout {
            drop(state);
            tokio::time::sleep(idle_timeout - elapsed).await;
            continue;
        }
        let engine = state.current.take().unwrap();
        state.generation += 1;
        drop(state);
        tracing::info!(model = %engine.model_name, "tearing down idle engine");
        let _ = engine.stop_tx.send(());
        let _ = engine.monitor_handle.await;
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Variant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_config() -> ServerConfig {
        ServerConfig {
            engine_startup_timeout_secs: 3,
            ..Default::default()
        }
    }

    fn sleeper_model(name: &str) -> Model {
        Model {
            name: name.to_string(),
            engine_type: EngineKind::LlamaCpp,
            connect: None,
            tokenization: None,
            health_check_timeout_secs: None,
            engine_startup_timeout_secs: Some(1),
            engine_idle_timeout_secs: None,
            variants: vec![Variant {
                binary: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "sleep 30".to_string()],
                context: 4096,
                connect: Some("http://127.0.0.1:1".to_string()),
                health_check_timeout_secs: None,
                engine_startup_timeout_secs: None,
                engine_idle_timeout_secs: None,
            }],
        }
    }

    /// A model whose variant's "engine" is a short-lived `/bin/sh` process
    /// paired with a mock HTTP server standing in for its `/health` and
    /// `/v1/models` endpoints, so `ensure` can succeed without a real
    /// `llama-server` binary.
    fn healthy_model(name: &str, connect_url: String, idle_timeout_secs: Option<u64>) -> Model {
        Model {
            name: name.to_string(),
            engine_type: EngineKind::LlamaCpp,
            connect: None,
            tokenization: None,
            health_check_timeout_secs: None,
            engine_startup_timeout_secs: Some(2),
            engine_idle_timeout_secs: idle_timeout_secs,
            variants: vec![Variant {
                binary: "/bin/sh".to_string(),
                args: vec!["-c".to_string(), "sleep 30".to_string()],
                context: 4096,
                connect: Some(connect_url),
                health_check_timeout_secs: None,
                engine_startup_timeout_secs: None,
                engine_idle_timeout_secs: None,
            }],
        }
    }

    #[tokio::test]
    async fn ensure_fails_with_startup_timeout_when_health_never_passes() {
        let supervisor = Supervisor::new(server_config());
        let model = sleeper_model("never-healthy");
        let variant = &model.variants[0];
        let result = supervisor.ensure(&model, variant).await;
        assert!(matches!(result, Err(Error::EngineStartupTimeout(_))));
        assert!(supervisor.current_model_name().await.is_none());
    }

    #[tokio::test]
    async fn ensure_with_matching_variant_reuses_client_instead_of_restarting() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let supervisor = Supervisor::new(server_config());
        let model = healthy_model("qwen3-30b", mock_server.uri(), None);
        let variant = &model.variants[0];

        let first = supervisor.ensure(&model, variant).await.unwrap();
        let second = supervisor.ensure(&model, variant).await.unwrap();

        // Same underlying client instance: `bring_up` (and thus a fresh
        // process spawn) never ran for the second call.
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(supervisor.current_model_name().await.as_deref(), Some("qwen3-30b"));
    }

    #[tokio::test]
    async fn idle_engine_is_torn_down_after_timeout() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let supervisor = Supervisor::new(server_config());
        let model = healthy_model("qwen3-30b", mock_server.uri(), Some(1));
        let variant = &model.variants[0];

        supervisor.ensure(&model, variant).await.unwrap();
        assert_eq!(supervisor.current_model_name().await.as_deref(), Some("qwen3-30b"));

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(supervisor.current_model_name().await.is_none());
    }
}
