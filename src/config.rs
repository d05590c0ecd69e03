//! Configuration tree for the gateway.
//!
//! The merging/validation algorithm for the on-disk format is an external
//! concern; this module loads whatever a `config.toml` + environment
//! overrides produce and exposes the validated, normalized in-memory tree
//! the rest of the crate consumes.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub models: Vec<Model>,
}

/// A bind target: a single endpoint, a list of endpoints, or explicitly
/// disabled (`"none"`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum BindAddr {
    None(BindNone),
    Single(String),
    List(Vec<String>),
}

/// Sentinel marker so `"none"` deserializes distinctly from an arbitrary
/// single-endpoint string; only matches the literal `"none"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindNone;

impl<'de> serde::de::Deserialize<'de> for BindNone {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "none" {
            Ok(BindNone)
        } else {
            Err(serde::de::Error::custom("expected literal \"none\""))
        }
    }
}

impl BindAddr {
    pub fn endpoints(&self) -> Vec<String> {
        match self {
            BindAddr::None(_) => vec![],
            BindAddr::Single(s) => vec![s.clone()],
            BindAddr::List(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_none")]
    pub bind_v4: BindAddr,
    #[serde(default = "default_bind_none")]
    pub bind_v6: BindAddr,
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
    #[serde(default = "default_engine_startup_timeout_secs")]
    pub engine_startup_timeout_secs: u64,
    #[serde(default = "default_engine_idle_timeout_secs")]
    pub engine_idle_timeout_secs: u64,
    #[serde(default)]
    pub dumps_dir: Option<String>,
    #[serde(default)]
    pub purge_dumps_on_start: bool,
    /// Token reservation assumed for a request that omits `max_tokens`.
    #[serde(default = "default_max_tokens_reservation")]
    pub default_max_tokens_reservation: u32,
    #[serde(default = "default_safety_absolute")]
    pub safety_absolute: u32,
    #[serde(default = "default_safety_fraction")]
    pub safety_fraction: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_v4: default_bind_none(),
            bind_v6: default_bind_none(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            engine_startup_timeout_secs: default_engine_startup_timeout_secs(),
            engine_idle_timeout_secs: default_engine_idle_timeout_secs(),
            dumps_dir: None,
            purge_dumps_on_start: false,
            default_max_tokens_reservation: default_max_tokens_reservation(),
            safety_absolute: default_safety_absolute(),
            safety_fraction: default_safety_fraction(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    LlamaCpp,
    LlamaCppSideload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub name: String,
    pub engine_type: EngineKind,
    #[serde(default)]
    pub connect: Option<String>,
    #[serde(default)]
    pub tokenization: Option<TokenizerSpec>,
    #[serde(default)]
    pub health_check_timeout_secs: Option<u64>,
    #[serde(default)]
    pub engine_startup_timeout_secs: Option<u64>,
    #[serde(default)]
    pub engine_idle_timeout_secs: Option<u64>,
    pub variants: Vec<Variant>,
}

impl Model {
    /// Timeouts fall back to the server defaults when unset at the model level.
    pub fn health_check_timeout(&self, server: &ServerConfig) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.health_check_timeout_secs
                .unwrap_or(server.health_check_timeout_secs),
        )
    }

    pub fn engine_startup_timeout(&self, server: &ServerConfig) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.engine_startup_timeout_secs
                .unwrap_or(server.engine_startup_timeout_secs),
        )
    }

    pub fn engine_idle_timeout(&self, server: &ServerConfig) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.engine_idle_timeout_secs
                .unwrap_or(server.engine_idle_timeout_secs),
        )
    }

    /// Re-sort variants ascending by context; the selector relies on this
    /// order and config validation is out of scope, so the core defends it.
    fn normalize(&mut self) {
        self.variants.sort_by_key(|v| v.context);
    }

    pub fn max_context(&self) -> u32 {
        self.variants.last().map(|v| v.context).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Variant {
    pub binary: String,
    pub args: Vec<String>,
    pub context: u32,
    #[serde(default)]
    pub connect: Option<String>,
    #[serde(default)]
    pub health_check_timeout_secs: Option<u64>,
    #[serde(default)]
    pub engine_startup_timeout_secs: Option<u64>,
    #[serde(default)]
    pub engine_idle_timeout_secs: Option<u64>,
}

impl Variant {
    pub fn connect_url(&self, model: &Model) -> String {
        self.connect
            .clone()
            .or_else(|| model.connect.clone())
            .unwrap_or_else(|| "http://127.0.0.1:8081".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenizerSpec {
    pub binary: String,
    #[serde(default = "default_tokenizer_base_args")]
    pub base_args: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub extra_tokens_per_message: u32,
    #[serde(default)]
    pub extra_tokens: u32,
}

fn default_bind_none() -> BindAddr {
    BindAddr::None(BindNone)
}
fn default_health_check_timeout_secs() -> u64 {
    5
}
fn default_engine_startup_timeout_secs() -> u64 {
    120
}
fn default_engine_idle_timeout_secs() -> u64 {
    600
}
fn default_max_tokens_reservation() -> u32 {
    1024
}
fn default_safety_absolute() -> u32 {
    512
}
fn default_safety_fraction() -> f64 {
    0.10
}
fn default_tokenizer_base_args() -> Vec<String> {
    vec![
        "--log-disable".to_string(),
        "--stdin".to_string(),
        "--ids".to_string(),
    ]
}

impl Config {
    /// Load configuration from the file at `path` plus environment variable
    /// overrides.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (`GATEWAY__SECTION__KEY` format)
    /// 2. The config file named on the command line
    /// 3. Built-in defaults
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let loader = ConfigLoader::builder()
            .set_default("server.health_check_timeout_secs", default_health_check_timeout_secs() as i64)?
            .set_default(
                "server.engine_startup_timeout_secs",
                default_engine_startup_timeout_secs() as i64,
            )?
            .set_default(
                "server.engine_idle_timeout_secs",
                default_engine_idle_timeout_secs() as i64,
            )?
            .set_default(
                "server.default_max_tokens_reservation",
                default_max_tokens_reservation() as i64,
            )?
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = loader.try_deserialize()?;
        for model in &mut config.models {
            model.normalize();
        }
        Ok(config)
    }

    pub fn find_model(&self, name: &str) -> Option<&Model> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.health_check_timeout_secs, 5);
        assert_eq!(server.engine_startup_timeout_secs, 120);
        assert_eq!(server.engine_idle_timeout_secs, 600);
        assert_eq!(server.default_max_tokens_reservation, 1024);
        assert_eq!(server.bind_v4, BindAddr::None(BindNone));
    }

    #[test]
    fn test_tokenizer_default_base_args() {
        let args = default_tokenizer_base_args();
        assert_eq!(args, vec!["--log-disable", "--stdin", "--ids"]);
    }

    #[test]
    fn test_model_normalize_sorts_variants_ascending() {
        let mut model = Model {
            name: "qwen3-30b".to_string(),
            engine_type: EngineKind::LlamaCpp,
            connect: None,
            tokenization: None,
            health_check_timeout_secs: None,
            engine_startup_timeout_secs: None,
            engine_idle_timeout_secs: None,
            variants: vec![
                variant(81920),
                variant(20480),
                variant(40960),
            ],
        };
        model.normalize();
        let contexts: Vec<u32> = model.variants.iter().map(|v| v.context).collect();
        assert_eq!(contexts, vec![20480, 40960, 81920]);
    }

    #[test]
    fn test_variant_launch_identity_ignores_context() {
        let model = test_model(vec![variant(20480), variant(40960)]);
        let a = &model.variants[0];
        let b = &model.variants[1];
        assert_eq!(
            (&a.binary, &a.args, a.connect_url(&model)),
            (&b.binary, &b.args, b.connect_url(&model))
        );
        assert_ne!(a.context, b.context);
    }

    fn test_model(variants: Vec<Variant>) -> Model {
        Model {
            name: "qwen3-30b".to_string(),
            engine_type: EngineKind::LlamaCpp,
            connect: None,
            tokenization: None,
            health_check_timeout_secs: None,
            engine_startup_timeout_secs: None,
            engine_idle_timeout_secs: None,
            variants,
        }
    }

    #[test]
    fn test_bind_addr_none_has_no_endpoints() {
        assert!(default_bind_none().endpoints().is_empty());
    }

    fn variant(context: u32) -> Variant {
        Variant {
            binary: "llama-server".to_string(),
            args: vec![],
            context,
            connect: None,
            health_check_timeout_secs: None,
            engine_startup_timeout_secs: None,
            engine_idle_timeout_secs: None,
        }
    }
}
