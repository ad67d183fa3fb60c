//! Typed configuration surface for the RLM engine (C13).
//!
//! Every field is resolved with precedence, highest first: explicit
//! constructor overrides > environment variables (`RLM_`-prefixed,
//! upper-snake) > a config file (TOML or JSON, picked by extension) >
//! compiled-in defaults. Loading never touches the network and never
//! panics; every failure is a [`ConfigError`].

use std::env::VarError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "RLM_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("config file {path} has an unsupported extension (expected .toml or .json)")]
    UnsupportedExtension { path: PathBuf },

    #[error("environment variable {var} has an unrecognized boolean value {value:?} (expected true/false)")]
    InvalidBoolEnv { var: String, value: String },

    #[error("environment variable {var} has an unrecognized integer value {value:?}: {source}")]
    InvalidIntEnv {
        var: String,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("max_iterations must be greater than zero (0 is rejected rather than silently synthesizing an answer)")]
    ZeroMaxIterations,

    #[error("pool_size must be greater than zero")]
    ZeroPoolSize,
}

/// Sandbox process limits (§4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub image: String,
    pub memory_limit_mb: u64,
    pub cpu_count: u32,
    pub execute_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "rlm-sandbox:latest".to_string(),
            memory_limit_mb: 512,
            cpu_count: 1,
            execute_timeout_secs: 30,
        }
    }
}

impl SandboxConfig {
    #[must_use]
    pub fn execute_timeout(&self) -> Duration {
        Duration::from_secs(self.execute_timeout_secs)
    }
}

/// Retry/backoff knobs for outer-model calls (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_delay_secs: f64,
    pub rate: f64,
    pub max_delay_secs: f64,
    pub jitter: f64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 1.0,
            rate: 2.0,
            max_delay_secs: 60.0,
            jitter: 0.1,
            max_retries: 3,
        }
    }
}

/// The full configuration surface enumerated in §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub model: String,
    pub pool_size: usize,
    pub max_iterations: u32,
    pub max_traces_per_project: usize,
    pub verify_citations: bool,
    pub verify: bool,
    pub max_subcall_content_chars: usize,
    pub prompts_dir: Option<PathBuf>,
    pub sandbox: SandboxConfig,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet".to_string(),
            pool_size: 3,
            max_iterations: 20,
            max_traces_per_project: 50,
            verify_citations: true,
            verify: false,
            max_subcall_content_chars: 500_000,
            prompts_dir: None,
            sandbox: SandboxConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations that would make the orchestrator loop
    /// meaningless rather than silently reinterpreting them (§4.7, §9).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroMaxIterations);
        }
        if self.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        Ok(())
    }
}

/// Per-field overrides a caller can pass to [`load`], taking precedence over
/// everything else. `None` means "defer to environment/file/defaults".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub pool_size: Option<usize>,
    pub max_iterations: Option<u32>,
    pub max_traces_per_project: Option<usize>,
    pub verify_citations: Option<bool>,
    pub verify: Option<bool>,
    pub max_subcall_content_chars: Option<usize>,
    pub prompts_dir: Option<PathBuf>,
}

/// On-disk representation: every field optional, since a file may only set a subset.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    model: Option<String>,
    pool_size: Option<usize>,
    max_iterations: Option<u32>,
    max_traces_per_project: Option<usize>,
    verify_citations: Option<bool>,
    verify: Option<bool>,
    max_subcall_content_chars: Option<usize>,
    prompts_dir: Option<PathBuf>,
    #[serde(default)]
    sandbox: SandboxFileConfig,
    #[serde(default)]
    retry: RetryFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SandboxFileConfig {
    image: Option<String>,
    memory_limit_mb: Option<u64>,
    cpu_count: Option<u32>,
    execute_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RetryFileConfig {
    base_delay_secs: Option<f64>,
    rate: Option<f64>,
    max_delay_secs: Option<f64>,
    jitter: Option<f64>,
    max_retries: Option<u32>,
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        }),
        Some("json") => serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        }),
        _ => Err(ConfigError::UnsupportedExtension { path: path.to_path_buf() }),
    }
}

fn env_string(name: &str) -> Option<String> {
    match std::env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(_)) => None,
    }
}

fn env_bool(name: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = env_string(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidBoolEnv {
            var: format!("{ENV_PREFIX}{name}"),
            value: raw,
        }),
    }
}

fn env_parsed<T: std::str::FromStr<Err = std::num::ParseIntError>>(
    name: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env_string(name) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|source| ConfigError::InvalidIntEnv {
            var: format!("{ENV_PREFIX}{name}"),
            value: raw,
            source,
        })
}

/// Load and resolve the full configuration, applying
/// overrides > environment > file > defaults at every field.
pub fn load(
    file_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<EngineConfig, ConfigError> {
    let file = match file_path {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };
    let defaults = EngineConfig::default();

    let config = EngineConfig {
        model: overrides
            .model
            .clone()
            .or_else(|| env_string("MODEL"))
            .or(file.model)
            .unwrap_or(defaults.model),
        pool_size: overrides
            .pool_size
            .or(env_parsed("POOL_SIZE")?)
            .or(file.pool_size)
            .unwrap_or(defaults.pool_size),
        max_iterations: overrides
            .max_iterations
            .or(env_parsed("MAX_ITERATIONS")?)
            .or(file.max_iterations)
            .unwrap_or(defaults.max_iterations),
        max_traces_per_project: overrides
            .max_traces_per_project
            .or(env_parsed("MAX_TRACES_PER_PROJECT")?)
            .or(file.max_traces_per_project)
            .unwrap_or(defaults.max_traces_per_project),
        verify_citations: overrides
            .verify_citations
            .or(env_bool("VERIFY_CITATIONS")?)
            .or(file.verify_citations)
            .unwrap_or(defaults.verify_citations),
        verify: overrides
            .verify
            .or(env_bool("VERIFY")?)
            .or(file.verify)
            .unwrap_or(defaults.verify),
        max_subcall_content_chars: overrides
            .max_subcall_content_chars
            .or(env_parsed("MAX_SUBCALL_CONTENT_CHARS")?)
            .or(file.max_subcall_content_chars)
            .unwrap_or(defaults.max_subcall_content_chars),
        prompts_dir: overrides
            .prompts_dir
            .clone()
            .or_else(|| env_string("PROMPTS_DIR").map(PathBuf::from))
            .or(file.prompts_dir)
            .or(defaults.prompts_dir),
        sandbox: SandboxConfig {
            image: env_string("SANDBOX_IMAGE")
                .or(file.sandbox.image)
                .unwrap_or(defaults.sandbox.image),
            memory_limit_mb: env_parsed("SANDBOX_MEMORY_LIMIT_MB")?
                .or(file.sandbox.memory_limit_mb)
                .unwrap_or(defaults.sandbox.memory_limit_mb),
            cpu_count: env_parsed("SANDBOX_CPU_COUNT")?
                .or(file.sandbox.cpu_count)
                .unwrap_or(defaults.sandbox.cpu_count),
            execute_timeout_secs: env_parsed("EXECUTE_TIMEOUT_SECS")?
                .or(file.sandbox.execute_timeout_secs)
                .unwrap_or(defaults.sandbox.execute_timeout_secs),
        },
        retry: RetryConfig {
            base_delay_secs: file.retry.base_delay_secs.unwrap_or(defaults.retry.base_delay_secs),
            rate: file.retry.rate.unwrap_or(defaults.retry.rate),
            max_delay_secs: file.retry.max_delay_secs.unwrap_or(defaults.retry.max_delay_secs),
            jitter: file.retry.jitter.unwrap_or(defaults.retry.jitter),
            max_retries: file.retry.max_retries.unwrap_or(defaults.retry.max_retries),
        },
    };

    Ok(config)
}

/// Returns the platform config directory file path this crate would read by
/// default (`~/.config/rlm-engine/config.toml` on Linux), without reading it.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rlm-engine").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.max_iterations, 20);
        assert_eq!(config.max_traces_per_project, 50);
        assert!(config.verify_citations);
        assert!(!config.verify);
        assert_eq!(config.max_subcall_content_chars, 500_000);
        assert_eq!(config.sandbox.memory_limit_mb, 512);
        assert_eq!(config.sandbox.cpu_count, 1);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn zero_max_iterations_is_rejected() {
        let mut config = EngineConfig::default();
        config.max_iterations = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxIterations)));
    }

    #[test]
    fn overrides_beat_environment_and_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("RLM_POOL_SIZE", "7") };
        let overrides = ConfigOverrides { pool_size: Some(2), ..Default::default() };
        let config = load(None, &overrides).unwrap();
        assert_eq!(config.pool_size, 2);
        unsafe { std::env::remove_var("RLM_POOL_SIZE") };
    }

    #[test]
    fn environment_beats_defaults_when_no_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("RLM_MAX_ITERATIONS", "5") };
        let config = load(None, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.max_iterations, 5);
        unsafe { std::env::remove_var("RLM_MAX_ITERATIONS") };
    }

    #[test]
    fn invalid_bool_env_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("RLM_VERIFY", "maybe") };
        let err = load(None, &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBoolEnv { .. }));
        unsafe { std::env::remove_var("RLM_VERIFY") };
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "pool_size = 9\nmodel = \"gpt-test\"\n").unwrap();
        let config = load(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.pool_size, 9);
        assert_eq!(config.model, "gpt-test");
    }
}
