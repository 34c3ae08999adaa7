//! Configuration: TOML file, then environment, then CLI flags
//!
//! ```toml
//! base_url = "http://localhost:8000/v1"
//! model = "Qwen3-30B-A3B-Thinking"
//! session = "work"
//!
//! [policy]
//! profile = "restricted"
//! working_dir = "~/scratch"
//! allow_network = true
//! allowed_hosts = ["api.duckduckgo.com", "*.rust-lang.org"]
//!
//! [policy.tool_timeouts]
//! run_code = 60
//! ```
//!
//! Every key is optional and unknown keys are ignored.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::sessions::{SessionStore, DEFAULT_TOKEN_BUDGET};
use crate::agent::OrchestratorConfig;
use crate::executor::{Profile, ResourcePolicy};
use crate::llm::ClientConfig;
use crate::tools::DEFAULT_SEARCH_ENDPOINT;

pub const ENV_BASE_URL: &str = "TOOLCHAT_BASE_URL";
pub const ENV_MODEL: &str = "TOOLCHAT_MODEL";
pub const ENV_API_KEY: &str = "TOOLCHAT_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Inference server base URL including `/v1`
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub retry_max_elapsed_secs: u64,
    pub enable_thinking: Option<bool>,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    pub token_budget: usize,
    pub session_dir: Option<PathBuf>,
    /// Session name loaded at startup
    pub session: String,
    /// Ask the model when the lexical stage is inconclusive
    pub semantic_fallback: bool,
    pub classifier_context_turns: usize,
    pub search_endpoint: String,
    pub policy: PolicyConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "Qwen3-30B-A3B-Thinking".to_string(),
            api_key: "not-needed".to_string(),
            temperature: 0.7,
            max_tokens: 1500,
            request_timeout_secs: 120,
            retry_max_elapsed_secs: 10,
            enable_thinking: None,
            system_prompt: None,
            token_budget: DEFAULT_TOKEN_BUDGET,
            session_dir: None,
            session: "default".to_string(),
            semantic_fallback: true,
            classifier_context_turns: 6,
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            policy: PolicyConfig::default(),
        }
    }
}

/// `[policy]` table; unset fields keep the profile's values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub profile: Profile,
    pub default_timeout_secs: Option<u64>,
    pub output_cap_bytes: Option<usize>,
    /// Confinement root for the restricted profile; defaults to the current directory
    pub working_dir: Option<PathBuf>,
    pub allow_network: Option<bool>,
    pub allowed_hosts: Vec<String>,
    pub disabled_tools: Vec<String>,
    /// Tool id → seconds
    pub tool_timeouts: HashMap<String, u64>,
}

impl PolicyConfig {
    /// Build the policy, starting from the profile defaults
    pub fn build(&self) -> Result<ResourcePolicy, ConfigError> {
        let working_dir = match &self.working_dir {
            Some(dir) => expand_home(dir),
            None => std::env::current_dir().map_err(|e| {
                ConfigError::Invalid(format!("cannot determine the current directory: {e}"))
            })?,
        };
        if !working_dir.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "working_dir {} is not a directory",
                working_dir.display()
            )));
        }

        let mut policy = ResourcePolicy::for_profile(self.profile, working_dir);
        if let Some(secs) = self.default_timeout_secs {
            if secs == 0 {
                return Err(ConfigError::Invalid("default_timeout_secs must be positive".into()));
            }
            policy.default_timeout = Duration::from_secs(secs);
        }
        if let Some(cap) = self.output_cap_bytes {
            policy.output_cap = cap;
        }
        if let Some(allow) = self.allow_network {
            policy.allow_network = allow;
        }
        policy.allowed_hosts = self.allowed_hosts.clone();
        policy.disabled_tools = self.disabled_tools.iter().cloned().collect::<BTreeSet<_>>();
        policy.tool_timeouts = self
            .tool_timeouts
            .iter()
            .map(|(tool, secs)| (tool.clone(), Duration::from_secs(*secs)))
            .collect();
        Ok(policy)
    }
}

impl AgentConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load configuration and apply environment overrides
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content, path)?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/toolchat/config.toml`, else `~/.config/toolchat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))?;
        Some(config_dir.join("toolchat").join("config.toml"))
    }

    /// Override connection settings from the environment
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(model) = non_empty(ENV_MODEL) {
            self.model = model;
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api_key = key;
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry_max_elapsed: Duration::from_secs(self.retry_max_elapsed_secs),
            enable_thinking: self.enable_thinking,
        }
    }

    pub fn resource_policy(&self) -> Result<ResourcePolicy, ConfigError> {
        self.policy.build()
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            system_prompt: self.system_prompt.clone(),
            classifier_context_turns: self.classifier_context_turns,
            completion_reserve: self.max_tokens as usize,
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.session_dir
            .as_deref()
            .map(expand_home)
            .unwrap_or_else(SessionStore::default_dir)
    }
}

/// Expand a leading `~/`
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var("HOME")) {
        (Ok(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
