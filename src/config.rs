//! Runtime configuration: defaults, `.env` loading and environment overrides

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Result, TravelChatError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub soap: SoapConfig,
    pub openai: OpenAiConfig,
    pub index: IndexConfig,
}

/// Travel-booking SOAP service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoapConfig {
    pub endpoint: String,
    pub action: String,
    /// Target namespace of the operation element
    pub namespace: String,
    pub operation: String,
    /// Element carrying the free-text plan inside the operation
    pub parameter: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl SoapConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SoapConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/TravelService".to_string(),
            action: "http://travel.example.com/GetTravelPlanDetails".to_string(),
            namespace: "http://travel.example.com/".to_string(),
            operation: "GetTravelPlanDetails".to_string(),
            parameter: "request".to_string(),
            timeout_secs: 30,
            user_agent: concat!("travel-chat/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Hosted chat and embedding model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            chat_model: "gpt-3.5-turbo".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
        }
    }
}

/// Knowledge index settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Save the index to disk and reuse it on later runs
    pub persist: bool,
    pub persist_dir: PathBuf,
    pub scratch_file: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question
    pub retrieval_k: usize,
}

impl IndexConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.persist_dir.join("index.json")
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist: false,
            persist_dir: PathBuf::from("persist"),
            scratch_file: PathBuf::from("temp_data.txt"),
            chunk_size: 1000,
            chunk_overlap: 200,
            retrieval_k: 1,
        }
    }
}

impl Config {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "Loaded .env file"),
            Err(e) if e.not_found() => debug!("No .env file found"),
            Err(e) => warn!(error = %e, "Failed to read .env file"),
        }

        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = env::var("TRAVEL_SOAP_ENDPOINT") {
            self.soap.endpoint = endpoint;
        }
        if let Ok(action) = env::var("TRAVEL_SOAP_ACTION") {
            self.soap.action = action;
        }
        if let Ok(namespace) = env::var("TRAVEL_SOAP_NAMESPACE") {
            self.soap.namespace = namespace;
        }
        if let Ok(operation) = env::var("TRAVEL_SOAP_OPERATION") {
            self.soap.operation = operation;
        }
        if let Ok(parameter) = env::var("TRAVEL_SOAP_PARAMETER") {
            self.soap.parameter = parameter;
        }
        if let Some(timeout) = parsed_var("TRAVEL_SOAP_TIMEOUT_SECS") {
            self.soap.timeout_secs = timeout;
        }

        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            if !api_key.trim().is_empty() {
                self.openai.api_key = Some(api_key);
            }
        }
        if let Ok(base_url) = env::var("OPENAI_BASE_URL") {
            self.openai.base_url = Some(base_url);
        }
        if let Ok(model) = env::var("TRAVEL_CHAT_MODEL") {
            self.openai.chat_model = model;
        }
        if let Ok(model) = env::var("TRAVEL_EMBEDDING_MODEL") {
            self.openai.embedding_model = model;
        }

        if let Some(k) = parsed_var("TRAVEL_RETRIEVAL_K") {
            self.index.retrieval_k = k;
        }
        if let Some(persist) = parsed_var::<bool>("TRAVEL_PERSIST") {
            self.index.persist = persist;
        }
        if let Ok(dir) = env::var("TRAVEL_PERSIST_DIR") {
            self.index.persist_dir = PathBuf::from(dir);
        }
        if let Ok(file) = env::var("TRAVEL_SCRATCH_FILE") {
            self.index.scratch_file = PathBuf::from(file);
        }
    }

    /// Check the settings needed before any request is made.
    pub fn validate(&self) -> Result<()> {
        if self.soap.endpoint.trim().is_empty() {
            return Err(TravelChatError::Config("SOAP endpoint must not be empty".to_string()));
        }
        if self.index.retrieval_k == 0 {
            return Err(TravelChatError::Config("retrieval k must be at least 1".to_string()));
        }
        if self.index.chunk_size == 0 || self.index.chunk_overlap >= self.index.chunk_size {
            return Err(TravelChatError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.index.chunk_overlap, self.index.chunk_size
            )));
        }
        if self.openai.api_key.is_none() {
            return Err(TravelChatError::Config("OPENAI_API_KEY is not set".to_string()));
        }
        Ok(())
    }
}

fn parsed_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}
