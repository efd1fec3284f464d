use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Application configuration, deserialized from the environment. A `.env`
/// file is loaded first if present. Passed explicitly to the services that
/// need it; there is no global config.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Root directory for queue files and the local storage database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    pub perspective_api_key: Option<String>,

    #[serde(default = "default_llm_api_base")]
    pub llm_api_base: String,
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_model_name")]
    pub llm_model_name: String,
    #[serde(default = "default_llm_minibatch_size")]
    pub llm_minibatch_size: usize,

    /// Retry rounds after the initial classification attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before the first retry round, in seconds. Doubles per round.
    #[serde(default = "default_initial_retry_delay_secs")]
    pub initial_retry_delay_secs: f64,

    /// How many days before the requested start date feed candidates may
    /// have been preprocessed.
    #[serde(default = "default_feed_lookback_days")]
    pub feed_lookback_days: i64,

    pub s3_bucket: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_llm_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_minibatch_size() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_secs() -> f64 {
    1.0
}

fn default_feed_lookback_days() -> i64 {
    5
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm_minibatch_size == 0 {
            return Err(ConfigError::Invalid(
                "LLM_MINIBATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.initial_retry_delay_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "INITIAL_RETRY_DELAY_SECS must be positive".to_string(),
            ));
        }
        if self.feed_lookback_days < 0 {
            return Err(ConfigError::Invalid(
                "FEED_LOOKBACK_DAYS must be non-negative".to_string(),
            ));
        }
        let s3_fields = [
            &self.s3_bucket,
            &self.s3_endpoint,
            &self.s3_access_key,
            &self.s3_secret_key,
        ];
        let set = s3_fields.iter().filter(|f| f.is_some()).count();
        if set != 0 && set != s3_fields.len() {
            return Err(ConfigError::Invalid(
                "S3_BUCKET, S3_ENDPOINT, S3_ACCESS_KEY and S3_SECRET_KEY must be set together"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the per-queue SQLite files.
    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    /// Path of the local storage database.
    pub fn local_db_path(&self) -> PathBuf {
        self.data_dir.join("local_store.db")
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs_f64(self.initial_retry_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            data_dir: PathBuf::from("./data"),
            perspective_api_key: None,
            llm_api_base: default_llm_api_base(),
            llm_api_key: None,
            llm_model_name: default_llm_model_name(),
            llm_minibatch_size: 10,
            max_retries: 3,
            initial_retry_delay_secs: 1.0,
            feed_lookback_days: 5,
            s3_bucket: None,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
        }
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_partial_s3_config_is_rejected() {
        let mut config = base_config();
        config.s3_bucket = Some("labels".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_minibatch_size_is_rejected() {
        let mut config = base_config();
        config.llm_minibatch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_paths_derive_from_data_dir() {
        let config = base_config();
        assert_eq!(config.queue_dir(), PathBuf::from("./data/queue"));
        assert_eq!(config.local_db_path(), PathBuf::from("./data/local_store.db"));
    }
}
