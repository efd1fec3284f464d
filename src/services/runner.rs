use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::models::integration::Integration;
use crate::models::metadata::{BatchRunMetadata, IntegrationRunOutcome, RunReport};
use crate::models::post::{PostToEnqueue, QueuedPost};
use crate::services::batch::{
    run_batch_classification, BatchError, BatchOptions, RetryStrategy,
};
use crate::services::classifiers::llm::{LlmClassifier, LlmTask};
use crate::services::classifiers::perspective::PerspectiveClassifier;
use crate::services::classifiers::{Classifier, ClassifierError};
use crate::services::queue::{QueueError, QueueManager};

/// Per-integration run parameters; `None` fields fall back to the
/// integration's defaults and the global retry config.
#[derive(Debug, Clone)]
pub struct IntegrationRunConfig {
    pub integration: Integration,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub initial_delay: Option<Duration>,
    pub strategy: Option<RetryStrategy>,
}

impl IntegrationRunConfig {
    pub fn new(integration: Integration) -> Self {
        Self {
            integration,
            batch_size: None,
            max_retries: None,
            initial_delay: None,
            strategy: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("batch classification error: {0}")]
    Batch(#[from] BatchError),

    #[error("failed to build classifier client: {0}")]
    ClassifierInit(#[from] ClassifierError),

    #[error("integration {integration} requires {variable} to be set")]
    MissingCredentials {
        integration: Integration,
        variable: &'static str,
    },

    #[error("integration {integration} failed, aborting remaining integrations: {source}")]
    Integration {
        integration: Integration,
        #[source]
        source: Box<RunnerError>,
    },
}

/// Drives the batch engine for each configured integration, strictly in
/// sequence. Classifier clients are built once on first use and reused.
pub struct IntegrationRunner {
    config: AppConfig,
    queues: Arc<QueueManager>,
    classifiers: Mutex<HashMap<Integration, Arc<dyn Classifier>>>,
}

impl IntegrationRunner {
    pub fn new(config: AppConfig, queues: Arc<QueueManager>) -> Self {
        Self {
            config,
            queues,
            classifiers: Mutex::new(HashMap::new()),
        }
    }

    /// Pre-populate the classifier for `integration`, bypassing the built-in
    /// clients. Used by tests to inject scripted classifiers.
    pub async fn register(&self, integration: Integration, classifier: Arc<dyn Classifier>) {
        self.classifiers.lock().await.insert(integration, classifier);
    }

    /// Run each configured integration in order. The first failure is
    /// wrapped with the integration it came from and aborts the rest; a
    /// non-zero failed-label count is an outcome, not an error.
    pub async fn run(
        &self,
        configs: &[IntegrationRunConfig],
    ) -> Result<RunReport, RunnerError> {
        let mut report = RunReport::default();
        for run_config in configs {
            let metadata = self.run_single(run_config).await.map_err(|e| {
                RunnerError::Integration {
                    integration: run_config.integration,
                    source: Box::new(e),
                }
            })?;
            report.outcomes.push(IntegrationRunOutcome {
                integration: run_config.integration,
                metadata,
            });
        }
        Ok(report)
    }

    async fn run_single(
        &self,
        run_config: &IntegrationRunConfig,
    ) -> Result<BatchRunMetadata, RunnerError> {
        let integration = run_config.integration;
        let classifier = self.classifier_for(integration).await?;

        let input_queue = self.queues.input(integration).await?;
        let output_queue = self.queues.output(integration).await?;

        let items = input_queue
            .load_all::<PostToEnqueue>()
            .await
            .map_err(BatchError::Queue)?;
        let pending: Vec<QueuedPost> = items
            .into_iter()
            .map(|item| QueuedPost {
                queue_id: item.id,
                post: item.payload,
            })
            .collect();

        tracing::info!(
            integration = %integration,
            pending = pending.len(),
            "Starting integration run"
        );

        let defaults = BatchOptions::for_integration(integration);
        let options = BatchOptions {
            batch_size: run_config.batch_size.unwrap_or(defaults.batch_size),
            max_retries: run_config.max_retries.unwrap_or(self.config.max_retries),
            initial_delay: run_config
                .initial_delay
                .unwrap_or_else(|| self.config.initial_delay()),
            strategy: run_config.strategy.unwrap_or(defaults.strategy),
        };

        let metadata = run_batch_classification(
            classifier.as_ref(),
            integration,
            pending,
            &input_queue,
            &output_queue,
            &options,
        )
        .await?;
        Ok(metadata)
    }

    /// Look up or build the classifier bound to `integration`.
    async fn classifier_for(
        &self,
        integration: Integration,
    ) -> Result<Arc<dyn Classifier>, RunnerError> {
        let mut classifiers = self.classifiers.lock().await;
        if let Some(classifier) = classifiers.get(&integration) {
            return Ok(Arc::clone(classifier));
        }

        let classifier: Arc<dyn Classifier> = match integration {
            Integration::PerspectiveApi => {
                let api_key = self.config.perspective_api_key.clone().ok_or(
                    RunnerError::MissingCredentials {
                        integration,
                        variable: "PERSPECTIVE_API_KEY",
                    },
                )?;
                Arc::new(PerspectiveClassifier::new(api_key)?)
            }
            Integration::Sociopolitical => self.build_llm(integration, LlmTask::Sociopolitical)?,
            Integration::Intergroup => self.build_llm(integration, LlmTask::Intergroup)?,
            Integration::Valence => self.build_llm(integration, LlmTask::Valence)?,
        };

        classifiers.insert(integration, Arc::clone(&classifier));
        Ok(classifier)
    }

    fn build_llm(
        &self,
        integration: Integration,
        task: LlmTask,
    ) -> Result<Arc<dyn Classifier>, RunnerError> {
        let api_key =
            self.config
                .llm_api_key
                .clone()
                .ok_or(RunnerError::MissingCredentials {
                    integration,
                    variable: "LLM_API_KEY",
                })?;
        Ok(Arc::new(LlmClassifier::new(
            self.config.llm_api_base.clone(),
            api_key,
            self.config.llm_model_name.clone(),
            task,
            self.config.llm_minibatch_size,
        )?))
    }
}
