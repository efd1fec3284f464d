use std::error::Error;
use std::io::{BufRead, Write};
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use strum::IntoEnumIterator;
use tracing_subscriber::EnvFilter;

use label_backfill::config::AppConfig;
use label_backfill::db::local_store::LocalStorageRepository;
use label_backfill::db::repository::DataRepository;
use label_backfill::models::integration::Integration;
use label_backfill::services::cache_writer::CacheBufferWriter;
use label_backfill::services::enqueue::{EnqueueService, RecordType};
use label_backfill::services::queue::QueueManager;
use label_backfill::services::runner::{IntegrationRunConfig, IntegrationRunner};
use label_backfill::services::storage::S3Repository;

#[derive(Parser)]
#[command(name = "label-backfill", version, about = "Batch classification backfill engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RecordTypeArg {
    Posts,
    PostsUsedInFeeds,
}

impl From<RecordTypeArg> for RecordType {
    fn from(arg: RecordTypeArg) -> Self {
        match arg {
            RecordTypeArg::Posts => RecordType::Posts,
            RecordTypeArg::PostsUsedInFeeds => RecordType::PostsUsedInFeeds,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StoreArg {
    Local,
    S3,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue unlabeled records for a date range, then run the integrations.
    Backfill {
        #[arg(long, value_enum, default_value = "posts")]
        record_type: RecordTypeArg,

        /// Integrations to backfill (full name or p/s/i/v abbreviation).
        #[arg(short = 'i', long = "integration", required = true)]
        integrations: Vec<String>,

        /// Inclusive start date, YYYY-MM-DD.
        #[arg(long)]
        start_date: String,

        /// Inclusive end date, YYYY-MM-DD.
        #[arg(long)]
        end_date: String,

        /// Enqueue only; skip the classification run.
        #[arg(long)]
        no_run: bool,

        /// Override the per-integration default batch size.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the configured retry budget.
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Run integrations against already-queued work.
    Run {
        #[arg(short = 'i', long = "integration", required = true)]
        integrations: Vec<String>,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Flush buffered labels from output queues into storage.
    WriteCache {
        /// One integration, or "all".
        #[arg(short = 'i', long = "integration", default_value = "all")]
        integration: String,

        /// Delete the buffered rows after writing.
        #[arg(long)]
        clear_queue: bool,

        /// Skip the write and only clear. Requires --clear-queue.
        #[arg(long, requires = "clear_queue")]
        bypass_write: bool,

        /// Which storage backend receives the labels.
        #[arg(long, value_enum, default_value = "local")]
        store: StoreArg,
    },

    /// Delete queued work for an integration. Destructive.
    ClearQueues {
        #[arg(short = 'i', long = "integration", required = true)]
        integration: String,

        /// Clear only the input queue.
        #[arg(long, conflicts_with = "output_only")]
        input_only: bool,

        /// Clear only the output queue.
        #[arg(long)]
        output_only: bool,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    metrics::describe_counter!(
        "backfill_enqueued_total",
        "Records enqueued for classification"
    );
    metrics::describe_counter!("backfill_classify_calls_total", "Classifier batch calls made");
    metrics::describe_counter!(
        "backfill_labels_succeeded_total",
        "Records successfully labeled"
    );
    metrics::describe_counter!(
        "backfill_labels_failed_total",
        "Records that exhausted the retry budget"
    );

    let result = run_command(cli.command).await;

    // Batch CLI, not a server: log the scrape output instead of serving it.
    // Rendered before the exit path so failed runs still report their counters.
    tracing::info!(metrics = %prometheus_handle.render(), "Run metrics");

    if let Err(e) = result {
        tracing::error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

async fn run_command(command: Command) -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_env()?;
    let queues = Arc::new(QueueManager::new(config.queue_dir()));

    match command {
        Command::Backfill {
            record_type,
            integrations,
            start_date,
            end_date,
            no_run,
            batch_size,
            max_retries,
        } => {
            validate_date_range(&start_date, &end_date)?;
            let integrations = resolve_integrations(&integrations)?;
            let repository = open_local_repository(&config).await?;

            let enqueue = EnqueueService::new(&repository, &queues, config.feed_lookback_days);
            let summary = enqueue
                .enqueue(record_type.into(), &integrations, &start_date, &end_date)
                .await?;
            tracing::info!(
                enqueued = summary.total_enqueued(),
                "Enqueue pass complete"
            );

            if !no_run {
                run_integrations(&config, &queues, &integrations, batch_size, max_retries)
                    .await?;
            }
        }

        Command::Run {
            integrations,
            batch_size,
            max_retries,
        } => {
            let integrations = resolve_integrations(&integrations)?;
            run_integrations(&config, &queues, &integrations, batch_size, max_retries).await?;
        }

        Command::WriteCache {
            integration,
            clear_queue,
            bypass_write,
            store,
        } => {
            let integrations = if integration == "all" {
                Integration::iter().collect()
            } else {
                vec![resolve_integration(&integration)?]
            };

            let repository: Box<dyn DataRepository> = match store {
                StoreArg::Local => Box::new(open_local_repository(&config).await?),
                StoreArg::S3 => Box::new(open_s3_repository(&config)?),
            };
            let writer = CacheBufferWriter::new(repository.as_ref(), &queues);

            for integration in integrations {
                if !bypass_write {
                    let written = writer.write_cache(integration).await?;
                    tracing::info!(integration = %integration, written, "Cache write complete");
                }
                if clear_queue {
                    let deleted = writer.clear_cache(integration).await?;
                    tracing::info!(integration = %integration, deleted, "Output queue cleared");
                }
            }
        }

        Command::ClearQueues {
            integration,
            input_only,
            output_only,
            yes,
        } => {
            let integration = resolve_integration(&integration)?;
            if !yes && !confirm_clear(integration)? {
                tracing::info!("Aborted");
                return Ok(());
            }

            if !output_only {
                let deleted = queues.input(integration).await?.clear().await?;
                tracing::info!(integration = %integration, deleted, "Input queue cleared");
            }
            if !input_only {
                let deleted = queues.output(integration).await?.clear().await?;
                tracing::info!(integration = %integration, deleted, "Output queue cleared");
            }
        }
    }

    Ok(())
}

async fn run_integrations(
    config: &AppConfig,
    queues: &Arc<QueueManager>,
    integrations: &[Integration],
    batch_size: Option<usize>,
    max_retries: Option<u32>,
) -> Result<(), Box<dyn Error>> {
    let runner = IntegrationRunner::new(config.clone(), Arc::clone(queues));
    let configs: Vec<IntegrationRunConfig> = integrations
        .iter()
        .map(|&integration| IntegrationRunConfig {
            batch_size,
            max_retries,
            ..IntegrationRunConfig::new(integration)
        })
        .collect();

    let report = runner.run(&configs).await?;
    // Failed labels after exhausted retries are an expected steady state,
    // not an error exit.
    tracing::info!(
        succeeded = report.total_successfully_labeled(),
        failed = report.total_failed(),
        "Classification run complete"
    );
    Ok(())
}

async fn open_local_repository(
    config: &AppConfig,
) -> Result<LocalStorageRepository, Box<dyn Error>> {
    std::fs::create_dir_all(&config.data_dir)?;
    let pool = label_backfill::db::init_pool(&config.local_db_path()).await?;
    let repository = LocalStorageRepository::new(pool);
    repository.init_schema().await?;
    Ok(repository)
}

fn open_s3_repository(config: &AppConfig) -> Result<S3Repository, Box<dyn Error>> {
    match (
        &config.s3_bucket,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    ) {
        (Some(bucket), Some(endpoint), Some(access_key), Some(secret_key)) => {
            Ok(S3Repository::new(bucket, endpoint, access_key, secret_key)?)
        }
        _ => Err("S3 store requested but S3_* configuration is not set".into()),
    }
}

/// Resolve a CLI integration name, accepting the single-letter shorthand
/// used operationally (p/s/i/v) alongside the full queue names.
fn resolve_integration(name: &str) -> Result<Integration, Box<dyn Error>> {
    let resolved = match name {
        "p" | "perspective" | "perspective_api" => Integration::PerspectiveApi,
        "s" | "sociopolitical" => Integration::Sociopolitical,
        "i" | "intergroup" => Integration::Intergroup,
        "v" | "valence" => Integration::Valence,
        other => Integration::from_str(other)
            .map_err(|_| format!("unknown integration '{other}'"))?,
    };
    Ok(resolved)
}

fn resolve_integrations(names: &[String]) -> Result<Vec<Integration>, Box<dyn Error>> {
    names.iter().map(|n| resolve_integration(n)).collect()
}

fn validate_date_range(start_date: &str, end_date: &str) -> Result<(), Box<dyn Error>> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d")
        .map_err(|_| format!("invalid start date '{start_date}': expected YYYY-MM-DD"))?;
    let end = NaiveDate::parse_from_str(end_date, "%Y-%m-%d")
        .map_err(|_| format!("invalid end date '{end_date}': expected YYYY-MM-DD"))?;
    if start > end {
        return Err(format!("start date {start_date} is after end date {end_date}").into());
    }
    Ok(())
}

fn confirm_clear(integration: Integration) -> Result<bool, Box<dyn Error>> {
    print!("Clear queues for {integration}? This cannot be undone. [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
