//! scope CLI: inspect streamed trial comparisons from the terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trialscope_cli::{logging, output};
use trialscope_core::filters::DEFAULT_METRIC;
use trialscope_core::models::ModelPatch;
use trialscope_core::polling::poll_experiment;
use trialscope_core::registry::{delete_model_checked, ModelRegistrySettings, ModelSortKey};
use trialscope_core::subscription::subscribe_metric_names;
use trialscope_core::{
    CompareSession, MasterClient, MasterSource, MetricName, MetricType, ScopeConfig,
    Subscription, SubscriptionState, VisualizationFilters,
};
use trialscope_server::{serve, ServerConfig};

#[derive(Parser)]
#[command(
    name = "scope",
    about = "🔭 trialscope: streaming trial comparisons for an experiment tracking master",
    version,
    author
)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true, default_value = "scope.yaml")]
    config: PathBuf,
    /// Master URL (overrides the config file)
    #[arg(long, global = true)]
    master: Option<String>,
    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the REST/SSE server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,
    },
    /// Stream a trial comparison and print the metric matrix
    Compare {
        /// Experiment id (repeatable)
        #[arg(long = "id", required = true)]
        ids: Vec<i64>,
        /// Metric name
        #[arg(long, default_value = DEFAULT_METRIC)]
        metric: String,
        /// Metric type
        #[arg(long = "type", default_value = "validation")]
        metric_type: MetricType,
        /// Maximum number of trials to sample
        #[arg(long)]
        max_trials: Option<u32>,
        /// Print once this many non-empty sample events have been ingested
        #[arg(long, default_value_t = 1)]
        events: u64,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Print the metric names reported by trials
    Metrics {
        /// Trial id (repeatable)
        #[arg(long = "trial", required = true)]
        trials: Vec<i64>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Poll an experiment until it finishes
    Watch {
        /// Experiment id
        id: i64,
        /// Poll interval in milliseconds (defaults to the config value)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Model registry
    Models {
        #[command(subcommand)]
        action: ModelCommands,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List models in the registry
    List {
        /// Filter by name
        #[arg(long)]
        name: Option<String>,
        /// Filter by label (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Filter by owner (repeatable)
        #[arg(long = "user")]
        users: Vec<String>,
        /// Include archived models
        #[arg(long)]
        archived: bool,
        /// Sort key (name, description, creation_time, last_updated_time, num_versions)
        #[arg(long, default_value = "last_updated_time")]
        sort: String,
        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
        #[arg(long, default_value_t = 10)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
    /// Archive a model
    Archive { name: String },
    /// Restore an archived model
    Unarchive { name: String },
    /// Delete a model. Only its owner or an admin may delete it
    Delete {
        name: String,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Rename a model or replace its labels
    Patch {
        name: String,
        /// New model name
        #[arg(long)]
        rename: Option<String>,
        /// New description
        #[arg(long)]
        description: Option<String>,
        /// Replacement label (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,
        /// Remove every label
        #[arg(long, conflicts_with = "labels")]
        clear_labels: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_file.as_deref(), cli.log_json)?;

    let mut config = ScopeConfig::load(&cli.config)?;
    if let Some(master) = cli.master {
        config.master_url = master;
    }

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(config, host, port).await?;
        }
        Commands::Compare { ids, metric, metric_type, max_trials, events, timeout } => {
            let filters = VisualizationFilters {
                metric: MetricName::new(metric, metric_type),
                max_trial: max_trials.unwrap_or(config.max_trials),
                ..Default::default()
            };
            cmd_compare(client(&config), ids, filters, events, Duration::from_secs(timeout)).await?;
        }
        Commands::Metrics { trials, timeout } => {
            cmd_metrics(client(&config), trials, Duration::from_secs(timeout)).await?;
        }
        Commands::Watch { id, interval_ms } => {
            let every = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.poll_interval());
            cmd_watch(client(&config), id, every).await?;
        }
        Commands::Models { action } => {
            cmd_models(client(&config), action).await?;
        }
    }

    Ok(())
}

fn client(config: &ScopeConfig) -> Arc<dyn MasterSource> {
    Arc::new(MasterClient::new(&config.master_url, config.auth_token.clone()))
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_serve(mut config: ScopeConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    println!("🔭 trialscope server");
    println!("   Master:      {}", config.master_url);
    println!("   URL:         http://{}:{}", config.host, config.port);
    println!();

    serve(ServerConfig::new(config)).await?;
    Ok(())
}

async fn cmd_compare(
    source: Arc<dyn MasterSource>,
    ids: Vec<i64>,
    filters: VisualizationFilters,
    events: u64,
    timeout: Duration,
) -> Result<()> {
    let mut session = CompareSession::new(source, ids, filters);
    let mut rx = session.watch();
    session.sync();

    // `view.events` is counted by the ingestion task; watch updates coalesce.
    let wanted = events.max(1);
    let mut last = None;
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            if rx.changed().await.is_err() {
                bail!("subscription closed before any data arrived");
            }
            let state = rx.borrow_and_update().clone();
            match state {
                SubscriptionState::Ready(view) => {
                    session.apply_view_defaults(&view);
                    if view.events >= wanted {
                        return Ok(view);
                    }
                    last = Some(view);
                }
                SubscriptionState::Failed(message) => bail!("sample stream failed: {}", message),
                SubscriptionState::Idle | SubscriptionState::Loading => {}
            }
        }
    })
    .await;
    session.cancel();

    let view = match (outcome, last) {
        (Ok(view), _) => view?,
        (Err(_), Some(view)) => {
            warn!(events = view.events, wanted, "timed out before the requested number of events");
            view
        }
        (Err(_), None) => bail!("no data within {}s", timeout.as_secs()),
    };

    let filters = session.filters();
    println!("Metric: {} ({})", filters.metric.name, filters.metric.metric_type);
    println!(
        "{} trial(s), {} batch column(s), {} event(s), default batch {}",
        view.trial_ids.len(),
        view.batches.len(),
        view.events,
        filters.batch
    );
    println!("{}", output::sample_table(&view));
    if !view.hp_vals.is_empty() {
        println!("── Hyperparameters ─────────────────────");
        println!("{}", output::hparam_table(&view, &filters.hparams));
    }
    Ok(())
}

async fn cmd_metrics(source: Arc<dyn MasterSource>, trials: Vec<i64>, timeout: Duration) -> Result<()> {
    let mut sub = Subscription::new();
    let mut rx = sub.watch();
    subscribe_metric_names(&mut sub, source, trials);

    let names = tokio::time::timeout(timeout, async {
        loop {
            if rx.changed().await.is_err() {
                bail!("subscription closed before any data arrived");
            }
            let state = rx.borrow_and_update().clone();
            match state {
                SubscriptionState::Ready(names) => return Ok(names),
                SubscriptionState::Failed(message) => bail!("metric names stream failed: {}", message),
                SubscriptionState::Idle | SubscriptionState::Loading => {}
            }
        }
    })
    .await;
    sub.cancel();

    let names = match names {
        Ok(names) => names?,
        Err(_) => bail!("no metric names within {}s", timeout.as_secs()),
    };

    if names.metrics.is_empty() {
        println!("No metrics reported yet");
        return Ok(());
    }
    println!(
        "{}",
        output::metric_names_table(&names.metrics, names.searcher_metric.as_ref())
    );
    Ok(())
}

async fn cmd_watch(source: Arc<dyn MasterSource>, id: i64, every: Duration) -> Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message(format!("Experiment {}: fetching ...", id));
    spinner.enable_steady_tick(Duration::from_millis(80));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = poll_experiment(source.as_ref(), id, every, &cancel, |details| {
        spinner.set_message(format!(
            "Experiment {} ({}): {}, {} validation(s)",
            details.experiment.id,
            details.experiment.name,
            details.experiment.state,
            details.validation_history.len(),
        ));
    })
    .await;
    spinner.finish_and_clear();

    let details = match result {
        Ok(Some(details)) => details,
        Ok(None) => {
            info!(id, "watch cancelled");
            return Ok(());
        }
        Err(e) if e.is_not_found() => bail!("Experiment {} not found", id),
        Err(e) => return Err(e.into()),
    };

    println!("Experiment: {} ({})", details.experiment.name, details.experiment.id);
    println!("State:      {}", details.experiment.state);
    if let Some(searcher) = &details.searcher {
        let layout = if details.is_single_trial() { " (single trial)" } else { "" };
        println!("Searcher:   {}{}", searcher, layout);
    }
    if !details.validation_history.is_empty() {
        println!("{}", output::validation_table(&details));
    }
    Ok(())
}

async fn cmd_models(source: Arc<dyn MasterSource>, action: ModelCommands) -> Result<()> {
    match action {
        ModelCommands::List { name, labels, users, archived, sort, asc, limit, offset } => {
            let mut settings = ModelRegistrySettings {
                archived,
                limit,
                offset,
                sort_desc: !asc,
                sort_key: sort.parse::<ModelSortKey>().unwrap_or_default(),
                ..Default::default()
            };
            settings.set_name(name.as_deref().unwrap_or_default());
            settings.set_labels(labels);
            settings.set_users(users);
            cmd_models_list(source, settings).await
        }
        ModelCommands::Archive { name } => {
            source.archive_model(&name).await?;
            println!("✓ Archived model {}", name);
            Ok(())
        }
        ModelCommands::Unarchive { name } => {
            source.unarchive_model(&name).await?;
            println!("✓ Unarchived model {}", name);
            Ok(())
        }
        ModelCommands::Delete { name, yes } => {
            if !yes {
                bail!("refusing to delete model {} without --yes", name);
            }
            delete_model_checked(source.as_ref(), &name).await?;
            println!("✓ Deleted model {}", name);
            Ok(())
        }
        ModelCommands::Patch { name, rename, description, labels, clear_labels } => {
            let patch = ModelPatch {
                name: rename,
                description,
                labels: (clear_labels || !labels.is_empty()).then_some(labels),
            };
            if patch.is_empty() {
                bail!("nothing to update: pass --rename, --description, --label or --clear-labels");
            }
            let model = source.patch_model(&name, patch).await?;
            println!("✓ Updated model {}", model.name);
            if !model.labels.is_empty() {
                println!("   Labels: {}", model.labels.join(", "));
            }
            Ok(())
        }
    }
}

async fn cmd_models_list(source: Arc<dyn MasterSource>, settings: ModelRegistrySettings) -> Result<()> {
    let filters = settings.active_filter_count();
    let list = source.models(settings.to_query()).await?;

    if list.models.is_empty() {
        println!("No models found");
        return Ok(());
    }

    println!(
        "{} of {} model(s){}",
        list.models.len(),
        list.pagination.total.max(list.models.len() as u64),
        if filters > 0 {
            format!(", {} filter(s) active", filters)
        } else {
            String::new()
        }
    );
    println!("{}", output::models_table(&list));
    Ok(())
}
