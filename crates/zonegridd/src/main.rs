//! zonegridd: the zonegrid operator binary.
//!
//! Runs one scheduling pass from files, or opens a build plan:
//! - `select` loads capability reports and a request spec, and prints
//!   the ranked candidates (optionally scrubbed into sealed plans)
//! - `inspect-blob` decodes a build plan with the configured key
//!
//! There is no wire client in this binary; configured child zones are
//! treated as unreachable and skipped.
//!
//! # Usage
//!
//! ```text
//! zonegridd select --config zonegrid.toml --hosts hosts.json --request request.json
//! zonegridd inspect-blob --config zonegrid.toml 01a4...
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use zonegrid_core::{RequestContext, SchedulerConfig};
use zonegrid_federation::{
    BuildPlanCodec, ZoneClient, ZoneClientError, ZoneCredentials, ZoneFuture, ZoneSession,
    scrub_build_plan,
};
use zonegrid_placement::{CapabilityReport, WeightedHost};
use zonegrid_scheduler::{ChannelDispatch, SchedulerManager};
use zonegrid_state::{RequestSpec, StateStore};

#[derive(Parser)]
#[command(name = "zonegridd", about = "zonegrid distributed scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scheduling pass and print the ranked candidates.
    Select {
        /// Scheduler configuration (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Capability reports: JSON object of host name → report.
        #[arg(long)]
        hosts: PathBuf,

        /// Request spec (JSON).
        #[arg(long)]
        request: PathBuf,

        /// Data directory holding zones and instance types. In-memory
        /// when omitted.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Print sealed `{weight, blob}` plans instead of raw candidates.
        #[arg(long)]
        scrub: bool,
    },
    /// Decode a build plan.
    InspectBlob {
        /// Scheduler configuration (TOML) holding the encryption key.
        #[arg(long)]
        config: PathBuf,

        /// Hex build plan.
        blob: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,zonegrid=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Select {
            config,
            hosts,
            request,
            data_dir,
            scrub,
        } => run_select(&config, &hosts, &request, data_dir.as_deref(), scrub).await,
        Command::InspectBlob { config, blob } => inspect_blob(&config, &blob),
    }
}

async fn run_select(
    config_path: &Path,
    hosts_path: &Path,
    request_path: &Path,
    data_dir: Option<&Path>,
    scrub: bool,
) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_file(config_path)?;
    let reports: BTreeMap<String, CapabilityReport> = read_json(hosts_path)?;
    let spec: RequestSpec = read_json(request_path)?;

    let store = match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            StateStore::open(&dir.join("zonegrid.redb"))?
        }
        None => StateStore::open_in_memory()?,
    };

    let (dispatch, _casts) = ChannelDispatch::new();
    let manager = SchedulerManager::new(config, store, Arc::new(OfflineZoneClient), Arc::new(dispatch))?;
    for (host, report) in reports {
        manager.update_service_capabilities("compute", &host, report);
    }
    info!(hosts = manager.get_host_list().len(), "capability reports loaded");

    let ctx = RequestContext::admin();
    let records = manager.select(&ctx, &spec).await?;
    info!(candidates = records.len(), "scheduling pass complete");

    let output = if scrub {
        let codec = manager
            .scheduler()
            .build_plan_codec()
            .context("build plan encryption key is not set")?;
        let hosts: Vec<WeightedHost> = records
            .into_iter()
            .map(|r| WeightedHost::from_record(r, "compute"))
            .collect();
        serde_json::to_string_pretty(&scrub_build_plan(&hosts, codec)?)?
    } else {
        serde_json::to_string_pretty(&records)?
    };
    println!("{output}");
    Ok(())
}

fn inspect_blob(config_path: &Path, blob: &str) -> anyhow::Result<()> {
    let config = SchedulerConfig::from_file(config_path)?;
    let key = config
        .encryption_key()
        .context("build plan encryption key is not set")?;
    let plan = BuildPlanCodec::new(key)?.decode(blob)?;
    println!("{}", serde_json::to_string_pretty(&plan.to_record())?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Stands in for a wire client: every zone is unreachable.
struct OfflineZoneClient;

impl ZoneClient for OfflineZoneClient {
    fn authenticate<'a>(
        &'a self,
        api_url: &'a str,
        _credentials: &'a ZoneCredentials,
    ) -> ZoneFuture<'a, Box<dyn ZoneSession>> {
        Box::pin(async move {
            Err(ZoneClientError::Transport(format!(
                "no zone client available for {api_url}"
            )))
        })
    }
}
