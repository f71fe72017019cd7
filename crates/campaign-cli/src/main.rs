//! Campaigns CLI
//!
//! The `campaignctl` command previews and applies campaign specs against a
//! JSON store fixture.
//!
//! ## Commands
//!
//! - `preview`: Show the operations and attribute changes each changeset spec would cause
//! - `apply`: Apply a campaign spec, print the resulting plans, optionally save the fixture

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use campaign_core::{
    ApplyCampaignOpts, CampaignService, CampaignsConfig, ChangesetSpecDelta, Operation,
};
use campaign_state::fakes::{MemoryCampaignStore, StoreSnapshot};
use campaign_state::{CampaignId, CampaignStore, GetCampaignSpecOpts};

#[derive(Parser)]
#[command(name = "campaignctl")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Preview and apply campaign specs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Store fixture (JSON snapshot) to operate on
    #[arg(long, global = true, env = "CAMPAIGNS_FIXTURE", default_value = "campaigns.json")]
    fixture: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what applying a campaign spec would do, without writing
    Preview {
        /// Random id of the campaign spec
        #[arg(long)]
        campaign_spec: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Apply a campaign spec and print the planned operations
    Apply {
        /// Random id of the campaign spec
        #[arg(long)]
        campaign_spec: String,

        /// Fail unless the spec applies to this campaign
        #[arg(long)]
        ensure_campaign: Option<i64>,

        /// Save the updated store back to the fixture
        #[arg(long)]
        write: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct PreviewEntry {
    changeset_spec: String,
    repo: Option<String>,
    hidden: bool,
    changeset_id: Option<i64>,
    operations: Vec<Operation>,
    delta: ChangesetSpecDelta,
}

#[derive(Debug, Serialize)]
struct AppliedEntry {
    changeset_id: i64,
    changeset_spec_id: Option<i64>,
    operations: Vec<Operation>,
    delta: Option<ChangesetSpecDelta>,
}

#[derive(Debug, Serialize)]
struct ApplyOutput {
    campaign_id: Option<i64>,
    already_applied: bool,
    changesets: Vec<AppliedEntry>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CampaignsConfig::from_env().map_err(anyhow::Error::msg)?;
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        config.log_level
    };
    campaign_core::init_tracing(cli.json || config.log_json, level);

    let store = Arc::new(load_fixture(&cli.fixture)?);

    match cli.command {
        Commands::Preview {
            campaign_spec,
            output,
        } => cmd_preview(store, config, &campaign_spec, output).await,
        Commands::Apply {
            campaign_spec,
            ensure_campaign,
            write,
            output,
        } => {
            cmd_apply(store.clone(), config, &campaign_spec, ensure_campaign, output).await?;
            if write {
                save_fixture(&store, &cli.fixture)?;
                info!(fixture = %cli.fixture.display(), "fixture updated");
            }
            Ok(())
        }
    }
}

fn load_fixture(path: &Path) -> Result<MemoryCampaignStore> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture: {:?}", path))?;
    let snapshot =
        StoreSnapshot::from_json(&content).with_context(|| format!("Invalid fixture {:?}", path))?;
    MemoryCampaignStore::from_snapshot(snapshot).context("Failed to load fixture into store")
}

fn save_fixture(store: &MemoryCampaignStore, path: &Path) -> Result<()> {
    let json = store.snapshot()?.to_json_pretty()?;
    std::fs::write(path, json).with_context(|| format!("Failed to write fixture: {:?}", path))
}

async fn build_preview(
    store: Arc<MemoryCampaignStore>,
    config: CampaignsConfig,
    campaign_spec: &str,
) -> Result<Vec<PreviewEntry>> {
    let spec = store
        .get_campaign_spec(GetCampaignSpecOpts::RandId(campaign_spec.to_string()))
        .await
        .with_context(|| format!("Campaign spec {} not found", campaign_spec))?;
    let service = CampaignService::new(store, config);
    let previews = service.preview_campaign_spec(spec.id).await?;

    let mut entries = Vec::with_capacity(previews.len());
    for preview in &previews {
        let changeset = preview.changeset().await?;
        // Specs in repositories the caller cannot see are listed without a plan.
        let (operations, delta) = if preview.is_hidden() {
            (Vec::new(), ChangesetSpecDelta::default())
        } else {
            (preview.operations().await?, preview.delta().await?)
        };
        entries.push(PreviewEntry {
            changeset_spec: preview.id().to_string(),
            repo: preview.repo().map(|r| r.name.clone()),
            hidden: preview.is_hidden(),
            changeset_id: changeset.map(|c| c.id.0),
            operations,
            delta,
        });
    }
    Ok(entries)
}

async fn cmd_preview(
    store: Arc<MemoryCampaignStore>,
    config: CampaignsConfig,
    campaign_spec: &str,
    output: OutputFormat,
) -> Result<()> {
    let entries = build_preview(store, config, campaign_spec).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No changeset specs in {}", campaign_spec);
            }
            for entry in &entries {
                println!(
                    "{} {} [{}]",
                    entry.changeset_spec,
                    entry.repo.as_deref().unwrap_or("(hidden)"),
                    render_operations(&entry.operations)
                );
                let changed = render_delta(&entry.delta);
                if !changed.is_empty() {
                    println!("  changed: {}", changed);
                }
            }
        }
    }
    Ok(())
}

async fn build_apply(
    store: Arc<MemoryCampaignStore>,
    config: CampaignsConfig,
    campaign_spec: &str,
    ensure_campaign: Option<i64>,
) -> Result<ApplyOutput> {
    let spec = store
        .get_campaign_spec(GetCampaignSpecOpts::RandId(campaign_spec.to_string()))
        .await
        .with_context(|| format!("Campaign spec {} not found", campaign_spec))?;
    let service = CampaignService::new(store, config);
    let applied = service
        .apply_campaign(ApplyCampaignOpts {
            campaign_spec_id: spec.id,
            ensure_campaign_id: ensure_campaign.map(CampaignId),
        })
        .await
        .with_context(|| format!("Failed to apply campaign spec {}", campaign_spec))?;

    let changesets = applied
        .changesets
        .iter()
        .zip(&applied.plans)
        .map(|(changeset, plan)| AppliedEntry {
            changeset_id: changeset.id.0,
            changeset_spec_id: plan.changeset_spec_id.map(|id| id.0),
            operations: plan.execution_order(),
            delta: plan.delta,
        })
        .collect();
    Ok(ApplyOutput {
        campaign_id: applied.campaign.id.map(|id| id.0),
        already_applied: applied.already_applied,
        changesets,
    })
}

async fn cmd_apply(
    store: Arc<MemoryCampaignStore>,
    config: CampaignsConfig,
    campaign_spec: &str,
    ensure_campaign: Option<i64>,
    output: OutputFormat,
) -> Result<()> {
    let applied = build_apply(store, config, campaign_spec, ensure_campaign).await?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&applied)?),
        OutputFormat::Text => {
            let campaign = applied
                .campaign_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            if applied.already_applied {
                println!("Campaign {} already at {}", campaign, campaign_spec);
            } else {
                println!("Applied {} to campaign {}", campaign_spec, campaign);
            }
            for entry in &applied.changesets {
                println!(
                    "  changeset {} [{}]",
                    entry.changeset_id,
                    render_operations(&entry.operations)
                );
            }
        }
    }
    Ok(())
}

fn render_operations(ops: &[Operation]) -> String {
    if ops.is_empty() {
        return "no-op".to_string();
    }
    ops.iter()
        .map(|op| op.as_str().to_lowercase())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_delta(delta: &ChangesetSpecDelta) -> String {
    let flags = [
        (delta.title_changed, "title"),
        (delta.body_changed, "body"),
        (delta.undraft, "undraft"),
        (delta.base_ref_changed, "base ref"),
        (delta.diff_changed, "diff"),
        (delta.commit_message_changed, "commit message"),
        (delta.author_name_changed, "author name"),
        (delta.author_email_changed, "author email"),
    ];
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}
