//! Centralised tracing initialisation for campaign binaries.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored,
//! the global subscriber can only be set once per process.
//!
//! Filtering is decided in this order:
//!
//! 1. `CAMPAIGNS_LOG`, a full `EnvFilter` directive string scoped to this
//!    tool (e.g. `campaign_core::rewirer=trace,warn`).
//! 2. `RUST_LOG`, for setups that already export one.
//! 3. The level passed in, applied to the campaign crates only
//!    (`campaign_core`, `campaign_state`, `campaignctl`). Every other target
//!    stays at `warn` or quieter, so `-v` does not surface dependency noise.
//!
//! A directive string that fails to parse falls back to step 3.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "CAMPAIGNS_LOG";

/// Targets that follow the requested level when no directives are set.
const CAMPAIGN_TARGETS: [&str; 3] = ["campaign_core", "campaign_state", "campaignctl"];

/// Initialise the global tracing subscriber.
///
/// * `json` - emit newline-delimited JSON log lines.
/// * `level` - verbosity of the campaign crates when neither
///   `CAMPAIGNS_LOG` nor `RUST_LOG` is set.
pub fn init_tracing(json: bool, level: Level) {
    let filter = log_filter(|key| std::env::var(key).ok(), level);
    let json_layer = json.then(|| fmt::layer().with_target(false).json());
    let text_layer = (!json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .ok();
}

fn log_filter(lookup: impl Fn(&str) -> Option<String>, level: Level) -> EnvFilter {
    EnvFilter::try_new(filter_directives(lookup, level))
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// First non-empty directive string from the environment, or the campaign
/// default for `level`.
fn filter_directives(lookup: impl Fn(&str) -> Option<String>, level: Level) -> String {
    [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_directives(level))
}

fn default_directives(level: Level) -> String {
    let baseline = level.min(Level::WARN);
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once(baseline.as_str().to_ascii_lowercase())
        .chain(CAMPAIGN_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}
