//! Structured observability hooks for campaign reconciliation.
//!
//! This module provides:
//! - Spec-scoped tracing spans via the `PlanSpan` RAII guard
//! - Emission functions for mapping, rewiring, planning and apply events
//!
//! Events are emitted at `info!` level (configurable via `CAMPAIGNS_LOG`).
//! For JSON output, set `CAMPAIGNS_LOG_FORMAT=json`.

use campaign_state::{CampaignId, CampaignSpecId, ChangesetId};
use tracing::info;

use crate::operation::Operation;

/// RAII guard that enters a spec-scoped span while a plan is computed.
///
/// # Example
///
/// ```ignore
/// let _span = PlanSpan::enter("4f1c2e...");
/// // tracing calls now carry changeset_spec = "4f1c2e..."
/// ```
pub struct PlanSpan {
    _span: tracing::span::EnteredSpan,
}

impl PlanSpan {
    /// Create and enter a span tagged with the spec's external id.
    pub fn enter(changeset_spec: &str) -> Self {
        let span = tracing::info_span!("campaigns.plan", changeset_spec = %changeset_spec);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: mappings resolved for a campaign-spec generation.
pub fn emit_mappings_resolved(campaign_spec_id: CampaignSpecId, mappings: usize, detached: usize) {
    info!(
        event = "mappings.resolved",
        campaign_spec_id = %campaign_spec_id,
        mappings = mappings,
        detached = detached,
    );
}

/// Emit event: a mapped changeset no longer exists (warning level).
pub fn emit_hydrate_missing_changeset(changeset_id: ChangesetId) {
    tracing::warn!(event = "mappings.missing_changeset", changeset_id = %changeset_id);
}

/// Emit event: rewired changesets committed to the store.
pub fn emit_rewire_committed(campaign_id: CampaignId, changesets: usize, writes: usize) {
    info!(
        event = "rewire.committed",
        campaign_id = %campaign_id,
        changesets = changesets,
        writes = writes,
    );
}

/// Emit event: plan computed for one changeset.
pub fn emit_plan_computed(changeset_id: ChangesetId, ops: &[Operation]) {
    let ops = ops
        .iter()
        .map(|op| op.as_str())
        .collect::<Vec<_>>()
        .join(",");
    info!(event = "plan.computed", changeset_id = %changeset_id, ops = %ops);
}

/// Emit event: campaign spec applied.
pub fn emit_campaign_applied(
    campaign_id: CampaignId,
    campaign_spec_id: CampaignSpecId,
    changesets: usize,
    already_applied: bool,
) {
    info!(
        event = "campaign.applied",
        campaign_id = %campaign_id,
        campaign_spec_id = %campaign_spec_id,
        changesets = changesets,
        already_applied = already_applied,
    );
}
