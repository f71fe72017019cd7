//! Observability tests for campaign reconciliation tracing.
//!
//! These tests verify that structured events are emitted for mapping
//! resolution, rewiring, planning and apply.

use std::sync::Arc;

use campaign_core::obs::{
    emit_campaign_applied, emit_hydrate_missing_changeset, emit_mappings_resolved,
    emit_plan_computed, emit_rewire_committed, PlanSpan,
};
use campaign_core::{ApplyCampaignOpts, CampaignService, CampaignsConfig, Operation};
use campaign_state::fakes::MemoryCampaignStore;
use campaign_state::*;
use chrono::Utc;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn test_emitters_log_event_names() {
    emit_mappings_resolved(CampaignSpecId(1), 3, 1);
    emit_rewire_committed(CampaignId(2), 3, 2);
    emit_plan_computed(ChangesetId(7), &[Operation::Push, Operation::Publish]);
    emit_campaign_applied(CampaignId(2), CampaignSpecId(1), 3, false);

    assert!(logs_contain("mappings.resolved"));
    assert!(logs_contain("rewire.committed"));
    assert!(logs_contain("plan.computed"));
    assert!(logs_contain("PUSH,PUBLISH"));
    assert!(logs_contain("campaign.applied"));
}

#[traced_test]
#[test]
fn test_missing_changeset_logs_warning() {
    emit_hydrate_missing_changeset(ChangesetId(99));
    assert!(logs_contain("WARN"));
    assert!(logs_contain("mappings.missing_changeset"));
}

#[traced_test]
#[test]
fn test_plan_span_tags_events() {
    let span = PlanSpan::enter("spec-abc");
    emit_plan_computed(ChangesetId(1), &[]);
    drop(span);
    assert!(logs_contain("campaigns.plan"));
    assert!(logs_contain("spec-abc"));
}

#[traced_test]
#[tokio::test]
async fn test_apply_emits_lifecycle_events() {
    let store = MemoryCampaignStore::new();
    store
        .insert_repo(Repo {
            id: RepoId(1),
            name: "github.com/org/api".to_string(),
            code_host: CodeHostKind::GitHub,
        })
        .unwrap();
    store
        .insert_campaign_spec(CampaignSpec {
            id: CampaignSpecId(1),
            rand_id: "cs-1".to_string(),
            namespace: "org".to_string(),
            name: "observe".to_string(),
            description: String::new(),
            created_at: Utc::now(),
        })
        .unwrap();
    store
        .insert_changeset_spec(ChangesetSpec {
            id: ChangesetSpecId(1),
            rand_id: "spec-1".to_string(),
            campaign_spec_id: Some(CampaignSpecId(1)),
            repo_id: RepoId(1),
            description: ChangesetSpecDescription::Existing {
                external_id: "12".to_string(),
            },
            diff_stat: DiffStat::default(),
            created_at: Utc::now(),
        })
        .unwrap();

    let service = CampaignService::new(Arc::new(store), CampaignsConfig::default());
    service
        .apply_campaign(ApplyCampaignOpts {
            campaign_spec_id: CampaignSpecId(1),
            ensure_campaign_id: None,
        })
        .await
        .unwrap();

    assert!(logs_contain("mappings.resolved"));
    assert!(logs_contain("rewire.committed"));
    assert!(logs_contain("IMPORT"));
    assert!(logs_contain("campaign.applied"));
}
