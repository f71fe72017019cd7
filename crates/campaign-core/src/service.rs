//! Campaign service: the reconciliation trigger and the persisting apply.

use std::collections::BTreeSet;
use std::sync::Arc;

use campaign_state::{
    Campaign, CampaignId, CampaignSpec, CampaignSpecId, CampaignStore, Changeset,
    ChangesetSpec, ChangesetSpecId, GetCampaignOpts, GetCampaignSpecOpts, ListChangesetsOpts,
    RepoId,
};
use chrono::Utc;
use futures::future::try_join_all;
use tracing::{debug, instrument};

use crate::config::CampaignsConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::mapping::{MappingFetcher, MappingResolver};
use crate::obs;
use crate::plan::{determine_plan, Plan};
use crate::preview::ChangesetSpecPreview;
use crate::rewirer::ChangesetRewirer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyCampaignOpts {
    pub campaign_spec_id: CampaignSpecId,
    /// When set, the apply fails unless the spec resolves to this campaign.
    pub ensure_campaign_id: Option<CampaignId>,
}

/// Result of applying a campaign spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCampaign {
    pub campaign: Campaign,
    /// One changeset per plan, in the same order.
    pub changesets: Vec<Changeset>,
    pub plans: Vec<Plan>,
    /// The spec was already applied; nothing was rewired.
    pub already_applied: bool,
}

pub struct CampaignService {
    store: Arc<dyn CampaignStore>,
    config: CampaignsConfig,
}

impl CampaignService {
    pub fn new(store: Arc<dyn CampaignStore>, config: CampaignsConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CampaignsConfig {
        &self.config
    }

    /// Resolve the campaign `spec` applies to, pointed at `spec`.
    ///
    /// Returns the campaign and whether it is new. Nothing is persisted.
    pub async fn reconcile_campaign(
        &self,
        spec: &CampaignSpec,
    ) -> ReconcileResult<(Campaign, bool)> {
        reconcile_campaign(self.store.as_ref(), spec).await
    }

    /// Apply a campaign spec: rewire the campaign's changesets, store them
    /// together with the campaign in one atomic commit and plan every one of
    /// them.
    ///
    /// Nothing is stored when mapping or rewiring fails, so the campaign
    /// keeps pointing at its previous spec and the apply can be retried.
    #[instrument(skip(self))]
    pub async fn apply_campaign(
        &self,
        opts: ApplyCampaignOpts,
    ) -> ReconcileResult<AppliedCampaign> {
        let store = self.store.as_ref();
        let spec = store
            .get_campaign_spec(GetCampaignSpecOpts::Id(opts.campaign_spec_id))
            .await?;

        let existing = find_campaign(store, &spec).await?;
        if let Some(expected) = opts.ensure_campaign_id {
            let actual = existing.as_ref().and_then(|c| c.id);
            if actual != Some(expected) {
                return Err(ReconcileError::CampaignMismatch { expected, actual });
            }
        }

        if let Some(campaign) = existing.as_ref().filter(|c| c.campaign_spec_id == spec.id) {
            let campaign_id = persisted_id(campaign)?;
            debug!(campaign_id = %campaign_id, "campaign spec already applied");
            let changesets = applied_changesets(store, campaign_id).await?;
            let current_ids: Vec<Option<ChangesetSpecId>> =
                changesets.iter().map(|cs| cs.current_spec_id).collect();
            let current = self.load_specs(&current_ids).await?;
            let plans = self.plan_all(&changesets, &current).await?;
            obs::emit_campaign_applied(campaign_id, spec.id, changesets.len(), true);
            return Ok(AppliedCampaign {
                campaign: campaign.clone(),
                changesets,
                plans,
                already_applied: true,
            });
        }

        let campaign = match existing {
            Some(mut campaign) => {
                point_at(&mut campaign, &spec);
                campaign
            }
            None => {
                let mut campaign = Campaign::from_spec(&spec);
                campaign.id = Some(store.reserve_campaign_id().await?);
                campaign
            }
        };
        let campaign_id = persisted_id(&campaign)?;

        let mappings = MappingResolver::new(Arc::clone(&self.store))
            .resolve_mappings(Some(campaign_id), spec.id)
            .await?;
        let current: Vec<Option<ChangesetSpec>> =
            mappings.iter().map(|m| m.changeset_spec.clone()).collect();
        let (campaign, changesets) = ChangesetRewirer::new(mappings, campaign)
            .apply(store)
            .await?;
        let plans = self.plan_all(&changesets, &current).await?;

        obs::emit_campaign_applied(campaign_id, spec.id, changesets.len(), false);
        Ok(AppliedCampaign {
            campaign,
            changesets,
            plans,
            already_applied: false,
        })
    }

    /// Previews for every changeset spec of a campaign spec.
    ///
    /// The previews share one campaign resolution, one repository lookup
    /// and one mapping fetch.
    #[instrument(skip(self))]
    pub async fn preview_campaign_spec(
        &self,
        campaign_spec_id: CampaignSpecId,
    ) -> ReconcileResult<Vec<ChangesetSpecPreview>> {
        let store = self.store.as_ref();
        let spec = store
            .get_campaign_spec(GetCampaignSpecOpts::Id(campaign_spec_id))
            .await?;
        let (campaign, _) = reconcile_campaign(store, &spec).await?;
        let specs = store.list_changeset_specs(campaign_spec_id).await?;

        let repo_ids: Vec<RepoId> = specs
            .iter()
            .map(|s| s.repo_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let repos = store.get_repos_by_ids(&repo_ids).await?;

        let fetcher = Arc::new(MappingFetcher::new(
            Arc::clone(&self.store),
            campaign_spec_id,
            campaign.id,
        ));
        Ok(specs
            .into_iter()
            .map(|spec| {
                let repo = repos.iter().find(|r| r.id == spec.repo_id).cloned();
                ChangesetSpecPreview::with_repo(
                    Arc::clone(&self.store),
                    self.config.clone(),
                    spec,
                    repo,
                )
                .with_campaign(campaign.clone())
                .with_mapping_fetcher(Arc::clone(&fetcher))
            })
            .collect())
    }

    async fn load_specs(
        &self,
        ids: &[Option<ChangesetSpecId>],
    ) -> ReconcileResult<Vec<Option<ChangesetSpec>>> {
        try_join_all(ids.iter().map(|id| load_spec(self.store.as_ref(), *id))).await
    }

    /// Plan each changeset against its current spec, loading the previous
    /// specs concurrently.
    async fn plan_all(
        &self,
        changesets: &[Changeset],
        current: &[Option<ChangesetSpec>],
    ) -> ReconcileResult<Vec<Plan>> {
        if changesets.len() != current.len() {
            return Err(ReconcileError::invariant(format!(
                "{} changesets for {} specs",
                changesets.len(),
                current.len()
            )));
        }
        let previous_ids: Vec<Option<ChangesetSpecId>> =
            changesets.iter().map(|cs| cs.previous_spec_id).collect();
        let previous = self.load_specs(&previous_ids).await?;

        changesets
            .iter()
            .zip(current)
            .zip(&previous)
            .map(|((changeset, current), previous)| {
                let plan = determine_plan(previous.as_ref(), current.as_ref(), changeset)?;
                obs::emit_plan_computed(changeset.id, &plan.execution_order());
                Ok(plan)
            })
            .collect()
    }
}

/// The changesets an applied campaign is driving: its members plus the
/// changesets it created that still wait to be detached. Ordered by id.
async fn applied_changesets(
    store: &dyn CampaignStore,
    campaign_id: CampaignId,
) -> ReconcileResult<Vec<Changeset>> {
    let mut changesets = store
        .list_changesets(ListChangesetsOpts {
            campaign_id: Some(campaign_id),
            ..Default::default()
        })
        .await?;
    let detaching = store
        .list_changesets(ListChangesetsOpts {
            owned_by_campaign_id: Some(campaign_id),
            ..Default::default()
        })
        .await?
        .into_iter()
        .filter(|cs| cs.detach_requested && !cs.is_member_of(campaign_id));
    changesets.extend(detaching);
    changesets.sort_by_key(|cs| cs.id);
    Ok(changesets)
}

async fn load_spec(
    store: &dyn CampaignStore,
    id: Option<ChangesetSpecId>,
) -> ReconcileResult<Option<ChangesetSpec>> {
    match id {
        Some(id) => Ok(Some(store.get_changeset_spec_by_id(id).await?)),
        None => Ok(None),
    }
}

/// The persisted campaign with `spec`'s namespace and name, if any.
async fn find_campaign(
    store: &dyn CampaignStore,
    spec: &CampaignSpec,
) -> ReconcileResult<Option<Campaign>> {
    let opts = GetCampaignOpts::Name {
        namespace: spec.namespace.clone(),
        name: spec.name.clone(),
    };
    match store.get_campaign(opts).await {
        Ok(campaign) => Ok(Some(campaign)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn reconcile_campaign(
    store: &dyn CampaignStore,
    spec: &CampaignSpec,
) -> ReconcileResult<(Campaign, bool)> {
    match find_campaign(store, spec).await? {
        Some(mut campaign) => {
            point_at(&mut campaign, spec);
            Ok((campaign, false))
        }
        None => Ok((Campaign::from_spec(spec), true)),
    }
}

fn point_at(campaign: &mut Campaign, spec: &CampaignSpec) {
    campaign.campaign_spec_id = spec.id;
    campaign.description = spec.description.clone();
    campaign.updated_at = Utc::now();
}

fn persisted_id(campaign: &Campaign) -> ReconcileResult<CampaignId> {
    campaign
        .id
        .ok_or_else(|| ReconcileError::invariant("campaign has no id"))
}
