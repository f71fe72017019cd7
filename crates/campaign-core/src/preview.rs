//! Request-scoped preview of what applying one changeset spec would do.
//!
//! A preview never writes. The campaign, the mapping, the previous spec and
//! the plan are each computed at most once per preview, failures included,
//! so every reader of the same preview sees the same answer.

use std::sync::Arc;

use campaign_state::{
    Campaign, CampaignSpecId, CampaignStore, Changeset, ChangesetSpec, ChangesetSpecDescription,
    ChangesetSpecId, ChangesetSpecKind, DiffStat, GetCampaignSpecOpts, Repo,
};
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::config::CampaignsConfig;
use crate::delta::ChangesetSpecDelta;
use crate::error::{ReconcileError, ReconcileResult};
use crate::mapping::{MappingFetcher, MappingResolver, RewirerMapping, RewirerMappings};
use crate::obs::{self, PlanSpan};
use crate::once::ComputeOnce;
use crate::operation::Operation;
use crate::plan::{determine_plan, Plan};
use crate::rewirer::ChangesetRewirer;
use crate::service::reconcile_campaign;

pub struct ChangesetSpecPreview {
    store: Arc<dyn CampaignStore>,
    config: CampaignsConfig,
    spec: ChangesetSpec,
    repo: Option<Repo>,
    mapping_fetcher: Option<Arc<MappingFetcher>>,

    campaign: ComputeOnce<Campaign>,
    mapping: ComputeOnce<RewirerMapping>,
    previous_spec: ComputeOnce<Option<ChangesetSpec>>,
    plan: ComputeOnce<Plan>,
}

impl ChangesetSpecPreview {
    /// Build a preview, resolving the spec's repository through the
    /// access-filtered lookup.
    pub async fn new(
        store: Arc<dyn CampaignStore>,
        config: CampaignsConfig,
        spec: ChangesetSpec,
    ) -> ReconcileResult<Self> {
        let repo = store
            .get_repos_by_ids(&[spec.repo_id])
            .await?
            .into_iter()
            .next();
        Ok(Self::with_repo(store, config, spec, repo))
    }

    /// Build a preview for a spec whose repository was already looked up.
    /// `None` means the caller cannot see it.
    pub fn with_repo(
        store: Arc<dyn CampaignStore>,
        config: CampaignsConfig,
        spec: ChangesetSpec,
        repo: Option<Repo>,
    ) -> Self {
        Self {
            store,
            config,
            spec,
            repo,
            mapping_fetcher: None,
            campaign: ComputeOnce::new(),
            mapping: ComputeOnce::new(),
            previous_spec: ComputeOnce::new(),
            plan: ComputeOnce::new(),
        }
    }

    /// Share a batch mapping fetch with other previews of the same page.
    pub fn with_mapping_fetcher(mut self, fetcher: Arc<MappingFetcher>) -> Self {
        self.mapping_fetcher = Some(fetcher);
        self
    }

    /// Use an already resolved campaign instead of resolving it again.
    pub fn with_campaign(self, campaign: Campaign) -> Self {
        self.campaign.seed(campaign);
        self
    }

    pub fn id(&self) -> &str {
        &self.spec.rand_id
    }

    pub fn kind(&self) -> ChangesetSpecKind {
        self.spec.kind()
    }

    pub fn description(&self) -> &ChangesetSpecDescription {
        &self.spec.description
    }

    pub fn diff_stat(&self) -> DiffStat {
        self.spec.diff_stat
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.spec.expires_at(self.config.changeset_spec_ttl)
    }

    pub fn repo(&self) -> Option<&Repo> {
        self.repo.as_ref()
    }

    /// The spec targets a repository the caller cannot see.
    pub fn is_hidden(&self) -> bool {
        self.repo.is_none()
    }

    pub fn changeset_spec(&self) -> &ChangesetSpec {
        &self.spec
    }

    /// Operations the reconciler would run, in execution order.
    pub async fn operations(&self) -> ReconcileResult<Vec<Operation>> {
        Ok(self.plan().await?.execution_order())
    }

    /// Attribute changes since the previous spec; all false on first apply.
    pub async fn delta(&self) -> ReconcileResult<ChangesetSpecDelta> {
        Ok(self.plan().await?.delta_or_default())
    }

    /// The changeset this spec would drive, if one exists already.
    pub async fn changeset(&self) -> ReconcileResult<Option<Changeset>> {
        Ok(self.mapping().await?.changeset)
    }

    pub async fn plan(&self) -> ReconcileResult<Plan> {
        self.plan.get_or_compute(|| self.compute_plan()).await
    }

    fn campaign_spec_id(&self) -> ReconcileResult<CampaignSpecId> {
        self.spec
            .campaign_spec_id
            .ok_or_else(|| ReconcileError::NotFound {
                entity: "campaign spec",
                key: format!("of changeset spec {}", self.spec.rand_id),
            })
    }

    async fn campaign(&self) -> ReconcileResult<Campaign> {
        self.campaign
            .get_or_compute(|| async {
                let campaign_spec = self
                    .store
                    .get_campaign_spec(GetCampaignSpecOpts::Id(self.campaign_spec_id()?))
                    .await?;
                let (campaign, _) = reconcile_campaign(self.store.as_ref(), &campaign_spec).await?;
                Ok(campaign)
            })
            .await
    }

    async fn mapping(&self) -> ReconcileResult<RewirerMapping> {
        self.mapping
            .get_or_compute(|| async {
                if let Some(fetcher) = &self.mapping_fetcher {
                    return fetcher.for_changeset_spec(self.spec.id).await;
                }
                let campaign = self.campaign().await?;
                let mappings = MappingResolver::new(Arc::clone(&self.store))
                    .resolve_mappings(campaign.id, self.campaign_spec_id()?)
                    .await?;
                mappings
                    .for_changeset_spec(self.spec.id)
                    .cloned()
                    .ok_or_else(|| {
                        ReconcileError::invariant(format!(
                            "mapping not found for spec {}",
                            self.spec.rand_id
                        ))
                    })
            })
            .await
    }

    async fn previous_spec(
        &self,
        id: Option<ChangesetSpecId>,
    ) -> ReconcileResult<Option<ChangesetSpec>> {
        self.previous_spec
            .get_or_compute(|| async {
                match id {
                    Some(id) => Ok(Some(self.store.get_changeset_spec_by_id(id).await?)),
                    None => Ok(None),
                }
            })
            .await
    }

    #[instrument(skip(self), fields(changeset_spec = %self.spec.rand_id))]
    async fn compute_plan(&self) -> ReconcileResult<Plan> {
        let mapping = self.mapping().await?;
        let campaign = self.campaign().await?;

        let outcome =
            ChangesetRewirer::new(RewirerMappings::new(vec![mapping]), campaign).compute()?;
        let [changeset]: [Changeset; 1] = outcome.changesets.try_into().map_err(|_| {
            ReconcileError::NotFound {
                entity: "changeset",
                key: format!("rewired changeset for spec {}", self.spec.rand_id),
            }
        })?;

        let previous = self.previous_spec(changeset.previous_spec_id).await?;

        let _span = PlanSpan::enter(&self.spec.rand_id);
        let plan = determine_plan(previous.as_ref(), Some(&self.spec), &changeset)?;
        obs::emit_plan_computed(changeset.id, &plan.execution_order());
        Ok(plan)
    }
}
