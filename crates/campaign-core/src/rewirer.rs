//! Rewiring: reconcile which changesets belong to a campaign and which spec
//! each of them follows.
//!
//! [`ChangesetRewirer::compute`] only describes the result; previews use it so
//! that looking at a campaign never changes it. [`ChangesetRewirer::rewire`]
//! commits the same result in one atomic store call, and
//! [`ChangesetRewirer::apply`] commits it together with the campaign.

use campaign_state::{
    Campaign, CampaignId, CampaignStore, Changeset, ChangesetSpec, ChangesetSpecDescription,
    ChangesetWrite, ReconcilerState, Repo,
};
use chrono::Utc;
use tracing::instrument;

use crate::error::{ReconcileError, ReconcileResult};
use crate::mapping::{RewirerMapping, RewirerMappings};
use crate::obs;

/// Changesets produced by a rewiring, one per mapping and in mapping order,
/// plus the writes needed to persist them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewireOutcome {
    pub changesets: Vec<Changeset>,
    /// Pending writes, keyed by position in `changesets`.
    writes: Vec<(usize, ChangesetWrite)>,
}

impl RewireOutcome {
    pub fn writes(&self) -> impl Iterator<Item = &ChangesetWrite> {
        self.writes.iter().map(|(_, write)| write)
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub fn is_noop(&self) -> bool {
        self.writes.is_empty()
    }
}

pub struct ChangesetRewirer {
    mappings: RewirerMappings,
    campaign: Campaign,
}

impl ChangesetRewirer {
    /// `mappings` must be hydrated.
    pub fn new(mappings: RewirerMappings, campaign: Campaign) -> Self {
        Self { mappings, campaign }
    }

    /// Describe the rewiring without persisting anything.
    pub fn compute(&self) -> ReconcileResult<RewireOutcome> {
        let campaign_id = self.campaign.id;
        let mut changesets = Vec::with_capacity(self.mappings.len());
        let mut writes = Vec::new();

        for mapping in &self.mappings {
            let (changeset, write) = match &mapping.changeset_spec_id {
                Some(_) => attach(mapping, campaign_id)?,
                None => detach(mapping, campaign_id)?,
            };
            if let Some(write) = write {
                writes.push((changesets.len(), write));
            }
            changesets.push(changeset);
        }

        check_count(changesets.len(), self.mappings.len())?;
        Ok(RewireOutcome { changesets, writes })
    }

    /// Rewire and commit. Returns one stored changeset per mapping.
    ///
    /// Requires a persisted campaign. Running it again on its own result
    /// writes nothing.
    #[instrument(skip_all, fields(campaign_id = ?self.campaign.id, mappings = self.mappings.len()))]
    pub async fn rewire(&self, store: &dyn CampaignStore) -> ReconcileResult<Vec<Changeset>> {
        let campaign_id = self
            .campaign
            .id
            .ok_or_else(|| ReconcileError::invariant("cannot rewire an unpersisted campaign"))?;

        let outcome = self.compute()?;
        let write_count = outcome.write_count();
        let stored = if outcome.is_noop() {
            Vec::new()
        } else {
            store
                .commit_changesets(outcome.writes().cloned().collect())
                .await?
        };
        let changesets = self.merge(outcome, stored)?;

        obs::emit_rewire_committed(campaign_id, changesets.len(), write_count);
        Ok(changesets)
    }

    /// Rewire and store the campaign in the same atomic commit.
    ///
    /// The campaign needs an id, reserved if it is new. When the commit is
    /// rejected neither the campaign nor any changeset is written, so a
    /// failed apply can simply be retried.
    #[instrument(skip_all, fields(campaign_id = ?self.campaign.id, mappings = self.mappings.len()))]
    pub async fn apply(
        &self,
        store: &dyn CampaignStore,
    ) -> ReconcileResult<(Campaign, Vec<Changeset>)> {
        let campaign_id = self
            .campaign
            .id
            .ok_or_else(|| ReconcileError::invariant("cannot apply a campaign without an id"))?;

        let outcome = self.compute()?;
        let write_count = outcome.write_count();
        let (campaign, stored) = store
            .commit_apply(self.campaign.clone(), outcome.writes().cloned().collect())
            .await?;
        let changesets = self.merge(outcome, stored)?;

        obs::emit_rewire_committed(campaign_id, changesets.len(), write_count);
        Ok((campaign, changesets))
    }

    /// Replace the written entries of `outcome` with their stored versions.
    fn merge(
        &self,
        outcome: RewireOutcome,
        stored: Vec<Changeset>,
    ) -> ReconcileResult<Vec<Changeset>> {
        let RewireOutcome {
            mut changesets,
            writes,
        } = outcome;
        if stored.len() != writes.len() {
            return Err(ReconcileError::invariant(format!(
                "store returned {} changesets for {} writes",
                stored.len(),
                writes.len()
            )));
        }
        for ((position, _), changeset) in writes.into_iter().zip(stored) {
            changesets[position] = changeset;
        }
        check_count(changesets.len(), self.mappings.len())?;
        Ok(changesets)
    }
}

fn check_count(changesets: usize, mappings: usize) -> ReconcileResult<()> {
    if changesets != mappings {
        return Err(ReconcileError::invariant(format!(
            "rewirer returned {changesets} changesets for {mappings} mappings"
        )));
    }
    Ok(())
}

fn attach(
    mapping: &RewirerMapping,
    campaign_id: Option<CampaignId>,
) -> ReconcileResult<(Changeset, Option<ChangesetWrite>)> {
    let spec = mapping
        .changeset_spec
        .as_ref()
        .ok_or_else(|| ReconcileError::invariant("rewiring an unhydrated mapping"))?;
    let repo = mapping
        .repo
        .as_ref()
        .ok_or(ReconcileError::RepoNotAccessible {
            repo_id: mapping.repo_id,
        })?;

    match &mapping.changeset {
        None => {
            let changeset = new_changeset(spec, repo, campaign_id);
            Ok((changeset.clone(), Some(ChangesetWrite::Create(changeset))))
        }
        Some(existing) => {
            if existing.repo_id != spec.repo_id {
                return Err(ReconcileError::invariant(format!(
                    "changeset {} is in repository {} but spec {} targets repository {}",
                    existing.id, existing.repo_id, spec.rand_id, spec.repo_id
                )));
            }
            let mut changeset = existing.clone();
            let mut changed = false;
            if let Some(id) = campaign_id {
                changed |= changeset.campaign_ids.insert(id);
            }
            if changeset.detach_requested {
                changeset.detach_requested = false;
                changed = true;
            }
            if changeset.current_spec_id != Some(spec.id) {
                changeset.previous_spec_id = changeset.current_spec_id;
                changeset.current_spec_id = Some(spec.id);
                changed = true;
            }
            if !changed {
                return Ok((changeset, None));
            }
            enqueue(&mut changeset);
            Ok((changeset.clone(), Some(ChangesetWrite::Update(changeset))))
        }
    }
}

fn detach(
    mapping: &RewirerMapping,
    campaign_id: Option<CampaignId>,
) -> ReconcileResult<(Changeset, Option<ChangesetWrite>)> {
    let existing = mapping.changeset.as_ref().ok_or_else(|| {
        ReconcileError::invariant("mapping has neither a changeset spec nor a changeset")
    })?;
    let mut changeset = existing.clone();

    // Changesets in repositories the caller cannot see are left alone.
    if mapping.repo.is_none() {
        return Ok((changeset, None));
    }

    let removed = campaign_id.is_some_and(|id| changeset.campaign_ids.remove(&id));
    if !removed {
        return Ok((changeset, None));
    }
    if changeset.campaign_ids.is_empty() {
        changeset.detach_requested = true;
        enqueue(&mut changeset);
    }
    Ok((changeset.clone(), Some(ChangesetWrite::Update(changeset))))
}

fn new_changeset(spec: &ChangesetSpec, repo: &Repo, campaign_id: Option<CampaignId>) -> Changeset {
    let mut changeset = Changeset::unpublished(repo);
    changeset.current_spec_id = Some(spec.id);
    match &spec.description {
        ChangesetSpecDescription::Branch(branch) => {
            changeset.external_branch = Some(branch.head_ref.clone());
            changeset.base_ref = Some(branch.base_ref.clone());
            changeset.owned_by_campaign_id = campaign_id;
        }
        ChangesetSpecDescription::Existing { external_id } => {
            changeset.external_id = Some(external_id.clone());
            changeset.unsynced = true;
        }
    }
    if let Some(id) = campaign_id {
        changeset.campaign_ids.insert(id);
    }
    changeset
}

fn enqueue(changeset: &mut Changeset) {
    changeset.reconciler_state = ReconcilerState::Queued;
    changeset.updated_at = Utc::now();
}
