//! In-memory fake of `CampaignStore`
//!
//! Provides `MemoryCampaignStore`, which satisfies the trait contract without
//! any external dependencies, plus `StoreSnapshot`, the JSON fixture format it
//! loads from and dumps to.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StorageError;
use crate::schema::*;
use crate::storage_traits::*;

/// Serializable image of a whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub repos: Vec<Repo>,
    /// Repositories the caller is not allowed to see.
    #[serde(default)]
    pub hidden_repo_ids: Vec<RepoId>,
    #[serde(default)]
    pub campaign_specs: Vec<CampaignSpec>,
    #[serde(default)]
    pub changeset_specs: Vec<ChangesetSpec>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub changesets: Vec<Changeset>,
}

impl StoreSnapshot {
    pub fn from_json(json: &str) -> StorageResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> StorageResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Default)]
struct State {
    repos: BTreeMap<RepoId, Repo>,
    hidden_repos: BTreeSet<RepoId>,
    campaign_specs: BTreeMap<CampaignSpecId, CampaignSpec>,
    changeset_specs: BTreeMap<ChangesetSpecId, ChangesetSpec>,
    campaigns: BTreeMap<CampaignId, Campaign>,
    changesets: BTreeMap<ChangesetId, Changeset>,
    /// Highest campaign id handed out, stored or only reserved.
    campaign_id_seq: i64,
}

impl State {
    fn next_changeset_id(&self) -> ChangesetId {
        ChangesetId(self.changesets.keys().next_back().map_or(0, |id| id.0) + 1)
    }

    fn next_campaign_id(&mut self) -> CampaignId {
        let stored = self.campaigns.keys().next_back().map_or(0, |id| id.0);
        self.campaign_id_seq = self.campaign_id_seq.max(stored) + 1;
        CampaignId(self.campaign_id_seq)
    }

    fn name_holder(&self, campaign: &Campaign) -> Option<CampaignId> {
        self.campaigns
            .iter()
            .find(|(id, c)| {
                Some(**id) != campaign.id
                    && c.namespace == campaign.namespace
                    && c.name == campaign.name
            })
            .map(|(id, _)| *id)
    }

    /// Scratch copy holding only the tables a commit may touch.
    fn scratch(&self) -> State {
        State {
            campaigns: self.campaigns.clone(),
            changesets: self.changesets.clone(),
            ..State::default()
        }
    }

    /// Apply `writes` to this state, stopping at the first rejected write.
    fn stage_writes(&mut self, writes: Vec<ChangesetWrite>) -> StorageResult<Vec<Changeset>> {
        let now = Utc::now();
        let mut committed = Vec::with_capacity(writes.len());

        for write in writes {
            match write {
                ChangesetWrite::Create(mut changeset) => {
                    if let Some(holder) = self.natural_key_holder(&changeset) {
                        return Err(StorageError::Conflict {
                            entity: "changeset",
                            key: holder.to_string(),
                            reason: "a changeset for this repository and branch already exists"
                                .to_string(),
                        });
                    }
                    changeset.id = self.next_changeset_id();
                    changeset.version = 1;
                    changeset.created_at = now;
                    changeset.updated_at = now;
                    self.changesets.insert(changeset.id, changeset.clone());
                    committed.push(changeset);
                }
                ChangesetWrite::Update(mut changeset) => {
                    let stored = self
                        .changesets
                        .get(&changeset.id)
                        .ok_or_else(|| StorageError::not_found("changeset", changeset.id))?;
                    if stored.version != changeset.version {
                        return Err(StorageError::Conflict {
                            entity: "changeset",
                            key: changeset.id.to_string(),
                            reason: format!(
                                "stale version {} (stored {})",
                                changeset.version, stored.version
                            ),
                        });
                    }
                    changeset.version += 1;
                    changeset.updated_at = now;
                    self.changesets.insert(changeset.id, changeset.clone());
                    committed.push(changeset);
                }
            }
        }
        Ok(committed)
    }

    /// Existing changeset sharing `candidate`'s natural key, if any.
    fn natural_key_holder(&self, candidate: &Changeset) -> Option<ChangesetId> {
        self.changesets
            .values()
            .find(|existing| {
                if existing.repo_id != candidate.repo_id {
                    return false;
                }
                let same_external = candidate.external_id.is_some()
                    && existing.external_id == candidate.external_id;
                let same_branch = candidate.owned_by_campaign_id.is_some()
                    && candidate.external_branch.is_some()
                    && existing.owned_by_campaign_id == candidate.owned_by_campaign_id
                    && existing.external_branch == candidate.external_branch;
                same_external || same_branch
            })
            .map(|existing| existing.id)
    }
}

/// In-memory campaign store backed by ordered maps behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryCampaignStore {
    state: Mutex<State>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> StorageResult<Self> {
        let store = Self::new();
        {
            let mut state = store.lock()?;
            for repo in snapshot.repos {
                state.repos.insert(repo.id, repo);
            }
            state.hidden_repos.extend(snapshot.hidden_repo_ids);
            for spec in snapshot.campaign_specs {
                state.campaign_specs.insert(spec.id, spec);
            }
            for spec in snapshot.changeset_specs {
                state.changeset_specs.insert(spec.id, spec);
            }
            for campaign in snapshot.campaigns {
                let id = campaign.id.ok_or_else(|| {
                    StorageError::Invalid(format!("campaign {} has no id", campaign.name))
                })?;
                state.campaigns.insert(id, campaign);
            }
            for changeset in snapshot.changesets {
                state.changesets.insert(changeset.id, changeset);
            }
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> StorageResult<StoreSnapshot> {
        let state = self.lock()?;
        Ok(StoreSnapshot {
            repos: state.repos.values().cloned().collect(),
            hidden_repo_ids: state.hidden_repos.iter().copied().collect(),
            campaign_specs: state.campaign_specs.values().cloned().collect(),
            changeset_specs: state.changeset_specs.values().cloned().collect(),
            campaigns: state.campaigns.values().cloned().collect(),
            changesets: state.changesets.values().cloned().collect(),
        })
    }

    pub fn insert_repo(&self, repo: Repo) -> StorageResult<()> {
        self.lock()?.repos.insert(repo.id, repo);
        Ok(())
    }

    /// Make `repo_id` invisible to `get_repos_by_ids`.
    pub fn hide_repo(&self, repo_id: RepoId) -> StorageResult<()> {
        self.lock()?.hidden_repos.insert(repo_id);
        Ok(())
    }

    pub fn insert_campaign_spec(&self, spec: CampaignSpec) -> StorageResult<()> {
        self.lock()?.campaign_specs.insert(spec.id, spec);
        Ok(())
    }

    pub fn insert_changeset_spec(&self, spec: ChangesetSpec) -> StorageResult<()> {
        self.lock()?.changeset_specs.insert(spec.id, spec);
        Ok(())
    }

    pub fn delete_changeset_spec(&self, id: ChangesetSpecId) -> StorageResult<()> {
        self.lock()?.changeset_specs.remove(&id);
        Ok(())
    }

    /// Insert or replace a changeset verbatim (no version checks).
    pub fn insert_changeset(&self, changeset: Changeset) -> StorageResult<()> {
        self.lock()?.changesets.insert(changeset.id, changeset);
        Ok(())
    }

    pub fn delete_changeset(&self, id: ChangesetId) -> StorageResult<()> {
        self.lock()?.changesets.remove(&id);
        Ok(())
    }

    pub fn changeset(&self, id: ChangesetId) -> StorageResult<Changeset> {
        self.lock()?
            .changesets
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("changeset", id))
    }

    pub fn changeset_count(&self) -> StorageResult<usize> {
        Ok(self.lock()?.changesets.len())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    async fn get_changeset_spec_by_id(&self, id: ChangesetSpecId) -> StorageResult<ChangesetSpec> {
        self.lock()?
            .changeset_specs
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("changeset spec", id))
    }

    async fn get_changeset_spec_by_rand_id(&self, rand_id: &str) -> StorageResult<ChangesetSpec> {
        self.lock()?
            .changeset_specs
            .values()
            .find(|spec| spec.rand_id == rand_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("changeset spec", rand_id))
    }

    async fn get_changeset_specs_by_ids(
        &self,
        ids: &[ChangesetSpecId],
    ) -> StorageResult<Vec<ChangesetSpec>> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.changeset_specs.get(id).cloned())
            .collect())
    }

    async fn list_changeset_specs(
        &self,
        campaign_spec_id: CampaignSpecId,
    ) -> StorageResult<Vec<ChangesetSpec>> {
        Ok(self
            .lock()?
            .changeset_specs
            .values()
            .filter(|spec| spec.campaign_spec_id == Some(campaign_spec_id))
            .cloned()
            .collect())
    }

    async fn get_campaign_spec(&self, opts: GetCampaignSpecOpts) -> StorageResult<CampaignSpec> {
        let state = self.lock()?;
        match opts {
            GetCampaignSpecOpts::Id(id) => state
                .campaign_specs
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("campaign spec", id)),
            GetCampaignSpecOpts::RandId(rand_id) => state
                .campaign_specs
                .values()
                .find(|spec| spec.rand_id == rand_id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("campaign spec", rand_id)),
        }
    }

    async fn get_campaign(&self, opts: GetCampaignOpts) -> StorageResult<Campaign> {
        let state = self.lock()?;
        match opts {
            GetCampaignOpts::Id(id) => state
                .campaigns
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("campaign", id)),
            GetCampaignOpts::Name { namespace, name } => state
                .campaigns
                .values()
                .find(|c| c.namespace == namespace && c.name == name)
                .cloned()
                .ok_or_else(|| StorageError::not_found("campaign", format!("{namespace}/{name}"))),
        }
    }

    async fn create_campaign(&self, mut campaign: Campaign) -> StorageResult<Campaign> {
        let mut state = self.lock()?;
        if campaign.id.is_some() {
            return Err(StorageError::Invalid(
                "create_campaign called with an already persisted campaign".to_string(),
            ));
        }
        if state.name_holder(&campaign).is_some() {
            return Err(StorageError::Conflict {
                entity: "campaign",
                key: format!("{}/{}", campaign.namespace, campaign.name),
                reason: "name already taken in namespace".to_string(),
            });
        }
        let id = state.next_campaign_id();
        campaign.id = Some(id);
        state.campaigns.insert(id, campaign.clone());
        debug!(campaign_id = %id, "created campaign");
        Ok(campaign)
    }

    async fn update_campaign(&self, mut campaign: Campaign) -> StorageResult<Campaign> {
        let mut state = self.lock()?;
        let id = campaign.id.ok_or_else(|| {
            StorageError::Invalid("update_campaign called with an unpersisted campaign".to_string())
        })?;
        if !state.campaigns.contains_key(&id) {
            return Err(StorageError::not_found("campaign", id));
        }
        campaign.updated_at = Utc::now();
        state.campaigns.insert(id, campaign.clone());
        Ok(campaign)
    }

    async fn get_changesets_by_ids(&self, ids: &[ChangesetId]) -> StorageResult<Vec<Changeset>> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.changesets.get(id).cloned())
            .collect())
    }

    async fn list_changesets(&self, opts: ListChangesetsOpts) -> StorageResult<Vec<Changeset>> {
        Ok(self
            .lock()?
            .changesets
            .values()
            .filter(|cs| opts.campaign_id.map_or(true, |id| cs.is_member_of(id)))
            .filter(|cs| {
                opts.owned_by_campaign_id
                    .map_or(true, |id| cs.owned_by_campaign_id == Some(id))
            })
            .filter(|cs| opts.repo_id.map_or(true, |id| cs.repo_id == id))
            .cloned()
            .collect())
    }

    async fn get_changeset_by_external_id(
        &self,
        repo_id: RepoId,
        external_id: &str,
    ) -> StorageResult<Option<Changeset>> {
        Ok(self
            .lock()?
            .changesets
            .values()
            .find(|cs| cs.repo_id == repo_id && cs.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_repos_by_ids(&self, ids: &[RepoId]) -> StorageResult<Vec<Repo>> {
        let state = self.lock()?;
        Ok(ids
            .iter()
            .filter(|id| !state.hidden_repos.contains(*id))
            .filter_map(|id| state.repos.get(id).cloned())
            .collect())
    }

    async fn commit_changesets(
        &self,
        writes: Vec<ChangesetWrite>,
    ) -> StorageResult<Vec<Changeset>> {
        let mut state = self.lock()?;
        let mut scratch = state.scratch();
        let committed = scratch.stage_writes(writes)?;
        state.changesets = scratch.changesets;
        debug!(writes = committed.len(), "committed changeset writes");
        Ok(committed)
    }

    async fn reserve_campaign_id(&self) -> StorageResult<CampaignId> {
        Ok(self.lock()?.next_campaign_id())
    }

    async fn commit_apply(
        &self,
        mut campaign: Campaign,
        writes: Vec<ChangesetWrite>,
    ) -> StorageResult<(Campaign, Vec<Changeset>)> {
        let mut state = self.lock()?;
        let id = campaign.id.ok_or_else(|| {
            StorageError::Invalid("commit_apply called with a campaign without id".to_string())
        })?;
        if let Some(holder) = state.name_holder(&campaign) {
            return Err(StorageError::Conflict {
                entity: "campaign",
                key: format!("{}/{}", campaign.namespace, campaign.name),
                reason: format!("name already taken by campaign {holder}"),
            });
        }

        let mut scratch = state.scratch();
        let now = Utc::now();
        if !scratch.campaigns.contains_key(&id) {
            campaign.created_at = now;
        }
        campaign.updated_at = now;
        scratch.campaigns.insert(id, campaign.clone());
        let committed = scratch.stage_writes(writes)?;

        state.campaigns = scratch.campaigns;
        state.changesets = scratch.changesets;
        state.campaign_id_seq = state.campaign_id_seq.max(id.0);
        debug!(campaign_id = %id, writes = committed.len(), "committed campaign apply");
        Ok((campaign, committed))
    }
}
