//! Storage trait definitions for campaign reconciliation
//!
//! `CampaignStore` is the only way the reconciliation core reaches
//! persistent state. It is async and backend-agnostic; an in-memory fake is
//! provided in the `fakes` module.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::schema::{
    Campaign, CampaignId, CampaignSpec, CampaignSpecId, Changeset, ChangesetId, ChangesetSpec,
    ChangesetSpecId, Repo, RepoId,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Lookup key for a campaign spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetCampaignSpecOpts {
    Id(CampaignSpecId),
    RandId(String),
}

/// Lookup key for a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetCampaignOpts {
    Id(CampaignId),
    Name { namespace: String, name: String },
}

/// Filter for [`CampaignStore::list_changesets`]. Filters combine with AND;
/// an empty filter lists every changeset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListChangesetsOpts {
    /// Only changesets that are currently members of this campaign.
    pub campaign_id: Option<CampaignId>,
    /// Only changesets created by this campaign.
    pub owned_by_campaign_id: Option<CampaignId>,
    pub repo_id: Option<RepoId>,
}

/// One write of an atomic changeset commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangesetWrite {
    /// Insert a new changeset. Its `id` and `version` are assigned by the
    /// store. Rejected with `Conflict` when a changeset with the same natural
    /// key (repo + external id, or repo + owner + head ref) already exists.
    Create(Changeset),
    /// Replace an existing changeset. `version` must match the stored
    /// version, otherwise the commit is rejected with `Conflict`.
    Update(Changeset),
}

/// Campaign store.
///
/// Guarantees:
/// - Batch lookups silently omit missing keys; single lookups return
///   `StorageError::NotFound`.
/// - `get_repos_by_ids` omits repositories the caller may not see, exactly as
///   if they did not exist.
/// - `commit_changesets` and `commit_apply` apply all writes or none.
/// - Reserved campaign ids are never handed out twice.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_changeset_spec_by_id(&self, id: ChangesetSpecId) -> StorageResult<ChangesetSpec>;

    async fn get_changeset_spec_by_rand_id(&self, rand_id: &str) -> StorageResult<ChangesetSpec>;

    /// Batch lookup; missing ids are omitted. Result order follows `ids`.
    async fn get_changeset_specs_by_ids(
        &self,
        ids: &[ChangesetSpecId],
    ) -> StorageResult<Vec<ChangesetSpec>>;

    /// Every spec of one campaign-spec generation, ordered by id.
    async fn list_changeset_specs(
        &self,
        campaign_spec_id: CampaignSpecId,
    ) -> StorageResult<Vec<ChangesetSpec>>;

    async fn get_campaign_spec(&self, opts: GetCampaignSpecOpts) -> StorageResult<CampaignSpec>;

    async fn get_campaign(&self, opts: GetCampaignOpts) -> StorageResult<Campaign>;

    /// Persist a new campaign and return it with its assigned id.
    async fn create_campaign(&self, campaign: Campaign) -> StorageResult<Campaign>;

    async fn update_campaign(&self, campaign: Campaign) -> StorageResult<Campaign>;

    /// Batch lookup; missing ids are omitted. Result order follows `ids`.
    async fn get_changesets_by_ids(&self, ids: &[ChangesetId]) -> StorageResult<Vec<Changeset>>;

    /// Changesets matching `opts`, ordered by id.
    async fn list_changesets(&self, opts: ListChangesetsOpts) -> StorageResult<Vec<Changeset>>;

    async fn get_changeset_by_external_id(
        &self,
        repo_id: RepoId,
        external_id: &str,
    ) -> StorageResult<Option<Changeset>>;

    /// Access-filtered batch lookup of repositories.
    async fn get_repos_by_ids(&self, ids: &[RepoId]) -> StorageResult<Vec<Repo>>;

    /// Atomically apply `writes`, returning the stored changesets in the
    /// same order.
    async fn commit_changesets(&self, writes: Vec<ChangesetWrite>)
        -> StorageResult<Vec<Changeset>>;

    /// Allocate an id for a campaign that is not stored yet. The campaign
    /// becomes visible only once [`CampaignStore::commit_apply`] stores it.
    async fn reserve_campaign_id(&self) -> StorageResult<CampaignId>;

    /// Atomically store `campaign` (inserting it when its id is not stored
    /// yet) together with `writes`. Nothing is written when either is
    /// rejected. A name already taken by another campaign is a `Conflict`.
    async fn commit_apply(
        &self,
        campaign: Campaign,
        writes: Vec<ChangesetWrite>,
    ) -> StorageResult<(Campaign, Vec<Changeset>)>;
}
