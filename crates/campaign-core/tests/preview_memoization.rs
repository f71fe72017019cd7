//! Preview memoization and failure caching.
//!
//! Uses a store wrapper that counts lookups and can inject failures, so the
//! tests can assert how often each memoized sub-computation reached the
//! store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use campaign_core::{
    CampaignService, CampaignsConfig, ChangesetRewirer, ChangesetSpecPreview, MappingFetcher,
    MappingResolver, Operation, ReconcileError,
};
use campaign_state::fakes::MemoryCampaignStore;
use campaign_state::*;
use chrono::{Duration, Utc};
use futures::future::join_all;

#[derive(Default)]
struct Counters {
    campaign_spec_lookups: AtomicUsize,
    changeset_spec_lookups: AtomicUsize,
    spec_list_lookups: AtomicUsize,
    commits: AtomicUsize,
}

struct InstrumentedStore {
    inner: MemoryCampaignStore,
    counters: Counters,
    fail_campaign_spec: AtomicBool,
    drop_committed: AtomicBool,
}

impl InstrumentedStore {
    fn new(inner: MemoryCampaignStore) -> Self {
        Self {
            inner,
            counters: Counters::default(),
            fail_campaign_spec: AtomicBool::new(false),
            drop_committed: AtomicBool::new(false),
        }
    }

    fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CampaignStore for InstrumentedStore {
    async fn get_changeset_spec_by_id(&self, id: ChangesetSpecId) -> StorageResult<ChangesetSpec> {
        self.counters
            .changeset_spec_lookups
            .fetch_add(1, Ordering::SeqCst);
        self.inner.get_changeset_spec_by_id(id).await
    }

    async fn get_changeset_spec_by_rand_id(&self, rand_id: &str) -> StorageResult<ChangesetSpec> {
        self.inner.get_changeset_spec_by_rand_id(rand_id).await
    }

    async fn get_changeset_specs_by_ids(
        &self,
        ids: &[ChangesetSpecId],
    ) -> StorageResult<Vec<ChangesetSpec>> {
        self.inner.get_changeset_specs_by_ids(ids).await
    }

    async fn list_changeset_specs(
        &self,
        campaign_spec_id: CampaignSpecId,
    ) -> StorageResult<Vec<ChangesetSpec>> {
        self.counters.spec_list_lookups.fetch_add(1, Ordering::SeqCst);
        // Widen the window for concurrent readers.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.inner.list_changeset_specs(campaign_spec_id).await
    }

    async fn get_campaign_spec(&self, opts: GetCampaignSpecOpts) -> StorageResult<CampaignSpec> {
        self.counters
            .campaign_spec_lookups
            .fetch_add(1, Ordering::SeqCst);
        if self.fail_campaign_spec.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        self.inner.get_campaign_spec(opts).await
    }

    async fn get_campaign(&self, opts: GetCampaignOpts) -> StorageResult<Campaign> {
        self.inner.get_campaign(opts).await
    }

    async fn create_campaign(&self, campaign: Campaign) -> StorageResult<Campaign> {
        self.inner.create_campaign(campaign).await
    }

    async fn update_campaign(&self, campaign: Campaign) -> StorageResult<Campaign> {
        self.inner.update_campaign(campaign).await
    }

    async fn get_changesets_by_ids(&self, ids: &[ChangesetId]) -> StorageResult<Vec<Changeset>> {
        self.inner.get_changesets_by_ids(ids).await
    }

    async fn list_changesets(&self, opts: ListChangesetsOpts) -> StorageResult<Vec<Changeset>> {
        self.inner.list_changesets(opts).await
    }

    async fn get_changeset_by_external_id(
        &self,
        repo_id: RepoId,
        external_id: &str,
    ) -> StorageResult<Option<Changeset>> {
        self.inner
            .get_changeset_by_external_id(repo_id, external_id)
            .await
    }

    async fn get_repos_by_ids(&self, ids: &[RepoId]) -> StorageResult<Vec<Repo>> {
        self.inner.get_repos_by_ids(ids).await
    }

    async fn commit_changesets(
        &self,
        writes: Vec<ChangesetWrite>,
    ) -> StorageResult<Vec<Changeset>> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        let mut committed = self.inner.commit_changesets(writes).await?;
        if self.drop_committed.load(Ordering::SeqCst) {
            committed.pop();
        }
        Ok(committed)
    }

    async fn reserve_campaign_id(&self) -> StorageResult<CampaignId> {
        self.inner.reserve_campaign_id().await
    }

    async fn commit_apply(
        &self,
        campaign: Campaign,
        writes: Vec<ChangesetWrite>,
    ) -> StorageResult<(Campaign, Vec<Changeset>)> {
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        let (campaign, mut committed) = self.inner.commit_apply(campaign, writes).await?;
        if self.drop_committed.load(Ordering::SeqCst) {
            committed.pop();
        }
        Ok((campaign, committed))
    }
}

// ---- Fixtures ----

fn repo() -> Repo {
    Repo {
        id: RepoId(1),
        name: "github.com/org/service".to_string(),
        code_host: CodeHostKind::GitHub,
    }
}

fn campaign_spec(id: i64) -> CampaignSpec {
    CampaignSpec {
        id: CampaignSpecId(id),
        rand_id: format!("campaign-spec-{id}"),
        namespace: "org".to_string(),
        name: "bump-deps".to_string(),
        description: String::new(),
        created_at: Utc::now(),
    }
}

fn branch_spec(
    id: i64,
    campaign_spec_id: Option<i64>,
    head_ref: &str,
    title: &str,
) -> ChangesetSpec {
    ChangesetSpec {
        id: ChangesetSpecId(id),
        rand_id: format!("changeset-spec-{id}"),
        campaign_spec_id: campaign_spec_id.map(CampaignSpecId),
        repo_id: RepoId(1),
        description: ChangesetSpecDescription::Branch(BranchDescription {
            base_ref: "refs/heads/main".to_string(),
            base_rev: "abc123".to_string(),
            head_ref: head_ref.to_string(),
            title: title.to_string(),
            body: String::new(),
            commits: vec![CommitDescription {
                message: "Bump deps".to_string(),
                diff: "-1.0\n+1.1\n".to_string(),
                author_name: "Campaigns".to_string(),
                author_email: "campaigns@example.com".to_string(),
            }],
            published: PublishedValue::Published,
        }),
        diff_stat: DiffStat {
            added: 1,
            changed: 0,
            deleted: 1,
        },
        created_at: Utc::now(),
    }
}

/// Campaign applied at generation 1 with one open changeset, and a pending
/// generation 2 whose spec retitles it.
async fn applied_store() -> (Arc<InstrumentedStore>, ChangesetSpec) {
    let inner = MemoryCampaignStore::new();
    inner.insert_repo(repo()).unwrap();
    inner.insert_campaign_spec(campaign_spec(1)).unwrap();
    inner.insert_campaign_spec(campaign_spec(2)).unwrap();
    inner
        .insert_changeset_spec(branch_spec(10, Some(1), "refs/heads/bump", "Bump deps"))
        .unwrap();
    let next = branch_spec(20, Some(2), "refs/heads/bump", "Bump dependencies");
    inner.insert_changeset_spec(next.clone()).unwrap();

    let store = Arc::new(InstrumentedStore::new(inner));
    let campaign = store
        .create_campaign(Campaign::from_spec(&campaign_spec(1)))
        .await
        .unwrap();
    let mappings = MappingResolver::new(store.clone())
        .resolve_mappings(campaign.id, CampaignSpecId(1))
        .await
        .unwrap();
    let changesets = ChangesetRewirer::new(mappings, campaign)
        .rewire(store.as_ref())
        .await
        .unwrap();

    let mut cs = changesets[0].clone();
    cs.publication_state = PublicationState::Published;
    cs.external_state = Some(ExternalState::Open);
    cs.reconciler_state = ReconcilerState::Completed;
    store.inner.insert_changeset(cs).unwrap();

    (store, next)
}

// ---- Tests ----

#[tokio::test]
async fn preview_plans_retitle_without_writing() {
    let (store, next) = applied_store().await;
    let commits_before = InstrumentedStore::count(&store.counters.commits);

    let preview = ChangesetSpecPreview::new(store.clone(), CampaignsConfig::default(), next)
        .await
        .unwrap();
    assert!(!preview.is_hidden());
    assert_eq!(preview.id(), "changeset-spec-20");
    assert_eq!(preview.kind(), ChangesetSpecKind::Branch);
    assert_eq!(preview.expires_at(), None);

    assert_eq!(preview.operations().await.unwrap(), vec![Operation::Update]);
    let delta = preview.delta().await.unwrap();
    assert!(delta.title_changed);
    assert!(!delta.need_commit_update());
    let changeset = preview.changeset().await.unwrap().expect("matched changeset");
    assert_eq!(changeset.current_spec_id, Some(ChangesetSpecId(10)));

    assert_eq!(InstrumentedStore::count(&store.counters.commits), commits_before);
    let stored = store.inner.changeset(changeset.id).unwrap();
    assert_eq!(stored.current_spec_id, Some(ChangesetSpecId(10)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_share_one_lookup_per_computation() {
    let (store, next) = applied_store().await;
    let campaign_specs_before = InstrumentedStore::count(&store.counters.campaign_spec_lookups);
    let spec_lists_before = InstrumentedStore::count(&store.counters.spec_list_lookups);
    let spec_lookups_before = InstrumentedStore::count(&store.counters.changeset_spec_lookups);

    let preview = Arc::new(ChangesetSpecPreview::with_repo(
        store.clone(),
        CampaignsConfig::default(),
        next,
        Some(repo()),
    ));

    let readers = (0..16).map(|i| {
        let preview = Arc::clone(&preview);
        tokio::spawn(async move {
            match i % 3 {
                0 => preview.operations().await.map(|ops| ops.len()),
                1 => preview.delta().await.map(|d| usize::from(d.title_changed)),
                _ => preview.changeset().await.map(|c| usize::from(c.is_some())),
            }
        })
    });
    for result in join_all(readers).await {
        assert_eq!(result.unwrap().unwrap(), 1);
    }

    let count = |c: &AtomicUsize| InstrumentedStore::count(c);
    assert_eq!(count(&store.counters.campaign_spec_lookups) - campaign_specs_before, 1);
    assert_eq!(count(&store.counters.spec_list_lookups) - spec_lists_before, 1);
    // Only the previous spec is fetched singly; the current one is in hand.
    assert_eq!(count(&store.counters.changeset_spec_lookups) - spec_lookups_before, 1);
}

#[tokio::test]
async fn campaign_resolution_failure_is_cached() {
    let (store, next) = applied_store().await;
    store.fail_campaign_spec.store(true, Ordering::SeqCst);
    let before = InstrumentedStore::count(&store.counters.campaign_spec_lookups);

    let preview = ChangesetSpecPreview::with_repo(
        store.clone(),
        CampaignsConfig::default(),
        next,
        Some(repo()),
    );
    let first = preview.operations().await.unwrap_err();
    assert!(matches!(first, ReconcileError::Storage(StorageError::Backend(_))));

    // Recovery of the store does not change the answer for this request.
    store.fail_campaign_spec.store(false, Ordering::SeqCst);
    let second = preview.delta().await.unwrap_err();
    assert_eq!(second.to_string(), first.to_string());
    assert!(preview.changeset().await.is_err());
    assert_eq!(
        InstrumentedStore::count(&store.counters.campaign_spec_lookups) - before,
        1
    );
}

#[tokio::test]
async fn unattached_spec_expires_and_cannot_be_planned() {
    let (store, _) = applied_store().await;
    let loose = branch_spec(30, None, "refs/heads/loose", "Loose");
    let ttl = Duration::hours(2);
    let config = CampaignsConfig::default().with_changeset_spec_ttl(ttl);

    let preview = ChangesetSpecPreview::new(store.clone(), config, loose.clone())
        .await
        .unwrap();
    assert_eq!(preview.expires_at(), Some(loose.created_at + ttl));
    assert!(preview.operations().await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn hidden_repository_preview() {
    let (store, next) = applied_store().await;
    store.inner.hide_repo(RepoId(1)).unwrap();

    let preview = ChangesetSpecPreview::new(store.clone(), CampaignsConfig::default(), next)
        .await
        .unwrap();
    assert!(preview.is_hidden());
    assert!(preview.repo().is_none());
    assert!(matches!(
        preview.operations().await.unwrap_err(),
        ReconcileError::RepoNotAccessible { .. }
    ));
}

#[tokio::test]
async fn page_of_previews_shares_one_mapping_fetch() {
    let (store, _) = applied_store().await;
    store
        .inner
        .insert_changeset_spec(branch_spec(21, Some(2), "refs/heads/other", "Other"))
        .unwrap();
    let before = InstrumentedStore::count(&store.counters.spec_list_lookups);

    let svc = CampaignService::new(store.clone(), CampaignsConfig::default());
    let previews = svc.preview_campaign_spec(CampaignSpecId(2)).await.unwrap();
    assert_eq!(previews.len(), 2);

    let mut all_ops = Vec::new();
    for preview in &previews {
        all_ops.push(preview.operations().await.unwrap());
    }
    assert_eq!(all_ops[0], vec![Operation::Update]);
    assert_eq!(all_ops[1], vec![Operation::Push, Operation::Publish]);
    // One listing for the page, one for the shared mapping fetch.
    assert_eq!(
        InstrumentedStore::count(&store.counters.spec_list_lookups) - before,
        2
    );
}

#[tokio::test]
async fn fetcher_reports_missing_mapping_as_invariant_violation() {
    let (store, _) = applied_store().await;
    let fetcher = MappingFetcher::new(store.clone(), CampaignSpecId(2), Some(CampaignId(1)));
    let err = fetcher
        .for_changeset_spec(ChangesetSpecId(999))
        .await
        .unwrap_err();
    assert!(err.is_invariant_violation());
}

#[tokio::test]
async fn rewirer_output_count_mismatch_is_invariant_violation() {
    let (store, _) = applied_store().await;
    let campaign = store
        .get_campaign(GetCampaignOpts::Id(CampaignId(1)))
        .await
        .unwrap();
    let mappings = MappingResolver::new(store.clone())
        .resolve_mappings(campaign.id, CampaignSpecId(2))
        .await
        .unwrap();

    store.drop_committed.store(true, Ordering::SeqCst);
    let err = ChangesetRewirer::new(mappings, campaign)
        .rewire(store.as_ref())
        .await
        .unwrap_err();
    assert!(err.is_invariant_violation());
}
