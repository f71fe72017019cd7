//! Mapping resolution: pair each changeset spec of a campaign-spec
//! generation with the changeset it should drive.
//!
//! Mappings come out of [`get_rewirer_mappings`] holding identifiers only.
//! [`RewirerMappings::hydrate`] then loads specs, changesets and repositories
//! in one batch lookup each.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use campaign_state::{
    CampaignId, CampaignSpecId, CampaignStore, Changeset, ChangesetId, ChangesetSpec,
    ChangesetSpecDescription, ChangesetSpecId, ListChangesetsOpts, Repo, RepoId,
};
use tracing::instrument;

use crate::error::{ReconcileError, ReconcileResult};
use crate::obs;
use crate::once::ComputeOnce;

/// One (spec, changeset) pairing.
///
/// A mapping without a spec is a campaign member that no spec of the new
/// generation matched; it is detached. A mapping without a changeset needs
/// one created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewirerMapping {
    pub changeset_spec_id: Option<ChangesetSpecId>,
    pub changeset_spec: Option<ChangesetSpec>,
    pub changeset_id: Option<ChangesetId>,
    pub changeset: Option<Changeset>,
    pub repo_id: RepoId,
    /// `None` when the caller cannot see the repository.
    pub repo: Option<Repo>,
}

impl RewirerMapping {
    fn unhydrated(
        changeset_spec_id: Option<ChangesetSpecId>,
        changeset_id: Option<ChangesetId>,
        repo_id: RepoId,
    ) -> Self {
        Self {
            changeset_spec_id,
            changeset_spec: None,
            changeset_id,
            changeset: None,
            repo_id,
            repo: None,
        }
    }

    pub fn is_detach(&self) -> bool {
        self.changeset_spec_id.is_none()
    }
}

/// Ordered batch of mappings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewirerMappings(Vec<RewirerMapping>);

impl RewirerMappings {
    pub fn new(mappings: Vec<RewirerMapping>) -> Self {
        Self(mappings)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RewirerMapping> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<RewirerMapping> {
        self.0
    }

    /// The mapping for spec `id`, if the batch contains one.
    pub fn for_changeset_spec(&self, id: ChangesetSpecId) -> Option<&RewirerMapping> {
        self.0.iter().find(|m| m.changeset_spec_id == Some(id))
    }

    pub fn detach_count(&self) -> usize {
        self.0.iter().filter(|m| m.is_detach()).count()
    }

    /// Load every spec, changeset and repository that is not loaded yet.
    ///
    /// Idempotent. Fails with `NotFound` when a referenced spec no longer
    /// exists. Repositories the caller cannot see stay unset. A changeset
    /// that vanished stays unset on a spec's mapping, which then gets a new
    /// changeset; a detach mapping for it is dropped, there being nothing
    /// left to detach.
    #[instrument(skip_all, fields(mappings = self.0.len()))]
    pub async fn hydrate(&mut self, store: &dyn CampaignStore) -> ReconcileResult<()> {
        let spec_ids: Vec<ChangesetSpecId> = self
            .0
            .iter()
            .filter(|m| m.changeset_spec.is_none())
            .filter_map(|m| m.changeset_spec_id)
            .collect();
        let changeset_ids: Vec<ChangesetId> = self
            .0
            .iter()
            .filter(|m| m.changeset.is_none())
            .filter_map(|m| m.changeset_id)
            .collect();
        let repo_ids: Vec<RepoId> = dedup(
            self.0
                .iter()
                .filter(|m| m.repo.is_none())
                .map(|m| m.repo_id),
        );

        let specs: BTreeMap<ChangesetSpecId, ChangesetSpec> = if spec_ids.is_empty() {
            BTreeMap::new()
        } else {
            store
                .get_changeset_specs_by_ids(&spec_ids)
                .await?
                .into_iter()
                .map(|s| (s.id, s))
                .collect()
        };
        let changesets: BTreeMap<ChangesetId, Changeset> = if changeset_ids.is_empty() {
            BTreeMap::new()
        } else {
            store
                .get_changesets_by_ids(&changeset_ids)
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect()
        };
        let repos: BTreeMap<RepoId, Repo> = if repo_ids.is_empty() {
            BTreeMap::new()
        } else {
            store
                .get_repos_by_ids(&repo_ids)
                .await?
                .into_iter()
                .map(|r| (r.id, r))
                .collect()
        };

        for mapping in &mut self.0 {
            if mapping.changeset_spec.is_none() {
                if let Some(id) = mapping.changeset_spec_id {
                    let spec = specs.get(&id).ok_or_else(|| ReconcileError::NotFound {
                        entity: "changeset spec",
                        key: id.to_string(),
                    })?;
                    mapping.changeset_spec = Some(spec.clone());
                }
            }
            if mapping.changeset.is_none() {
                if let Some(id) = mapping.changeset_id {
                    match changesets.get(&id) {
                        Some(changeset) => mapping.changeset = Some(changeset.clone()),
                        None => obs::emit_hydrate_missing_changeset(id),
                    }
                }
            }
            if mapping.repo.is_none() {
                mapping.repo = repos.get(&mapping.repo_id).cloned();
            }
        }
        self.0.retain(|m| !(m.is_detach() && m.changeset.is_none()));
        Ok(())
    }
}

impl IntoIterator for RewirerMappings {
    type Item = RewirerMapping;
    type IntoIter = std::vec::IntoIter<RewirerMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RewirerMappings {
    type Item = &'a RewirerMapping;
    type IntoIter = std::slice::Iter<'a, RewirerMapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn dedup<T: Ord + Copy>(ids: impl Iterator<Item = T>) -> Vec<T> {
    let mut ids: Vec<T> = ids.collect();
    ids.sort();
    ids.dedup();
    ids
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetRewirerMappingsOpts {
    pub campaign_spec_id: CampaignSpecId,
    /// `None` for a campaign that has not been persisted yet; such a
    /// campaign has no changesets to match.
    pub campaign_id: Option<CampaignId>,
}

/// Compute unhydrated mappings for one campaign-spec generation.
///
/// - `Existing` specs match the changeset with the same repository and
///   external id, whichever campaign it belongs to.
/// - `Branch` specs match a changeset owned by the campaign in the same
///   repository whose head ref equals the spec's.
/// - A changeset is matched at most once.
/// - Campaign members left unmatched get a spec-less mapping.
#[instrument(skip(store))]
pub async fn get_rewirer_mappings(
    store: &dyn CampaignStore,
    opts: GetRewirerMappingsOpts,
) -> ReconcileResult<RewirerMappings> {
    let specs = store.list_changeset_specs(opts.campaign_spec_id).await?;

    let (owned, members) = match opts.campaign_id {
        Some(campaign_id) => {
            let owned = store
                .list_changesets(ListChangesetsOpts {
                    owned_by_campaign_id: Some(campaign_id),
                    ..Default::default()
                })
                .await?;
            let members = store
                .list_changesets(ListChangesetsOpts {
                    campaign_id: Some(campaign_id),
                    ..Default::default()
                })
                .await?;
            (owned, members)
        }
        None => (Vec::new(), Vec::new()),
    };

    let mut used: HashSet<ChangesetId> = HashSet::new();
    let mut mappings = Vec::with_capacity(specs.len());

    for spec in &specs {
        let matched = match &spec.description {
            ChangesetSpecDescription::Existing { external_id } => store
                .get_changeset_by_external_id(spec.repo_id, external_id)
                .await?
                .map(|cs| cs.id)
                .filter(|id| !used.contains(id)),
            ChangesetSpecDescription::Branch(branch) => owned
                .iter()
                .find(|cs| {
                    cs.repo_id == spec.repo_id
                        && cs.external_branch.as_deref() == Some(branch.head_ref.as_str())
                        && !used.contains(&cs.id)
                })
                .map(|cs| cs.id),
        };
        if let Some(id) = matched {
            used.insert(id);
        }
        mappings.push(RewirerMapping::unhydrated(
            Some(spec.id),
            matched,
            spec.repo_id,
        ));
    }

    for member in members.iter().filter(|cs| !used.contains(&cs.id)) {
        mappings.push(RewirerMapping::unhydrated(
            None,
            Some(member.id),
            member.repo_id,
        ));
    }

    let mappings = RewirerMappings::new(mappings);
    obs::emit_mappings_resolved(
        opts.campaign_spec_id,
        mappings.len(),
        mappings.detach_count(),
    );
    Ok(mappings)
}

/// Resolves and hydrates mappings in one call.
pub struct MappingResolver {
    store: Arc<dyn CampaignStore>,
}

impl MappingResolver {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn resolve_mappings(
        &self,
        campaign_id: Option<CampaignId>,
        campaign_spec_id: CampaignSpecId,
    ) -> ReconcileResult<RewirerMappings> {
        let mut mappings = get_rewirer_mappings(
            self.store.as_ref(),
            GetRewirerMappingsOpts {
                campaign_spec_id,
                campaign_id,
            },
        )
        .await?;
        mappings.hydrate(self.store.as_ref()).await?;
        Ok(mappings)
    }
}

// ---------------------------------------------------------------------------
// Batch fetcher
// ---------------------------------------------------------------------------

/// Request-scoped, compute-once fetch of every mapping of a generation.
///
/// Shared by the previews of one page so that N specs cost one resolution.
pub struct MappingFetcher {
    store: Arc<dyn CampaignStore>,
    campaign_spec_id: CampaignSpecId,
    campaign_id: Option<CampaignId>,
    mappings: ComputeOnce<Arc<RewirerMappings>>,
}

impl MappingFetcher {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        campaign_spec_id: CampaignSpecId,
        campaign_id: Option<CampaignId>,
    ) -> Self {
        Self {
            store,
            campaign_spec_id,
            campaign_id,
            mappings: ComputeOnce::new(),
        }
    }

    pub fn campaign_spec_id(&self) -> CampaignSpecId {
        self.campaign_spec_id
    }

    pub fn campaign_id(&self) -> Option<CampaignId> {
        self.campaign_id
    }

    pub async fn mappings(&self) -> ReconcileResult<Arc<RewirerMappings>> {
        self.mappings
            .get_or_compute(|| async {
                let resolver = MappingResolver::new(Arc::clone(&self.store));
                let mappings = resolver
                    .resolve_mappings(self.campaign_id, self.campaign_spec_id)
                    .await?;
                Ok(Arc::new(mappings))
            })
            .await
    }

    /// The hydrated mapping for spec `id`.
    pub async fn for_changeset_spec(&self, id: ChangesetSpecId) -> ReconcileResult<RewirerMapping> {
        let mappings = self.mappings().await?;
        mappings
            .for_changeset_spec(id)
            .cloned()
            .ok_or_else(|| ReconcileError::invariant(format!("mapping not found for spec {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(spec: Option<i64>, changeset: Option<i64>) -> RewirerMapping {
        RewirerMapping::unhydrated(
            spec.map(ChangesetSpecId),
            changeset.map(ChangesetId),
            RepoId(1),
        )
    }

    #[test]
    fn test_for_changeset_spec_lookup() {
        let mappings = RewirerMappings::new(vec![
            mapping(Some(1), None),
            mapping(Some(2), Some(10)),
            mapping(None, Some(11)),
        ]);
        assert_eq!(
            mappings
                .for_changeset_spec(ChangesetSpecId(2))
                .and_then(|m| m.changeset_id),
            Some(ChangesetId(10))
        );
        assert!(mappings.for_changeset_spec(ChangesetSpecId(3)).is_none());
        assert_eq!(mappings.detach_count(), 1);
    }

    #[test]
    fn test_dedup_sorts_and_removes_duplicates() {
        let ids = dedup([RepoId(3), RepoId(1), RepoId(3)].into_iter());
        assert_eq!(ids, vec![RepoId(1), RepoId(3)]);
    }
}
