//! Record types shared by the store and the reconciliation core.
//!
//! Specs are immutable desired state; changesets are the mutable,
//! code-host-backed records that reconciliation converges toward a spec.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Internal key of a repository
    RepoId
);
record_id!(
    /// Internal key of a campaign
    CampaignId
);
record_id!(
    /// Internal key of a campaign spec
    CampaignSpecId
);
record_id!(
    /// Internal, sequential key of a changeset spec. Never exposed externally;
    /// see [`ChangesetSpec::rand_id`].
    ChangesetSpecId
);
record_id!(
    /// Internal key of a changeset
    ChangesetId
);

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// Kind of code host a repository lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeHostKind {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    BitbucketServer,
}

impl CodeHostKind {
    /// Whether the code host has native draft pull requests.
    pub fn supports_draft_changesets(self) -> bool {
        match self {
            CodeHostKind::GitHub | CodeHostKind::GitLab => true,
            CodeHostKind::BitbucketServer => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    /// Canonical name, e.g. "github.com/stevedores-org/campaigns".
    pub name: String,
    pub code_host: CodeHostKind,
}

// ---------------------------------------------------------------------------
// Campaigns
// ---------------------------------------------------------------------------

/// A user-submitted campaign spec. Each apply of a spec is one "generation"
/// of the campaign's changeset specs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSpec {
    pub id: CampaignSpecId,
    pub rand_id: String,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A named collection of changesets produced from one applied campaign spec.
///
/// Membership lives on [`Changeset::campaign_ids`]; query the store for a
/// campaign's changesets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// `None` until the campaign has been persisted.
    pub id: Option<CampaignId>,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub campaign_spec_id: CampaignSpecId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Build an unpersisted campaign pointing at `spec`.
    pub fn from_spec(spec: &CampaignSpec) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            namespace: spec.namespace.clone(),
            name: spec.name.clone(),
            description: spec.description.clone(),
            campaign_spec_id: spec.id,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Changeset specs
// ---------------------------------------------------------------------------

/// Requested publication state of a branch changeset.
///
/// Serialized the way users write it: `false`, `true` or `"draft"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PublishedRepr", into = "PublishedRepr")]
pub enum PublishedValue {
    Unpublished,
    Draft,
    Published,
}

impl PublishedValue {
    pub fn is_published(self) -> bool {
        self == PublishedValue::Published
    }

    pub fn is_draft(self) -> bool {
        self == PublishedValue::Draft
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PublishedRepr {
    Bool(bool),
    Text(String),
}

impl TryFrom<PublishedRepr> for PublishedValue {
    type Error = String;

    fn try_from(repr: PublishedRepr) -> Result<Self, Self::Error> {
        match repr {
            PublishedRepr::Bool(true) => Ok(PublishedValue::Published),
            PublishedRepr::Bool(false) => Ok(PublishedValue::Unpublished),
            PublishedRepr::Text(s) if s == "draft" => Ok(PublishedValue::Draft),
            PublishedRepr::Text(s) => Err(format!("invalid published value: {s:?}")),
        }
    }
}

impl From<PublishedValue> for PublishedRepr {
    fn from(value: PublishedValue) -> Self {
        match value {
            PublishedValue::Unpublished => PublishedRepr::Bool(false),
            PublishedValue::Published => PublishedRepr::Bool(true),
            PublishedValue::Draft => PublishedRepr::Text("draft".to_string()),
        }
    }
}

/// One commit of a branch changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDescription {
    pub message: String,
    pub diff: String,
    pub author_name: String,
    pub author_email: String,
}

impl CommitDescription {
    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Everything after the subject line, or `None` when there is nothing.
    pub fn body(&self) -> Option<&str> {
        let body = self
            .message
            .split_once('\n')
            .map(|(_, rest)| rest.trim())
            .unwrap_or("");
        (!body.is_empty()).then_some(body)
    }
}

/// Desired state of a changeset created and pushed by the campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDescription {
    pub base_ref: String,
    pub base_rev: String,
    pub head_ref: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub commits: Vec<CommitDescription>,
    pub published: PublishedValue,
}

impl BranchDescription {
    fn first_commit(&self) -> Option<&CommitDescription> {
        self.commits.first()
    }

    /// Diff of the changeset. Only the first commit is materialized.
    pub fn diff(&self) -> &str {
        self.first_commit().map(|c| c.diff.as_str()).unwrap_or("")
    }

    pub fn commit_message(&self) -> &str {
        self.first_commit().map(|c| c.message.as_str()).unwrap_or("")
    }

    pub fn author_name(&self) -> &str {
        self.first_commit()
            .map(|c| c.author_name.as_str())
            .unwrap_or("")
    }

    pub fn author_email(&self) -> &str {
        self.first_commit()
            .map(|c| c.author_email.as_str())
            .unwrap_or("")
    }
}

/// What a changeset spec asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangesetSpecDescription {
    /// Track a changeset that already exists on the code host.
    Existing { external_id: String },
    /// Create a changeset from a branch the campaign pushes.
    Branch(BranchDescription),
}

/// Discriminant of [`ChangesetSpecDescription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetSpecKind {
    Existing,
    Branch,
}

impl ChangesetSpecDescription {
    pub fn kind(&self) -> ChangesetSpecKind {
        match self {
            ChangesetSpecDescription::Existing { .. } => ChangesetSpecKind::Existing,
            ChangesetSpecDescription::Branch(_) => ChangesetSpecKind::Branch,
        }
    }

    pub fn as_branch(&self) -> Option<&BranchDescription> {
        match self {
            ChangesetSpecDescription::Branch(branch) => Some(branch),
            ChangesetSpecDescription::Existing { .. } => None,
        }
    }
}

/// Line statistics of a spec's diff, computed by the diff parser upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub added: u32,
    pub changed: u32,
    pub deleted: u32,
}

/// Immutable desired state for one changeset in one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSpec {
    pub id: ChangesetSpecId,
    /// Opaque external identifier.
    pub rand_id: String,
    /// Generation this spec belongs to. `None` until attached.
    pub campaign_spec_id: Option<CampaignSpecId>,
    pub repo_id: RepoId,
    pub description: ChangesetSpecDescription,
    #[serde(default)]
    pub diff_stat: DiffStat,
    pub created_at: DateTime<Utc>,
}

impl ChangesetSpec {
    /// Specs never attached to a campaign spec are garbage collected after
    /// `ttl`. Attached specs do not expire.
    pub fn expires_at(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        match self.campaign_spec_id {
            Some(_) => None,
            None => Some(self.created_at + ttl),
        }
    }

    pub fn kind(&self) -> ChangesetSpecKind {
        self.description.kind()
    }
}

// ---------------------------------------------------------------------------
// Changesets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationState {
    Unpublished,
    Published,
}

/// State of the changeset on the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalState {
    Draft,
    Open,
    Closed,
    Merged,
    Deleted,
}

/// Where the changeset is in the executor's work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcilerState {
    Queued,
    Processing,
    Errored,
    Completed,
}

/// Display status derived from the state axes of a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangesetStatus {
    Unpublished,
    Queued,
    Errored,
    Draft,
    Open,
    Closed,
    Merged,
    Deleted,
}

/// The actual, code-host-backed changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub id: ChangesetId,
    pub repo_id: RepoId,
    pub code_host: CodeHostKind,
    /// Code-host identifier (e.g. pull request number) once published.
    pub external_id: Option<String>,
    /// Head ref the changeset is built from.
    pub external_branch: Option<String>,
    pub base_ref: Option<String>,
    pub publication_state: PublicationState,
    pub external_state: Option<ExternalState>,
    pub reconciler_state: ReconcilerState,
    pub previous_spec_id: Option<ChangesetSpecId>,
    pub current_spec_id: Option<ChangesetSpecId>,
    /// Campaign that created the changeset. Imported changesets have none.
    pub owned_by_campaign_id: Option<CampaignId>,
    #[serde(default)]
    pub campaign_ids: BTreeSet<CampaignId>,
    /// Set when the changeset lost its last campaign membership. The
    /// executor performs the detach.
    #[serde(default)]
    pub detach_requested: bool,
    pub detached_at: Option<DateTime<Utc>>,
    /// Imported but not yet synced from the code host.
    #[serde(default)]
    pub unsynced: bool,
    /// Optimistic-concurrency counter, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Changeset {
    /// A fresh, unpublished changeset in `repo`. The store assigns `id`.
    pub fn unpublished(repo: &Repo) -> Self {
        let now = Utc::now();
        Self {
            id: ChangesetId(0),
            repo_id: repo.id,
            code_host: repo.code_host,
            external_id: None,
            external_branch: None,
            base_ref: None,
            publication_state: PublicationState::Unpublished,
            external_state: None,
            reconciler_state: ReconcilerState::Queued,
            previous_spec_id: None,
            current_spec_id: None,
            owned_by_campaign_id: None,
            campaign_ids: BTreeSet::new(),
            detach_requested: false,
            detached_at: None,
            unsynced: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_published(&self) -> bool {
        self.publication_state == PublicationState::Published
    }

    pub fn is_member_of(&self, campaign_id: CampaignId) -> bool {
        self.campaign_ids.contains(&campaign_id)
    }

    pub fn supports_draft(&self) -> bool {
        self.code_host.supports_draft_changesets()
    }

    pub fn status(&self) -> ChangesetStatus {
        match self.reconciler_state {
            ReconcilerState::Queued | ReconcilerState::Processing => {
                return ChangesetStatus::Queued
            }
            ReconcilerState::Errored => return ChangesetStatus::Errored,
            ReconcilerState::Completed => {}
        }
        match (self.publication_state, self.external_state) {
            (PublicationState::Unpublished, _) | (PublicationState::Published, None) => {
                ChangesetStatus::Unpublished
            }
            (PublicationState::Published, Some(ExternalState::Draft)) => ChangesetStatus::Draft,
            (PublicationState::Published, Some(ExternalState::Open)) => ChangesetStatus::Open,
            (PublicationState::Published, Some(ExternalState::Closed)) => ChangesetStatus::Closed,
            (PublicationState::Published, Some(ExternalState::Merged)) => ChangesetStatus::Merged,
            (PublicationState::Published, Some(ExternalState::Deleted)) => {
                ChangesetStatus::Deleted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repo {
        Repo {
            id: RepoId(1),
            name: "github.com/org/a".to_string(),
            code_host: CodeHostKind::GitHub,
        }
    }

    #[test]
    fn test_published_value_serde_accepts_bool_and_draft() {
        let v: PublishedValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, PublishedValue::Published);
        let v: PublishedValue = serde_json::from_str("false").unwrap();
        assert_eq!(v, PublishedValue::Unpublished);
        let v: PublishedValue = serde_json::from_str("\"draft\"").unwrap();
        assert_eq!(v, PublishedValue::Draft);
        assert_eq!(
            serde_json::to_string(&PublishedValue::Draft).unwrap(),
            "\"draft\""
        );
    }

    #[test]
    fn test_published_value_rejects_unknown_text() {
        let res: Result<PublishedValue, _> = serde_json::from_str("\"maybe\"");
        assert!(res.is_err());
    }

    #[test]
    fn test_commit_subject_and_body() {
        let commit = CommitDescription {
            message: "Fix the thing\n\nLonger explanation.\n".to_string(),
            diff: String::new(),
            author_name: "a".to_string(),
            author_email: "a@example.com".to_string(),
        };
        assert_eq!(commit.subject(), "Fix the thing");
        assert_eq!(commit.body(), Some("Longer explanation."));

        let bare = CommitDescription {
            message: "Only a subject".to_string(),
            ..commit
        };
        assert_eq!(bare.body(), None);
    }

    #[test]
    fn test_spec_expiry_only_for_unattached_specs() {
        let created_at = Utc::now();
        let mut spec = ChangesetSpec {
            id: ChangesetSpecId(1),
            rand_id: "spec-expiry".to_string(),
            campaign_spec_id: None,
            repo_id: RepoId(1),
            description: ChangesetSpecDescription::Existing {
                external_id: "12".to_string(),
            },
            diff_stat: DiffStat::default(),
            created_at,
        };
        let ttl = Duration::days(7);
        assert_eq!(spec.expires_at(ttl), Some(created_at + ttl));

        spec.campaign_spec_id = Some(CampaignSpecId(3));
        assert_eq!(spec.expires_at(ttl), None);
    }

    #[test]
    fn test_changeset_status_derivation() {
        let mut cs = Changeset::unpublished(&repo());
        assert_eq!(cs.status(), ChangesetStatus::Queued);

        cs.reconciler_state = ReconcilerState::Completed;
        assert_eq!(cs.status(), ChangesetStatus::Unpublished);

        cs.publication_state = PublicationState::Published;
        cs.external_state = Some(ExternalState::Merged);
        assert_eq!(cs.status(), ChangesetStatus::Merged);

        cs.reconciler_state = ReconcilerState::Errored;
        assert_eq!(cs.status(), ChangesetStatus::Errored);
    }

    #[test]
    fn test_draft_support_by_code_host() {
        assert!(CodeHostKind::GitHub.supports_draft_changesets());
        assert!(CodeHostKind::GitLab.supports_draft_changesets());
        assert!(!CodeHostKind::BitbucketServer.supports_draft_changesets());
    }
}
