//! Campaign-State: records and storage traits for campaign reconciliation
//!
//! This crate is the persistence boundary of the campaign reconciler. It
//! defines the records the reconciler reads and writes and the async
//! `CampaignStore` trait through which it reaches them.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record shapes, lookup contracts and atomic changeset commits.
//!
//! ## Key Components
//!
//! - `ChangesetSpec`: immutable desired state for one changeset
//! - `Changeset`: the mutable, code-host-backed changeset record
//! - `Campaign` / `CampaignSpec`: a campaign and its applied generation
//! - `CampaignStore`: lookup and commit contract
//! - `fakes::MemoryCampaignStore`: in-memory implementation

mod error;
pub mod fakes;
mod schema;
pub mod storage_traits;

pub use error::StorageError;
pub use schema::{
    BranchDescription, Campaign, CampaignId, CampaignSpec, CampaignSpecId, Changeset,
    ChangesetId, ChangesetSpec, ChangesetSpecDescription, ChangesetSpecId, ChangesetSpecKind,
    ChangesetStatus, CodeHostKind, CommitDescription, DiffStat, ExternalState,
    PublicationState, PublishedValue, ReconcilerState, Repo, RepoId,
};
pub use storage_traits::{
    CampaignStore, ChangesetWrite, GetCampaignOpts, GetCampaignSpecOpts, ListChangesetsOpts,
    StorageResult,
};
