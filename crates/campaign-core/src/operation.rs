//! Reconciler operations and their fixed execution order.
//!
//! The planner produces an unordered [`OperationSet`]; the executor runs
//! [`OperationSet::execution_order`], which is the subsequence of
//! [`EXECUTION_ORDER`] present in the set. A total order is enough, so there
//! is no dependency graph here.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, ReconcileResult};

/// A side effect the executor performs against the code host or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Start tracking an existing code-host changeset.
    Import,
    /// Push the spec's commit to the head ref.
    Push,
    /// Open the changeset on the code host.
    Publish,
    /// Open the changeset as a draft.
    PublishDraft,
    /// Update title, body, base ref or tracked commit.
    Update,
    /// Turn a draft into a regular changeset.
    Undraft,
    Close,
    /// Give the code host time to process a push.
    Sleep,
    /// Remove the changeset from its last campaign.
    Detach,
    Archive,
    Reopen,
    /// Pull the latest state from the code host.
    Sync,
}

/// Global execution order.
///
/// - `Sync` first: every later step depends on fresh state.
/// - Content before advertising it: `Push` before `Publish*`/`Update`.
/// - `Undraft` before `Update`: some code hosts reject edits to drafts.
/// - `Close` before `Detach`: never orphan an open changeset.
pub const EXECUTION_ORDER: [Operation; 12] = [
    Operation::Sync,
    Operation::Import,
    Operation::Push,
    Operation::Sleep,
    Operation::Publish,
    Operation::PublishDraft,
    Operation::Reopen,
    Operation::Undraft,
    Operation::Update,
    Operation::Close,
    Operation::Detach,
    Operation::Archive,
];

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Import => "IMPORT",
            Operation::Push => "PUSH",
            Operation::Publish => "PUBLISH",
            Operation::PublishDraft => "PUBLISH_DRAFT",
            Operation::Update => "UPDATE",
            Operation::Undraft => "UNDRAFT",
            Operation::Close => "CLOSE",
            Operation::Sleep => "SLEEP",
            Operation::Detach => "DETACH",
            Operation::Archive => "ARCHIVE",
            Operation::Reopen => "REOPEN",
            Operation::Sync => "SYNC",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ReconcileError;

    fn from_str(s: &str) -> ReconcileResult<Self> {
        EXECUTION_ORDER
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| ReconcileError::invariant(format!("unknown operation kind: {s}")))
    }
}

/// Deduplicated, unordered set of operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSet(BTreeSet<Operation>);

impl OperationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse wire names. Any name outside the enumeration is an invariant
    /// violation.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> ReconcileResult<Self> {
        names.into_iter().map(str::parse::<Operation>).collect()
    }

    /// Add `op`; returns false when it was already present.
    pub fn add(&mut self, op: Operation) -> bool {
        self.0.insert(op)
    }

    pub fn contains(&self, op: Operation) -> bool {
        self.0.contains(&op)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The operations present in the set, in [`EXECUTION_ORDER`].
    pub fn execution_order(&self) -> Vec<Operation> {
        EXECUTION_ORDER
            .iter()
            .copied()
            .filter(|op| self.0.contains(op))
            .collect()
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Operation; N]> for OperationSet {
    fn from(ops: [Operation; N]) -> Self {
        ops.into_iter().collect()
    }
}
