//! Per-attribute differences between two changeset specs.

use campaign_state::{BranchDescription, ChangesetSpec};
use serde::{Deserialize, Serialize};

/// Which observable attributes of a changeset differ between the previously
/// applied spec and the new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetSpecDelta {
    pub title_changed: bool,
    pub body_changed: bool,
    /// The spec went from draft or unpublished to published.
    pub undraft: bool,
    pub base_ref_changed: bool,
    pub diff_changed: bool,
    pub commit_message_changed: bool,
    pub author_name_changed: bool,
    pub author_email_changed: bool,
}

impl ChangesetSpecDelta {
    /// Compare two specs. Only branch descriptions carry comparable
    /// attributes; any other pairing yields an empty delta.
    pub fn compare(previous: &ChangesetSpec, current: &ChangesetSpec) -> Self {
        match (
            previous.description.as_branch(),
            current.description.as_branch(),
        ) {
            (Some(prev), Some(cur)) => Self::compare_branches(prev, cur),
            _ => Self::default(),
        }
    }

    fn compare_branches(prev: &BranchDescription, cur: &BranchDescription) -> Self {
        Self {
            title_changed: prev.title != cur.title,
            body_changed: prev.body != cur.body,
            undraft: !prev.published.is_published() && cur.published.is_published(),
            base_ref_changed: prev.base_ref != cur.base_ref,
            diff_changed: prev.diff() != cur.diff(),
            commit_message_changed: prev.commit_message() != cur.commit_message(),
            author_name_changed: prev.author_name() != cur.author_name(),
            author_email_changed: prev.author_email() != cur.author_email(),
        }
    }

    /// A new commit has to be pushed.
    pub fn need_commit_update(&self) -> bool {
        self.diff_changed
            || self.commit_message_changed
            || self.author_name_changed
            || self.author_email_changed
    }

    /// The changeset's metadata on the code host has to be edited.
    pub fn need_code_host_update(&self) -> bool {
        self.title_changed || self.body_changed || self.base_ref_changed
    }

    pub fn attributes_changed(&self) -> bool {
        self.need_commit_update() || self.need_code_host_update()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
