//! Plan computation: the minimal operation set that converges a changeset
//! toward its spec.
//!
//! [`determine_plan`] is pure. It only reads the two specs and the changeset
//! handed to it, so the same inputs always yield the same plan.

use campaign_state::{
    Changeset, ChangesetSpec, ChangesetSpecDescription, ChangesetSpecId, ExternalState,
    PublishedValue,
};
use serde::{Deserialize, Serialize};

use crate::delta::ChangesetSpecDelta;
use crate::error::ReconcileResult;
use crate::operation::{Operation, OperationSet};

/// Operations required to bring one changeset in line with its spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Spec the plan was computed against. `None` for a detach plan.
    pub changeset_spec_id: Option<ChangesetSpecId>,
    pub ops: OperationSet,
    /// `None` on first reconciliation, when there is no previous spec.
    pub delta: Option<ChangesetSpecDelta>,
}

impl Plan {
    /// Operations in execution order.
    pub fn execution_order(&self) -> Vec<Operation> {
        self.ops.execution_order()
    }

    /// Delta for presentation; all flags false when absent.
    pub fn delta_or_default(&self) -> ChangesetSpecDelta {
        self.delta.unwrap_or_default()
    }

    fn add(&mut self, ops: &[Operation]) {
        for op in ops {
            self.ops.add(*op);
        }
    }
}

/// Compute the plan for `changeset` given the previously applied spec and
/// the spec it should converge to.
///
/// `current` is `None` only for changesets that are members of the campaign
/// but matched by no spec of the new generation.
pub fn determine_plan(
    previous: Option<&ChangesetSpec>,
    current: Option<&ChangesetSpec>,
    changeset: &Changeset,
) -> ReconcileResult<Plan> {
    let mut plan = Plan {
        changeset_spec_id: current.map(|spec| spec.id),
        ..Plan::default()
    };

    if changeset.detach_requested {
        if should_close(changeset) {
            plan.add(&[Operation::Close]);
        }
        plan.add(&[Operation::Detach]);
        return Ok(plan);
    }

    let Some(current) = current else {
        if changeset.unsynced {
            plan.add(&[Operation::Import]);
        }
        return Ok(plan);
    };

    let branch = match &current.description {
        ChangesetSpecDescription::Existing { .. } => {
            if changeset.unsynced {
                plan.add(&[Operation::Import]);
            }
            return Ok(plan);
        }
        ChangesetSpecDescription::Branch(branch) => branch,
    };

    let delta = previous.map(|prev| ChangesetSpecDelta::compare(prev, current));
    plan.delta = delta;

    if !changeset.is_published() {
        // Attribute changes are folded into the eventual publish.
        match branch.published {
            PublishedValue::Published => plan.add(&[Operation::Push, Operation::Publish]),
            PublishedValue::Draft if changeset.supports_draft() => {
                plan.add(&[Operation::Push, Operation::PublishDraft])
            }
            PublishedValue::Draft | PublishedValue::Unpublished => {}
        }
        return Ok(plan);
    }

    match changeset.external_state {
        Some(ExternalState::Merged) | Some(ExternalState::Deleted) => return Ok(plan),
        _ => {}
    }

    if changeset.detached_at.is_some() {
        plan.add(&[Operation::Sync]);
        if changeset.external_state == Some(ExternalState::Closed)
            && changeset.owned_by_campaign_id.is_some()
        {
            plan.add(&[Operation::Reopen, Operation::Update]);
        }
    }

    let delta = delta.unwrap_or_default();
    if delta.undraft && changeset.supports_draft() {
        plan.add(&[Operation::Undraft]);
    }
    if delta.need_commit_update() {
        plan.add(&[Operation::Push, Operation::Update]);
    }
    if delta.need_code_host_update() {
        plan.add(&[Operation::Update]);
    }

    Ok(plan)
}

/// Only open changesets the campaign created are closed on detach.
fn should_close(changeset: &Changeset) -> bool {
    changeset.owned_by_campaign_id.is_some()
        && changeset.is_published()
        && matches!(
            changeset.external_state,
            Some(ExternalState::Open) | Some(ExternalState::Draft)
        )
}
