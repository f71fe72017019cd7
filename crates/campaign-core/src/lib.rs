//! Campaign Core Library
//!
//! Maps the changeset specs of a campaign spec onto changesets, rewires
//! campaign membership and plans the operations that converge each
//! changeset toward its spec.
//!
//! Flow: [`mapping`] -> [`rewirer`] -> [`plan`] -> [`operation`] ordering.
//! [`service::CampaignService`] runs the flow for an apply;
//! [`preview::ChangesetSpecPreview`] runs it without writing.

pub mod config;
pub mod delta;
pub mod error;
pub mod mapping;
pub mod obs;
pub mod once;
pub mod operation;
pub mod plan;
pub mod preview;
pub mod rewirer;
pub mod service;
pub mod telemetry;

pub use config::CampaignsConfig;
pub use delta::ChangesetSpecDelta;
pub use error::{ReconcileError, ReconcileResult};
pub use mapping::{
    get_rewirer_mappings, GetRewirerMappingsOpts, MappingFetcher, MappingResolver,
    RewirerMapping, RewirerMappings,
};
pub use once::ComputeOnce;
pub use operation::{Operation, OperationSet, EXECUTION_ORDER};
pub use plan::{determine_plan, Plan};
pub use preview::ChangesetSpecPreview;
pub use rewirer::{ChangesetRewirer, RewireOutcome};
pub use service::{AppliedCampaign, ApplyCampaignOpts, CampaignService};
pub use telemetry::init_tracing;
