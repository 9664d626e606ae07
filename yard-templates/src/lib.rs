//! Template provisioning pipeline.
//!
//! A template moves `pending → provisioning → ready`, or through `staging`
//! when the operator wants to adjust the container by hand before it is
//! frozen. Each build runs as a background job that reports progress on a
//! single event stream ending in exactly one terminal event. Failures are
//! recorded on the template and never touch other templates; `recreate`
//! starts over from scratch.

pub mod error;
pub mod events;
pub mod pipeline;
pub mod registry;
pub mod stack;

pub use error::{PipelineError, Result};
pub use events::{ProvisionEvent, ProvisionPhase};
pub use pipeline::{CloneTemplate, NewTemplate, Pipeline, ProvisionOptions, StackChanges};
pub use registry::{JobHandle, JobKind, JobProgress, JobRegistry, JobReporter};
pub use stack::{StackCatalog, TechStack};
