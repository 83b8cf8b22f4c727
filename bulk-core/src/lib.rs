mod error;
mod operation;
mod pause_gate;
mod progress;
mod request;
mod walker;

pub use error::BatchError;
pub use operation::{OperationDescriptor, OperationKind, UnknownOperation, catalog};
pub use pause_gate::{GateScope, PauseGate, PauseHandle, RunId};
pub use progress::{BatchRunState, ProgressAccumulator, ProgressUpdate};
pub use request::{
    BatchRequest, DeploymentPolicy, FilterClause, InvocationSelector, PageRequestBody, PageResult,
};
pub use walker::{PageFetcher, validate_request, walk};
