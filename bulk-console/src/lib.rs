mod admin_client;
mod logging;
mod runs;
mod runtime;

pub use admin_client::{AdminClient, AdminClientConfig, decode_page_body, normalize_admin_url};
pub use logging::init as init_logging;
pub use runs::{
    DEFAULT_FINISHED_RUN_LIMIT, RunControlOutcome, RunController, RunPhase, RunSnapshot, StartRun,
};
pub use runtime::{
    ErrorResponse, RunListResponse, SharedState, StartRunRequest, build_control_app,
};
