//! Runtime adapters: background optimizer thread, tokio execution driver, wire API.

pub mod api;
#[cfg(not(target_arch = "wasm32"))]
pub mod optimizer_daemon;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_driver;

pub use api::{
    action_status, complete_action, handle_envelope, health, submit_action,
    ActionStatusResponse, CompletionMessage, Envelope, Health, SubmitRequest, WireMessage,
    WIRE_VERSION,
};
#[cfg(not(target_arch = "wasm32"))]
pub use optimizer_daemon::OptimizerDaemon;
#[cfg(feature = "tokio-runtime")]
pub use tokio_driver::{ActionExecutor, DriveSummary, TokioDriver};
