//! Session orchestration and thread management.
//!
//! `Session` owns the frame loop thread; `Controller` runs the per-frame
//! pipeline; pose work goes to a `PoseBackend`, either inline or on a
//! dedicated worker thread that talks over `messages`.

pub mod controller;
pub mod messages;
pub mod session;
pub mod shared_state;
pub mod worker;

pub use controller::Controller;
pub use messages::{MatchOutcome, RequestTag, WorkerRequest, WorkerResponse, WorkerSetup};
pub use session::Session;
pub use shared_state::{SessionStatus, SharedState, SlotStatus};
pub use worker::{InlineBackend, PoseBackend, WorkerClient};
