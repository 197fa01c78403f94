//! Control protocol between remote clients and the scheduler
//!
//! This module provides:
//! - Request/response envelopes, method names and envelope error codes
//! - Typed parameters and replies for start/stop
//! - A dispatcher mapping requests onto a [`Scheduler`](crate::scheduler::Scheduler)

pub mod handlers;
pub mod messages;

pub use handlers::{dispatch, dispatch_json};
pub use messages::{
    ControlError, ControlReply, ControlRequest, ControlResponse, StartTaskParams, StopAllReply,
    StopTaskParams, TaskDirectory, UNKNOWN_REQUEST_ID, codes, methods,
};
