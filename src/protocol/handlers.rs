//! Request handlers
//!
//! Maps control protocol methods onto [`Scheduler`] calls.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::protocol::messages::{
    ControlError, ControlReply, ControlRequest, ControlResponse, StartTaskParams, StopAllReply,
    StopTaskParams, TaskDirectory, UNKNOWN_REQUEST_ID, methods,
};
use crate::scheduler::Scheduler;

/// Decode one request from its JSON text and dispatch it
pub fn dispatch_json(scheduler: &Scheduler, text: &str) -> ControlResponse {
    match serde_json::from_str::<ControlRequest>(text) {
        Ok(request) => dispatch(scheduler, request),
        Err(e) => {
            log::warn!("Undecodable control request: {}", e);
            ControlResponse::failure(UNKNOWN_REQUEST_ID, ControlError::parse(e.to_string()))
        }
    }
}

/// Route one request to the scheduler
pub fn dispatch(scheduler: &Scheduler, request: ControlRequest) -> ControlResponse {
    log::debug!("Control request {} {}", request.id, request.method);
    let id = request.id;
    match request.method.as_str() {
        methods::START_TASK => handle_start(id, request.params, scheduler),
        methods::STOP_TASK => handle_stop(id, request.params, scheduler),
        methods::STOP_ALL => handle_stop_all(id, scheduler),
        methods::STATUS_MAP => encode(id, &scheduler.status_snapshot()),
        methods::TASK_DIRECTORY => encode(
            id,
            &TaskDirectory {
                tasks: scheduler.task_directory(),
            },
        ),
        other => ControlResponse::failure(id, ControlError::unknown_method(other)),
    }
}

/// Handle task.start
fn handle_start(id: u64, params: Value, scheduler: &Scheduler) -> ControlResponse {
    let p: StartTaskParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return ControlResponse::failure(id, e),
    };
    let reply = match scheduler.start(&p.name, p.auto_restart, p.period, p.params) {
        Ok(handle) => ControlReply::started(handle.instance_id),
        Err(e) => {
            log::info!("Start of {} rejected: {}", p.name, e);
            ControlReply::rejected(&e)
        }
    };
    encode(id, &reply)
}

/// Handle task.stop
fn handle_stop(id: u64, params: Value, scheduler: &Scheduler) -> ControlResponse {
    let p: StopTaskParams = match parse_params(params) {
        Ok(p) => p,
        Err(e) => return ControlResponse::failure(id, e),
    };
    let reply = match scheduler.stop(&p.name) {
        Ok(()) => ControlReply::accepted(),
        Err(e) => ControlReply::rejected(&e),
    };
    encode(id, &reply)
}

/// Handle task.stop_all
fn handle_stop_all(id: u64, scheduler: &Scheduler) -> ControlResponse {
    let reply = StopAllReply {
        accepted: true,
        stopped: scheduler.stop_all(),
    };
    encode(id, &reply)
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, ControlError> {
    serde_json::from_value(params).map_err(|e| ControlError::bad_params(e.to_string()))
}

fn encode<T: Serialize>(id: u64, value: &T) -> ControlResponse {
    match serde_json::to_value(value) {
        Ok(value) => ControlResponse::reply(id, value),
        Err(e) => ControlResponse::failure(id, ControlError::internal(e.to_string())),
    }
}
