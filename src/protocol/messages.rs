//! Control protocol messages
//!
//! Every call is one [`ControlRequest`] answered by one [`ControlResponse`]
//! with the same `id`. Request-level refusals (unknown task, bad period, task
//! already running) are ordinary results carrying a [`ControlReply`]; the
//! envelope-level [`ControlError`] is only for requests that could not be
//! decoded or routed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorKind, TaskError};
use crate::params::ParameterSet;
use crate::registry::TaskDescriptor;

/// Method names understood by the scheduler
pub mod methods {
    pub const START_TASK: &str = "task.start";
    pub const STOP_TASK: &str = "task.stop";
    pub const STOP_ALL: &str = "task.stop_all";
    pub const STATUS_MAP: &str = "task.status";
    pub const TASK_DIRECTORY: &str = "task.directory";
}

/// Envelope error codes, numbered like JSON-RPC
pub mod codes {
    /// Request bytes were not a valid request
    pub const PARSE: i32 = -32700;
    /// No handler for the method
    pub const UNKNOWN_METHOD: i32 = -32601;
    /// Params did not match the method's shape
    pub const BAD_PARAMS: i32 = -32602;
    /// Handler could not encode its result
    pub const INTERNAL: i32 = -32603;
}

/// Id used when a request was too malformed to read its own id
pub const UNKNOWN_REQUEST_ID: u64 = 0;

/// One control call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ControlRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Call whose method takes no params
    pub fn bare(id: u64, method: impl Into<String>) -> Self {
        Self::new(id, method, Value::Object(Default::default()))
    }
}

/// Answer to one [`ControlRequest`]; exactly one of `result` / `error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
}

impl ControlResponse {
    pub fn reply(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, error: ControlError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_reply(&self) -> bool {
        self.error.is_none()
    }

    /// Unwrap the result of call `expected_id`
    ///
    /// Envelope errors are reported before the id check, since a request
    /// that failed to parse is answered with [`UNKNOWN_REQUEST_ID`].
    pub fn into_result(self, expected_id: u64) -> Result<Value, TaskError> {
        if let Some(err) = self.error {
            return Err(TaskError::Protocol(err.to_string()));
        }
        if self.id != expected_id {
            return Err(TaskError::Protocol(format!(
                "response id {} does not match request {}",
                self.id, expected_id
            )));
        }
        self.result
            .ok_or_else(|| TaskError::Protocol("response without result".into()))
    }
}

/// Envelope-level failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlError {
    pub code: i32,
    pub message: String,
}

impl ControlError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE, message)
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(codes::UNKNOWN_METHOD, format!("Unknown method: {}", method))
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new(codes::BAD_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL, message)
    }
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Params of `task.start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartTaskParams {
    pub name: String,
    #[serde(default)]
    pub auto_restart: bool,
    pub period: f64,
    #[serde(default)]
    pub params: ParameterSet,
}

/// Params of `task.stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTaskParams {
    pub name: String,
}

/// Result of `task.stop_all`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAllReply {
    pub accepted: bool,
    /// Tasks that were active
    pub stopped: usize,
}

/// Result of `task.directory`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDirectory {
    pub tasks: Vec<TaskDescriptor>,
}

/// Result of `task.start` and `task.stop`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlReply {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            instance_id: None,
            error_code: None,
            message: None,
        }
    }

    pub fn started(instance_id: u64) -> Self {
        Self {
            instance_id: Some(instance_id),
            ..Self::accepted()
        }
    }

    pub fn rejected(err: &TaskError) -> Self {
        Self {
            accepted: false,
            instance_id: None,
            error_code: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }

    /// Turn a refusal back into an error on the client side
    pub fn into_result(self) -> Result<Option<u64>, TaskError> {
        if self.accepted {
            return Ok(self.instance_id);
        }
        Err(TaskError::Remote {
            kind: self.error_code.unwrap_or(ErrorKind::Internal),
            message: self.message.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_request_has_empty_object_params() {
        let req = ControlRequest::bare(3, methods::STATUS_MAP);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "task.status");
        assert_eq!(json["params"], serde_json::json!({}));
    }

    #[test]
    fn test_request_without_params_field() {
        let req: ControlRequest =
            serde_json::from_str(r#"{"id": 4, "method": "task.stop_all"}"#).unwrap();
        assert!(req.params.is_null());
    }

    #[test]
    fn test_reply_omits_error() {
        let resp = ControlResponse::reply(1, serde_json::json!({"ok": true}));
        assert!(resp.is_reply());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_into_result_checks_id_and_error() {
        let ok = ControlResponse::reply(5, serde_json::json!(1));
        assert_eq!(ok.into_result(5).unwrap(), serde_json::json!(1));

        let wrong = ControlResponse::reply(6, serde_json::json!(1));
        assert!(matches!(wrong.into_result(5), Err(TaskError::Protocol(_))));

        let parse = ControlResponse::failure(UNKNOWN_REQUEST_ID, ControlError::parse("eof"));
        let err = parse.into_result(5).unwrap_err();
        assert_eq!(err.to_string(), "Protocol error: eof (-32700)");
    }

    #[test]
    fn test_unknown_method() {
        let err = ControlError::unknown_method("task.fly");
        assert_eq!(err.code, codes::UNKNOWN_METHOD);
        assert_eq!(err.message, "Unknown method: task.fly");
    }

    #[test]
    fn test_start_params_defaults() {
        let p: StartTaskParams =
            serde_json::from_str(r#"{"name": "Test", "period": 0.5}"#).unwrap();
        assert!(!p.auto_restart);
        assert!(p.params.is_empty());
    }

    #[test]
    fn test_rejected_reply_becomes_remote_error() {
        let reply = ControlReply::rejected(&TaskError::TaskNotFound("X".into()));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["accepted"], false);
        assert_eq!(json["error_code"], "TaskNotFound");

        let back: ControlReply = serde_json::from_value(json).unwrap();
        let err = back.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskNotFound);
    }

    #[test]
    fn test_started_reply() {
        let reply = ControlReply::started(9);
        assert_eq!(reply.into_result().unwrap(), Some(9));
    }
}
