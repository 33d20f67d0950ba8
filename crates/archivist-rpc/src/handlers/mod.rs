//! Request handlers: JSON-RPC dispatch and the REST catalog routes.

mod catalog;

pub use catalog::{handle_get_model, handle_list_models, handle_scan};

use crate::server::AppState;
use archivist_core::{ArchivistError, ErrorCode};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }
}

// ============================================================================
// Handler errors
// ============================================================================

/// Failure of a handler, mapped to JSON-RPC codes and HTTP statuses.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Archivist(#[from] ArchivistError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl HandlerError {
    pub fn rpc_code(&self) -> i32 {
        match self {
            HandlerError::MethodNotFound(_) => -32601,
            HandlerError::InvalidParams(_) => -32602,
            HandlerError::NotFound(_) => -32004,
            HandlerError::Archivist(e) => match e {
                ArchivistError::ModelNotFound { .. } => -32004,
                ArchivistError::DuplicateHash { .. } => -32009,
                e if e.is_fatal() => -32001,
                _ => -32000,
            },
            HandlerError::Task(_) | HandlerError::Json(_) => -32603,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::MethodNotFound(_) | HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::InvalidParams(_) => StatusCode::BAD_REQUEST,
            HandlerError::Archivist(ArchivistError::ModelNotFound { .. }) => StatusCode::NOT_FOUND,
            HandlerError::Archivist(ArchivistError::DuplicateHash { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured code of the underlying archivist error, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            HandlerError::Archivist(e) => Some(e.code()),
            _ => None,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> axum::response::Response {
        error!("Request failed: {}", self);
        let body = json!({
            "error": self.to_string(),
            "code": self.error_code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract an optional bool parameter, supporting both snake_case and camelCase.
pub(crate) fn get_bool_param(params: &Value, snake: &str, camel: &str) -> Option<bool> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_bool())
}

/// Extract a required string parameter.
pub(crate) fn require_str_param(params: &Value, snake: &str, camel: &str) -> HandlerResult<String> {
    params
        .get(snake)
        .or_else(|| params.get(camel))
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| HandlerError::InvalidParams(format!("Missing required parameter: {}", snake)))
}

/// Extract a required integer parameter.
pub(crate) fn require_i64_param(params: &Value, snake: &str, camel: &str) -> HandlerResult<i64> {
    let value = params.get(snake).or_else(|| params.get(camel));
    value
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| HandlerError::InvalidParams(format!("Missing required parameter: {}", snake)))
}

// ============================================================================
// Endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    let response = match dispatch_method(&state, method, &params).await {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => {
            error!("RPC error for {}: {}", method, e);
            let data = e.error_code().map(|code| json!({ "error_code": code }));
            JsonRpcResponse::error(id, e.rpc_code(), e.to_string(), data)
        }
    };
    (StatusCode::OK, Json(response))
}

async fn dispatch_method(state: &Arc<AppState>, method: &str, params: &Value) -> HandlerResult<Value> {
    match method {
        "health_check" => Ok(json!({"status": "ok"})),
        "list_models" => {
            let include_tags = get_bool_param(params, "include_tags", "includeTags").unwrap_or(false);
            let include_components =
                get_bool_param(params, "include_components", "includeComponents").unwrap_or(false);
            if get_bool_param(params, "rescan", "rescan").unwrap_or(false) {
                catalog::run_scan(state).await?;
            }
            let models = catalog::list_models(state, include_tags, include_components).await?;
            Ok(serde_json::to_value(models)?)
        }
        "get_model" => {
            let hash = require_str_param(params, "hash", "contentHash")?;
            let model = catalog::get_model(state, hash).await?;
            Ok(serde_json::to_value(model)?)
        }
        "reconcile_all" => {
            let report = catalog::run_scan(state).await?;
            Ok(serde_json::to_value(report)?)
        }
        "clear_errors" => {
            let model_id = require_i64_param(params, "model_id", "modelId")?;
            catalog::clear_errors(state, model_id).await?;
            Ok(json!({"success": true, "model_id": model_id}))
        }
        other => Err(HandlerError::MethodNotFound(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_helpers() {
        let params = json!({"includeTags": true, "model_id": "12", "hash": "abc"});
        assert_eq!(get_bool_param(&params, "include_tags", "includeTags"), Some(true));
        assert_eq!(require_i64_param(&params, "model_id", "modelId").unwrap(), 12);
        assert_eq!(require_str_param(&params, "hash", "contentHash").unwrap(), "abc");
        assert!(matches!(
            require_str_param(&params, "name", "name"),
            Err(HandlerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_error_mapping() {
        let not_found = HandlerError::from(ArchivistError::ModelNotFound { model_id: 3 });
        assert_eq!(not_found.rpc_code(), -32004);
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.error_code(), Some(ErrorCode::Internal));

        let duplicate = HandlerError::from(ArchivistError::DuplicateHash {
            hash: "abc".into(),
            model_ids: vec![1, 2],
        });
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let fatal = HandlerError::from(ArchivistError::config("bad"));
        assert_eq!(fatal.rpc_code(), -32001);
        assert_eq!(HandlerError::MethodNotFound("x".into()).rpc_code(), -32601);
    }

    #[test]
    fn test_error_response_shape() {
        let response = JsonRpcResponse::error(Some(json!(1)), -32601, "nope".into(), None);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
        assert!(value["error"].get("data").is_none());
    }
}
