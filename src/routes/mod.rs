pub mod api;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;
use serde_json::Value;

/// Uniform JSON envelope returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub message: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub type ApiResult = (Status, Json<ApiResponse>);

pub fn success<T: Serialize>(message: &str, data: T) -> ApiResult {
    let data = match serde_json::to_value(data) {
        Ok(Value::Null) => None,
        Ok(v) => Some(v),
        Err(e) => {
            log::error!("Error marshalling JSON: {}", e);
            return error(Status::InternalServerError, "Internal Server Error");
        }
    };
    (
        Status::Ok,
        Json(ApiResponse {
            message: message.to_string(),
            status: "success",
            data,
        }),
    )
}

pub fn error(status: Status, message: &str) -> ApiResult {
    (
        status,
        Json(ApiResponse {
            message: message.to_string(),
            status: "error",
            data: None,
        }),
    )
}

#[catch(404)]
pub fn not_found(req: &Request) -> Json<ApiResponse> {
    error(Status::NotFound, &format!("No route for {}", req.uri().path())).1
}

#[catch(422)]
pub fn unprocessable() -> Json<ApiResponse> {
    error(Status::UnprocessableEntity, "Malformed request.").1
}

#[catch(500)]
pub fn server_error() -> Json<ApiResponse> {
    error(Status::InternalServerError, "Internal server error.").1
}

#[catch(default)]
pub fn fallback(status: Status, _req: &Request) -> Json<ApiResponse> {
    error(status, status.reason().unwrap_or("Request failed.")).1
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![not_found, unprocessable, server_error, fallback]
}
