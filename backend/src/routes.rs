use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use log::{error, info, warn};
use serde_json::json;
use shared::{
    AsyncTaskResponse, CategorizeResponse, ErrorKind, HealthResponse, HealthStatus, TaskStatus,
    TaskStatusResponse,
};
use std::collections::BTreeMap;
use std::fmt;

use crate::middleware::RequestId;
use crate::services::{CategorizationService, ServiceError};
use crate::upload::{ImageValidator, UploadedImage, ValidationError};

const UPLOAD_FIELD: &str = "file";

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/health/ready").route(web::get().to(readiness)))
        .service(
            web::scope("/api/v1/images")
                .service(web::resource("/categorize").route(web::post().to(categorize)))
                .service(
                    web::resource("/categorize/async").route(web::post().to(categorize_async)),
                )
                .service(web::resource("/task/{task_id}").route(web::get().to(get_task))),
        );
}

/// JSON error envelope shared by every endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<serde_json::Value>,
    request_id: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    fn with_request_id(mut self, request_id: &RequestId) -> Self {
        self.request_id = Some(request_id.0.clone());
        self
    }

    fn from_service(err: ServiceError, request_id: &RequestId) -> Self {
        let status = match &err {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Scheduler(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Classification(e) => match e.kind {
                ErrorKind::RemoteTimeout => StatusCode::GATEWAY_TIMEOUT,
                ErrorKind::RemoteRateLimited => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::RemoteUnavailable | ErrorKind::MalformedResponse => {
                    StatusCode::BAD_GATEWAY
                }
                ErrorKind::ExecutionFault => StatusCode::INTERNAL_SERVER_ERROR,
            },
        };
        let details = match &err {
            ServiceError::Validation(e) => e.details(),
            ServiceError::Classification(e) => Some(json!({ "kind": e.kind })),
            _ => None,
        };

        Self {
            status,
            message: err.to_string(),
            details,
            request_id: None,
        }
        .with_request_id(request_id)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        if self.status.is_server_error() {
            error!(
                "Request failed: status={} request_id={} error={}",
                self.status.as_u16(),
                self.request_id.as_deref().unwrap_or("-"),
                self.message
            );
        } else {
            warn!(
                "Request rejected: status={} request_id={} error={}",
                self.status.as_u16(),
                self.request_id.as_deref().unwrap_or("-"),
                self.message
            );
        }

        let mut error = json!({
            "message": self.message,
            "status_code": self.status.as_u16(),
        });
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        let mut body = json!({ "success": false, "error": error });
        if let Some(request_id) = &self.request_id {
            body["request_id"] = json!(request_id);
        }

        HttpResponse::build(self.status).json(body)
    }
}

/// Pulls the `file` field out of a multipart upload, rejecting it as soon
/// as it grows past the configured size limit.
async fn read_upload(
    mut payload: Multipart,
    validator: &ImageValidator,
    request_id: &RequestId,
) -> Result<UploadedImage, ApiError> {
    let bad_upload = |e: actix_multipart::MultipartError| {
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid multipart upload: {}", e))
            .with_request_id(request_id)
    };

    while let Some(mut field) = payload.try_next().await.map_err(bad_upload)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .filter(|name| !name.is_empty())
            .unwrap_or("upload")
            .to_string();
        let declared_mime_type = field.content_type().map(|mime| mime.essence_str().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(bad_upload)?;
            bytes.extend_from_slice(&chunk);
            validator
                .check_size(bytes.len())
                .map_err(|e| ApiError::from_service(e.into(), request_id))?;
        }

        return Ok(UploadedImage::new(filename, declared_mime_type, bytes));
    }

    Err(ApiError::from_service(
        ValidationError::MissingFile.into(),
        request_id,
    ))
}

async fn categorize(
    service: web::Data<CategorizationService>,
    payload: Multipart,
    request_id: RequestId,
) -> Result<HttpResponse, ApiError> {
    let image = read_upload(payload, service.validator(), &request_id).await?;
    info!(
        "Sync categorization requested: filename={} size_bytes={} request_id={}",
        image.filename,
        image.size_bytes(),
        request_id.0
    );

    let result = service
        .categorize_sync(image)
        .await
        .map_err(|e| ApiError::from_service(e, &request_id))?;

    Ok(HttpResponse::Ok().json(CategorizeResponse::from(result)))
}

async fn categorize_async(
    service: web::Data<CategorizationService>,
    payload: Multipart,
    request_id: RequestId,
) -> Result<HttpResponse, ApiError> {
    let image = read_upload(payload, service.validator(), &request_id).await?;
    let filename = image.filename.clone();

    let task_id = service
        .categorize_async(image)
        .await
        .map_err(|e| ApiError::from_service(e, &request_id))?;

    Ok(HttpResponse::Accepted().json(AsyncTaskResponse {
        success: true,
        task_id,
        status: TaskStatus::Pending,
        message: format!("Image '{}' queued for processing", filename),
    }))
}

async fn get_task(
    service: web::Data<CategorizationService>,
    path: web::Path<String>,
    request_id: RequestId,
) -> Result<HttpResponse, ApiError> {
    let task = service
        .get_task_status(&path.into_inner())
        .map_err(|e| ApiError::from_service(e, &request_id))?;

    Ok(HttpResponse::Ok().json(TaskStatusResponse::from(task)))
}

async fn health(service: web::Data<CategorizationService>) -> HttpResponse {
    let mut checks = BTreeMap::new();
    checks.insert("app".to_string(), true);

    HttpResponse::Ok().json(HealthResponse {
        status: HealthStatus::Healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        checks,
        tasks_tracked: Some(service.tasks_tracked()),
    })
}

async fn readiness(service: web::Data<CategorizationService>) -> HttpResponse {
    HttpResponse::Ok().json(service.readiness().await)
}
