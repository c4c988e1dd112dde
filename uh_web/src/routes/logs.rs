//! ABOUTME: Log service endpoints under /logs
//! ABOUTME: Records log lines and reads them back, optionally per service

use crate::{
    error::ApiResult,
    models::{AddLogRequest, ErrorResponse, LogEntryInfo, ServiceQuery},
    AppState,
};
use actix_web::{get, post, web, HttpResponse};
use validator::Validate;

/// Record a log line; the timestamp is assigned by the server
#[utoipa::path(
    post,
    path = "/logs/add",
    tag = "logs",
    request_body = AddLogRequest,
    responses(
        (status = 200, description = "Stored entry", body = LogEntryInfo),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
#[post("/add")]
pub async fn add_log(
    state: web::Data<AppState>,
    payload: web::Json<AddLogRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;
    let AddLogRequest { service, message } = payload.into_inner();

    let entry = state.logs.add_log(service, message).await?;
    Ok(HttpResponse::Ok().json(LogEntryInfo::from(entry)))
}

/// Read all log lines, or one service's
#[utoipa::path(
    get,
    path = "/logs/read",
    tag = "logs",
    params(ServiceQuery),
    responses((status = 200, description = "Log entries", body = [LogEntryInfo]))
)]
#[get("/read")]
pub async fn read_logs(
    state: web::Data<AppState>,
    query: web::Query<ServiceQuery>,
) -> ApiResult<HttpResponse> {
    let entries: Vec<LogEntryInfo> = state
        .logs
        .read_logs(query.service.as_deref())
        .await?
        .into_iter()
        .map(LogEntryInfo::from)
        .collect();
    Ok(HttpResponse::Ok().json(entries))
}

/// Register the /logs routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/logs").service(add_log).service(read_logs));
}
