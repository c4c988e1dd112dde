//! ABOUTME: User management endpoints under /rest
//! ABOUTME: Add, list, look up, update and soft delete users

use crate::{
    error::ApiResult,
    models::{
        AddUserRequest, DeleteUserRequest, EmailQuery, ErrorResponse, StatusResponse,
        UpdateUserRequest, UserInfo,
    },
    AppState,
};
use actix_web::{get, post, web, HttpResponse};
use tracing::debug;
use validator::Validate;

/// Add a new user
#[utoipa::path(
    post,
    path = "/rest/add",
    tag = "users",
    request_body = AddUserRequest,
    responses(
        (status = 200, description = "User saved", body = StatusResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
#[post("/add")]
pub async fn add_user(
    state: web::Data<AppState>,
    payload: web::Json<AddUserRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;
    let AddUserRequest { name, email } = payload.into_inner();
    debug!("Add user request for email: {}", email);

    state.users.add_user(name, email).await?;
    Ok(HttpResponse::Ok().json(StatusResponse::new("Saved")))
}

/// List users that are not deleted
#[utoipa::path(
    get,
    path = "/rest/users",
    tag = "users",
    responses((status = 200, description = "Active users", body = [UserInfo]))
)]
#[get("/users")]
pub async fn list_users(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let users: Vec<UserInfo> = state
        .users
        .list_users()
        .await?
        .into_iter()
        .map(UserInfo::from)
        .collect();
    Ok(HttpResponse::Ok().json(users))
}

/// List soft deleted users
#[utoipa::path(
    get,
    path = "/rest/deleted-users",
    tag = "users",
    responses((status = 200, description = "Deleted users", body = [UserInfo]))
)]
#[get("/deleted-users")]
pub async fn list_deleted_users(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let users: Vec<UserInfo> = state
        .users
        .list_deleted_users()
        .await?
        .into_iter()
        .map(UserInfo::from)
        .collect();
    Ok(HttpResponse::Ok().json(users))
}

/// Look up a live user by email
#[utoipa::path(
    get,
    path = "/rest/userByEmail",
    tag = "users",
    params(EmailQuery),
    responses(
        (status = 200, description = "User found", body = UserInfo),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
#[get("/userByEmail")]
pub async fn user_by_email(
    state: web::Data<AppState>,
    query: web::Query<EmailQuery>,
) -> ApiResult<HttpResponse> {
    let user = state.users.get_user_by_email(&query.email).await?;
    Ok(HttpResponse::Ok().json(UserInfo::from(user)))
}

/// Update a user's name and/or email
#[utoipa::path(
    post,
    path = "/rest/update",
    tag = "users",
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = StatusResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
    )
)]
#[post("/update")]
pub async fn update_user(
    state: web::Data<AppState>,
    payload: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;
    let UpdateUserRequest { id, name, email } = payload.into_inner();

    state.users.update_user(&id, name, email).await?;
    Ok(HttpResponse::Ok().json(StatusResponse::new("Updated")))
}

/// Soft delete a user
#[utoipa::path(
    post,
    path = "/rest/delete",
    tag = "users",
    request_body = DeleteUserRequest,
    responses(
        (status = 200, description = "User soft deleted", body = StatusResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
#[post("/delete")]
pub async fn delete_user(
    state: web::Data<AppState>,
    payload: web::Json<DeleteUserRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;

    state.users.delete_user(&payload.id).await?;
    Ok(HttpResponse::Ok().json(StatusResponse::new("Soft deleted")))
}

/// Register the /rest routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/rest")
            .service(add_user)
            .service(list_users)
            .service(list_deleted_users)
            .service(user_by_email)
            .service(update_user)
            .service(delete_user),
    );
}
