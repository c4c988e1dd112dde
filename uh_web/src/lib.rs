//! ABOUTME: Web API layer for the user, log and notification services
//! ABOUTME: Provides REST endpoints, the SSE stream and OpenAPI documentation

use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use uh_core::Result;
use uh_db::{Cache, Db, User};
use uh_events::Publisher;
use uh_notify::FanoutHub;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod models;
pub mod routes;
pub mod service;

pub use routes::notifications::{NotificationStream, StreamSettings};
pub use service::{LogService, UserService};

use routes::{logs, notifications, users};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub logs: LogService,
    pub hub: FanoutHub,
    pub stream: StreamSettings,
}

impl AppState {
    pub fn new(
        db: Db,
        user_cache: Arc<Cache<User>>,
        publisher: Arc<dyn Publisher>,
        hub: FanoutHub,
        stream: StreamSettings,
    ) -> Self {
        Self {
            users: UserService::new(db.clone(), user_cache, publisher),
            logs: LogService::new(db),
            hub,
            stream,
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        users::add_user,
        users::list_users,
        users::list_deleted_users,
        users::user_by_email,
        users::update_user,
        users::delete_user,
        logs::add_log,
        logs::read_logs,
        notifications::notifications,
    ),
    components(
        schemas(
            models::AddUserRequest,
            models::UpdateUserRequest,
            models::DeleteUserRequest,
            models::StatusResponse,
            models::UserInfo,
            models::AddLogRequest,
            models::LogEntryInfo,
            models::ErrorResponse,
        ),
    ),
    tags(
        (name = "users", description = "User management"),
        (name = "logs", description = "Service log"),
        (name = "notifications", description = "Live user events"),
    )
)]
pub struct ApiDoc;

/// Create the main web application service factory
pub fn create_app(
    state: AppState,
) -> App<
    impl actix_web::dev::ServiceFactory<
        actix_web::dev::ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse<impl actix_web::body::MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(web::Data::new(state))
        .wrap(actix_web::middleware::Logger::default())
        .service(SwaggerUi::new("/docs/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .configure(users::configure)
        .configure(logs::configure)
        .configure(notifications::configure)
}

/// Start the web server
pub async fn start_server(bind_addr: &str, state: AppState) -> Result<()> {
    tracing::info!("Starting web server on {}", bind_addr);

    HttpServer::new(move || create_app(state.clone()))
        .bind(bind_addr)
        .map_err(|e| uh_core::Error::Config(format!("Failed to bind web server: {}", e)))?
        .run()
        .await
        .map_err(|e| uh_core::Error::Config(format!("Web server error: {}", e)))?;

    Ok(())
}
