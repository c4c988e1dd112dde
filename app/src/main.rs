use app::Services;
use std::process;
use uh_config::Config;
use uh_core::telemetry;

#[tokio::main]
async fn main() {
    // Load configuration - exit with non-zero if invalid
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    telemetry::init_tracing(&config.server.environment, "userhub");
    tracing::info!("userhub starting");
    tracing::debug!(?config, "Configuration loaded successfully");

    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        obs_port = %config.server.obs_port,
        db_path = %config.database.path,
        exchange = %config.broker.exchange,
        "Application configured"
    );

    let services = match Services::build(&config).await {
        Ok(services) => services,
        Err(e) => {
            tracing::error!("Failed to initialize services: {}", e);
            process::exit(1);
        }
    };

    let consumers = match services.start_consumers().await {
        Ok(handles) => handles,
        Err(e) => {
            tracing::error!("{}", e);
            process::exit(1);
        }
    };

    services.obs_state.readiness.set_ready(true);

    let obs_bind_addr = format!("0.0.0.0:{}", config.server.obs_port);
    let web_bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // Run both servers concurrently
    let obs_future = uh_obs::start_server(&obs_bind_addr, services.obs_state.clone());
    let web_future = uh_web::start_server(&web_bind_addr, services.app_state.clone());

    let result = tokio::select! {
        obs_result = obs_future => {
            tracing::error!("Observability server exited");
            obs_result
        }
        web_result = web_future => {
            tracing::info!("Web server exited");
            web_result
        }
    };

    services.shutdown();
    for handle in consumers {
        if let Err(e) = handle.await {
            tracing::warn!("Consumer task ended abnormally: {}", e);
        }
    }

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        process::exit(1);
    }
}
