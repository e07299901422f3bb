mod classifier;
mod config;
mod middleware;
mod routes;
mod services;
mod tasks;
mod upload;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use classifier::{ClassifierGateway, GatewayConfig, GeminiClient};
use config::Settings;
use middleware::{cors, RequestIdMiddleware};
use routes::configure_routes;
use services::CategorizationService;
use std::sync::Arc;
use tasks::{InMemoryTaskStore, SchedulerConfig, TaskScheduler, TaskStore};
use upload::ImageValidator;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let settings = Settings::load().map_err(|e| {
        log::error!("Failed to load settings: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    let gemini = GeminiClient::from_settings(&settings);
    if settings.gemini_api_key.is_empty() {
        log::warn!("GEMINI_API_KEY is not set; categorization requests will fail until it is configured");
    } else {
        log::info!("Gemini model: {}", settings.gemini_model);
    }

    let gateway = ClassifierGateway::new(Arc::new(gemini), GatewayConfig::from_settings(&settings));
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let scheduler = Arc::new(TaskScheduler::start(
        SchedulerConfig::from_settings(&settings),
        store.clone(),
        gateway.clone(),
    ));
    let service = CategorizationService::new(
        ImageValidator::from_settings(&settings),
        gateway,
        store,
        scheduler,
    );
    let service_data = web::Data::new(service.clone());

    let bind_address = format!("{}:{}", settings.host, settings.port);
    let cors_origins = settings.cors_origins.clone();
    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(RequestIdMiddleware)
            .wrap(cors(&cors_origins))
            .wrap(Logger::new(
                "%a \"%r\" %s %b %T request_id=%{x-request-id}o",
            ))
            .app_data(service_data.clone())
            .configure(configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    service.shutdown().await;
    log::info!(
        "Server stopped with {} tasks tracked",
        service.tasks_tracked()
    );
    Ok(())
}
