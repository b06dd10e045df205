// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

use refit::handlers::{AppState, configure};
use refit::{FilterConfig, FilterPipeline};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting refit service...");

    let config = FilterConfig::from_env().context("loading configuration")?;
    let bind_address = config.bind_address.clone();
    let public_mount = config.public_url_prefix().trim_end_matches('/').to_string();
    let public_root = config.public_root.clone();

    let pipeline = Arc::new(
        FilterPipeline::from_config(config)
            .await
            .context("initializing filter pipeline")?,
    );
    let app_state = AppState { pipeline };

    info!(
        "Serving derivatives from {} at {}",
        public_root.display(),
        public_mount
    );
    info!("Starting HTTP server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(configure)
            .service(actix_files::Files::new(&public_mount, &public_root))
    })
    .bind(&bind_address)
    .with_context(|| format!("binding {}", bind_address))?
    .run()
    .await?;

    Ok(())
}
