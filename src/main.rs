use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod access;
mod config;
mod context;
mod db;
mod error;
mod forum;
mod gradebook;
mod grades;
mod models;
mod params;
mod rewrite;
mod routes;
mod service;
mod store;

use config::Config;
use rewrite::PluginfileRewriter;
use service::Service;
use store::pg::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cfg.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::connect(&cfg.database_url).await?;
    // crate-relative path for sqlx migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let service = Service::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(PluginfileRewriter::new(cfg.wwwroot.clone())),
        cfg.forum.clone(),
    );

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(service))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(wwwroot = %cfg.wwwroot, "listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
