use anyhow::{Context, Result};
use emoflix_core::{OnnxEmotionModel, Pipeline};
use emoflixd::config::Config;
use emoflixd::routes::{self, AppState};
use emoflixd::{engine, server, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(?config, "emoflixd starting");

    let model = OnnxEmotionModel::load(&config.model_paths()).context("failed to load models")?;
    let pipeline = Pipeline::new(model, config.clahe, config.policy);
    let engine = engine::spawn_engine(pipeline)?;

    let app = routes::router(AppState { engine }, config.max_body_bytes);
    server::serve(app, &config.listen_addr()).await
}
