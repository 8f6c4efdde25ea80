//! sieve REST API server

use anyhow::Result;
use core_pipeline::Settings;
use sieve_server::{init_tracing, serve, AppState};
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config path as the only argument
    let settings = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Settings::load_from(&path)?,
        None => Settings::load()?,
    };
    init_tracing(&settings.log_level);

    let state = Arc::new(AppState::from_settings(settings)?);
    serve(state).await
}
