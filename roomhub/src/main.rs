use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use roomhub::api;
use roomhub::app_state::{AppState, Collaborators};
use roomhub::collaborators::{
    DisabledModel, HttpPageFetcher, InMemoryIndex, LanguageModel, SearchIndex,
};
use roomhub::config::{load_env_file, ServerConfig};
use roomhub::llm::OpenAiCompatibleModel;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load .env before reading config so model keys are visible.
    load_env_file();
    let config = ServerConfig::from_env();

    tracing::info!(bind = %config.bind, data_dir = %config.data_dir.display(), "Starting RoomHub");

    let index: Arc<dyn SearchIndex> = match &config.index_file {
        Some(path) => {
            let index = InMemoryIndex::from_json_file(path)
                .with_context(|| format!("loading index seed {}", path.display()))?;
            tracing::info!(path = %path.display(), entries = index.len(), "Search index seeded");
            Arc::new(index)
        }
        None => {
            tracing::info!("No ROOMHUB_INDEX_FILE set; starting with an empty index");
            Arc::new(InMemoryIndex::new())
        }
    };

    let model: Arc<dyn LanguageModel> = match OpenAiCompatibleModel::from_config(&config.llm)? {
        Some(model) => {
            tracing::info!(model = %config.llm.model, base_url = %config.llm.base_url, "Model client configured");
            Arc::new(model)
        }
        None => {
            tracing::warn!("LLM_API_KEY not set; assistant replies are disabled");
            Arc::new(DisabledModel)
        }
    };
    let fetcher = Arc::new(HttpPageFetcher::new()?);

    let allowed_origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Skipping invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600));

    let bind = config.bind;
    let app_state = Arc::new(AppState::new(
        config,
        Collaborators::new(index, model, fetcher),
    ));
    let background = app_state.spawn_background_tasks();

    let api_state = api::ApiState {
        app_state: app_state.clone(),
    };
    let app = api::router().with_state(api_state).layer(cors);

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!("Listening on http://{bind}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }
    app_state.registry().shutdown_all().await;
    tracing::info!("RoomHub stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
