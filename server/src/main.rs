mod routes;
mod services;
mod state;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    // Initialize translation client (non-fatal: captions still relay raw
    // text if config is missing).
    let translator = match services::translate::HttpTranslator::from_env() {
        Ok(client) => {
            tracing::info!("translation client initialized");
            Some(Arc::new(client) as Arc<dyn services::translate::Translate>)
        }
        Err(e) => {
            tracing::warn!(error = %e, "translation client not configured, translation disabled");
            None
        }
    };

    let state = state::AppState::new(translator);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "classlink server listening");
    axum::serve(listener, app).await.expect("server failed");
}
