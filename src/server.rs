use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{INSTANCES_URL, MESSAGES_URL, METRICS_URL};
use crate::context::AppContext;

const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Create the HTTP server router
pub fn create_router(app_context: Arc<AppContext>, enhanced_path: &str) -> Router {
    let app_context_clone1 = app_context.clone();
    let app_context_clone2 = app_context.clone();
    let app_context_clone3 = app_context.clone();
    let app_context_clone4 = app_context.clone();
    let index_enhanced_path = enhanced_path.to_string();

    Router::new()
        .route(
            "/",
            get(move || async move { index_page(&index_enhanced_path) }),
        )
        .route(
            enhanced_path,
            get(move || async move { enhanced_handler(app_context_clone1.clone()).await }),
        )
        .route(
            MESSAGES_URL,
            get(move || async move { messages_handler(app_context_clone2.clone()).await }),
        )
        .route(
            INSTANCES_URL,
            get(move || async move { instances_handler(app_context_clone3.clone()) }),
        )
        .route(
            METRICS_URL,
            get(move || async move { metrics_handler(app_context_clone4.clone()) }),
        )
}

/// Index page handler
fn index_page(enhanced_path: &str) -> Response {
    debug!("Index page request received");
    let html = format!(
        r#"<html>
    <head><title>RDS Pulse</title></head>
    <body>
    <h1>Available HTTP endpoints:</h1>
    <ul>
    <li><b><a href='{enhanced_path}'>{enhanced_path}</a></b>: Enhanced monitoring metrics of all instances</li>
    <li><b><a href='{MESSAGES_URL}'>{MESSAGES_URL}</a></b>: Last raw enhanced monitoring message per instance</li>
    <li><b><a href='{INSTANCES_URL}'>{INSTANCES_URL}</a></b>: Configured instances</li>
    <li><b><a href='{METRICS_URL}'>{METRICS_URL}</a></b>: Exporter self-metrics</li>
    </ul>
    </body>
    </html>"#
    );
    Html(html).into_response()
}

/// Enhanced metrics endpoint handler
///
/// Always 200: an instance without data in the last poll is simply absent.
async fn enhanced_handler(ctx: Arc<AppContext>) -> Response {
    debug!("Enhanced metrics request received");
    let output = ctx.snapshot_cache().render_enhanced().await;
    info!(output_size = output.len(), "Returning enhanced metrics");
    (
        StatusCode::OK,
        [("Content-Type", TEXT_CONTENT_TYPE)],
        output,
    )
        .into_response()
}

/// Last raw message per resource id
async fn messages_handler(ctx: Arc<AppContext>) -> Response {
    debug!("Messages request received");
    let messages = ctx.snapshot_cache().messages().await;
    json_response(&messages)
}

/// Configured instances listing handler
fn instances_handler(ctx: Arc<AppContext>) -> Response {
    debug!("Instances listing request received");
    json_response(ctx.directory().instances())
}

/// Exporter self-metrics handler
fn metrics_handler(ctx: Arc<AppContext>) -> Response {
    match ctx.exporter_metrics().render() {
        Ok(output) => {
            (
                StatusCode::OK,
                [("Content-Type", TEXT_CONTENT_TYPE)],
                output,
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to render exporter metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                format!("failed to render metrics: {e}"),
            )
                .into_response()
        }
    }
}

fn json_response<T: serde::Serialize + ?Sized>(value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(serialized) => {
            (
                StatusCode::OK,
                [("Content-Type", JSON_CONTENT_TYPE)],
                serialized,
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                format!("failed to serialize response: {e}"),
            )
                .into_response()
        }
    }
}

/// Start the HTTP server and serve until `cancel` fires
pub async fn start_server(
    listen_address: &str,
    enhanced_path: &str,
    app_context: AppContext,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app_context = Arc::new(app_context);
    let router = create_router(app_context, enhanced_path);

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    info!("Server listening on {}", listen_address);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}
