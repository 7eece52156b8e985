use log::info;
use snafu::{prelude::*, Snafu};

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::intake::{IntakeService, SubmissionResponse};

#[derive(Debug, Snafu)]
pub enum ServeError {
    #[snafu(display("Could not listen on {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Server error: {source}"))]
    Serve { source: std::io::Error },
}

pub fn router(service: IntakeService) -> Router {
    Router::new()
        .route("/", get(status_page).post(submit))
        .with_state(service)
}

async fn status_page(State(service): State<IntakeService>) -> Html<String> {
    Html(service.status_page(Utc::now()))
}

// The outcome is carried in the body; the transport status is always 200.
async fn submit(State(service): State<IntakeService>, body: Bytes) -> Json<SubmissionResponse> {
    Json(service.submit(&body).await)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

pub async fn serve(service: IntakeService) -> Result<(), ServeError> {
    let addr = service.config().listen;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(BindSnafu { addr })?;
    info!(
        "Listening on {}, writing to table {} in {}",
        addr,
        service.config().table_name,
        service.gateway().reference()
    );
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(ServeSnafu {})
}
