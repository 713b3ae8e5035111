//! HTTP surface: thin translators from the wire paths to engine calls.
//!
//! Handlers decode the JSON body, hand the message to the engine, and
//! answer 200. A malformed body is the only client error; everything else
//! is the engine's business and never fails the request.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::engine::Engine;
use crate::error::MonitorError;
use crate::wire;

/// Build the monitor router over a shared engine.
pub fn router(engine: Engine) -> Router {
    Router::new()
        .route(wire::POM, post(pom))
        .route(wire::CA_UPDATE_EEA, post(ca_update_eea))
        .route(wire::SRH, post(srh))
        .route(wire::REVOCATION_NOTIFICATION, post(revocation_notification))
        .route(wire::REVOCATION_REQUEST, post(revocation_request))
        .route(
            wire::REVOCATION_PARTIAL_SIGNATURE,
            post(revocation_partial_signature),
        )
        .route(wire::LOGGER_UPDATE_EEA, post(logger_update_eea))
        .route(wire::LOGGER_UPDATE, post(logger_update))
        .route(wire::STH, post(sth))
        .route(
            wire::TRANSPARENCY_NOTIFICATION,
            post(transparency_notification),
        )
        .route(wire::TRANSPARENCY_REQUEST, post(transparency_request))
        .route(
            wire::TRANSPARENCY_PARTIAL_SIGNATURE,
            post(transparency_partial_signature),
        )
        .with_state(engine)
}

/// Bind this monitor's configured port and serve until the process ends.
pub async fn serve(engine: Engine) -> Result<(), MonitorError> {
    let port = engine
        .settings()
        .portmap
        .get(engine.id())
        .cloned()
        .unwrap_or_default();
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!(monitor = %engine.id(), %port, "monitor listening");
    axum::serve(listener, router(engine))
        .await
        .map_err(MonitorError::Io)?;
    Ok(())
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, StatusCode> {
    serde_json::from_slice(body).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn ca_update_eea(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(update) => {
            engine.handle_ca_update(update, body.len() as u64).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn srh(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(srh) => {
            engine.handle_srh(srh).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn revocation_notification(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(note) => {
            engine.handle_revocation_notification(note).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn revocation_request(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(note) => {
            engine.handle_revocation_request(note).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn revocation_partial_signature(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(msd) => {
            engine.handle_revocation_partial_signature(msd).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn logger_update_eea(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(update) => {
            engine
                .handle_logger_update_eea(update, body.len() as u64)
                .await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn logger_update(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(update) => {
            engine.handle_logger_update(update, body.len() as u64).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn sth(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(sth) => {
            engine.handle_sth(sth).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn transparency_notification(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(note) => {
            engine.handle_transparency_notification(note).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn transparency_request(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(note) => {
            engine.handle_transparency_request(note).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn transparency_partial_signature(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(msd) => {
            engine.handle_transparency_partial_signature(msd).await;
            StatusCode::OK
        }
        Err(code) => code,
    }
}

async fn pom(State(engine): State<Engine>, body: Bytes) -> StatusCode {
    match decode(&body) {
        Ok(proof) => {
            engine.handle_pom(proof);
            StatusCode::OK
        }
        Err(code) => code,
    }
}
