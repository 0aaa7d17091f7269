use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use image::RgbaImage;
use tokio::net::TcpListener;

use crate::encode;
use crate::error::EncodeError;
use crate::pixel;
use crate::snapshot::Snapshot;

const LARGE_FACTOR: u32 = 16;
const LARGE_MARGIN: u32 = 2;
/// Largest side `/large.png` will produce.
const LARGE_MAX_SIDE: u32 = 4096;

impl IntoResponse for EncodeError {
    fn into_response(self) -> Response {
        log::error!("problem encoding image: {self}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

fn ok(content_type: &'static str, body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Encodes the published frame while holding the read lock.
fn encode_frame(
    snapshot: &Snapshot,
    encoder: impl FnOnce(&RgbaImage) -> Result<Vec<u8>, EncodeError>,
) -> Result<Vec<u8>, EncodeError> {
    let state = snapshot.read();
    let frame = state.frame.as_ref().ok_or(EncodeError::NotRendered)?;
    encoder(&frame.image)
}

async fn serve_json(State(snapshot): State<Snapshot>) -> Result<Response, EncodeError> {
    let body = encode::to_json(&snapshot.screen())?;
    Ok(ok("application/json", body))
}

async fn serve_png(State(snapshot): State<Snapshot>) -> Result<Response, EncodeError> {
    Ok(ok("image/png", encode_frame(&snapshot, encode::to_png)?))
}

async fn serve_bmp(State(snapshot): State<Snapshot>) -> Result<Response, EncodeError> {
    Ok(ok("image/bmp", encode_frame(&snapshot, encode::to_bmp)?))
}

async fn serve_txt(State(snapshot): State<Snapshot>) -> Result<Response, EncodeError> {
    let body = encode_frame(&snapshot, |buf| Ok(encode::to_text(buf)))?;
    Ok(ok("text/plain", body))
}

async fn serve_large_png(State(snapshot): State<Snapshot>) -> Result<Response, EncodeError> {
    let src = snapshot
        .image()
        .unwrap_or_else(|| Arc::new(RgbaImage::from_pixel(1, 1, pixel::TRANSPARENT)));
    let (width, height) = (
        src.width().saturating_mul(LARGE_FACTOR),
        src.height().saturating_mul(LARGE_FACTOR),
    );
    if width > LARGE_MAX_SIDE || height > LARGE_MAX_SIDE {
        return Err(EncodeError::TooLarge {
            width,
            height,
            max: LARGE_MAX_SIDE,
        });
    }
    let large = pixel::enlarge(&src, LARGE_FACTOR, LARGE_MARGIN);
    Ok(ok("image/png", encode::to_png(&large)?))
}

pub fn router(snapshot: Snapshot) -> Router {
    Router::new()
        .route("/index.json", get(serve_json))
        .route("/index.png", get(serve_png))
        .route("/index.bmp", get(serve_bmp))
        .route("/index.txt", get(serve_txt))
        .route("/large.png", get(serve_large_png))
        .with_state(snapshot)
}

pub async fn serve(
    listener: TcpListener,
    snapshot: Snapshot,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), anyhow::Error> {
    let addr = listener.local_addr().context("Failed to read listen address")?;
    log::info!("listening on http://{addr}");
    axum::serve(listener, router(snapshot))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}
