//! Endpoints of HTTP server.
//!
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use axum::{
    body::{Bytes, StreamBody},
    extract::Query,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Local;
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    csv_log::GenderLog,
    overlay::encode_jpeg,
    processor::{GenderProcessor, PhotoError},
    pubsub::{gender_channel, BytesReceiver, NamedPubSub},
};

/// File name offered to the browser for the CSV download.
pub const DOWNLOAD_FILE_NAME: &str = "gender_logs.csv";

/// Shared state of all endpoints.
pub struct AppState {
    pub pubsub: Arc<NamedPubSub>,
    pub log: Arc<GenderLog>,
    /// Photo mode has its own reading and cooldown, independent of live streams.
    pub photo: Mutex<GenderProcessor>,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/stream", get(named_stream))
        .route("/gender_stream", get(gender_stream))
        .route("/photo", post(photo))
        .route("/download", get(download))
        .layer(Extension(state))
}

/// Search parameters available to streams.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoParams {
    /// `jpeg` to get the annotated photo instead of a JSON report.
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Serialize)]
struct PhotoWarning {
    warning: String,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Landing page with the live stream, photo upload and log download.
///
/// The page is static. The stream name is read from the page URL in the
/// browser and only ever ends up URL-encoded in the image source.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Gender Recognition AI</title></head>
<body>
  <h1>Gender Recognition AI</h1>
  <p>Real-time gender detection. Readings are automatically saved to CSV.</p>
  <p><a href="/download">Download Excel/CSV Logs</a></p>
  <img id="stream" width="100%">
  <h3>Single photo</h3>
  <input type="file" id="photo" accept="image/jpeg">
  <pre id="report"></pre>
  <script>
    const name = new URLSearchParams(window.location.search).get("name") || "unknown";
    document.getElementById("stream").src = "/gender_stream?name=" + encodeURIComponent(name);
    document.getElementById("photo").addEventListener("change", async (ev) => {
      const resp = await fetch("/photo", { method: "POST", body: ev.target.files[0] });
      document.getElementById("report").textContent = await resp.text();
    });
  </script>
</body>
</html>"#;

/// Endpoint of received image streams.
pub async fn named_stream(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name.unwrap_or_else(|| "unknown".into());
    log::info!("Stream for {} requested", &name);

    multipart_response(state.pubsub.get_broadcast_receiver(&name).await)
}

/// Endpoint of annotated image streams.
pub async fn gender_stream(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name.unwrap_or_else(|| "unknown".into());
    log::info!("Gender stream for {} requested", &name);

    multipart_response(state.pubsub.get_broadcast_receiver(&gender_channel(&name)).await)
}

fn multipart_response(rx: BytesReceiver) -> impl IntoResponse {
    // Lagging listeners skip frames instead of ending the stream
    let stream = BroadcastStream::new(rx)
        .filter_map(|item| future::ready(item.ok()))
        .map(Ok::<_, String>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

/// Analyse a single JPEG photo posted as request body.
pub async fn photo(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<PhotoParams>,
    body: Bytes,
) -> Response {
    let image = match image::load_from_memory(&body) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
            log::info!("Rejecting photo: {e}");
            return (StatusCode::BAD_REQUEST, format!("Could not decode image: {e}"))
                .into_response();
        }
    };
    let want_jpeg = params.format.as_deref() == Some("jpeg");

    let outcome = tokio::task::spawn_blocking(move || {
        let mut processor = state
            .photo
            .lock()
            .map_err(|_| anyhow!("photo processor lock poisoned"))?;
        let report = processor.analyze_photo_at(&image, Local::now().naive_local());

        let annotated = match (&report, want_jpeg) {
            (Ok(_), true) => {
                let mut image = image;
                processor.annotate(&mut image);
                Some(encode_jpeg(&image, 90)?)
            }
            _ => None,
        };

        Ok::<_, anyhow::Error>((report, annotated))
    })
    .await;

    match outcome {
        Ok(Ok((Ok(_), Some(jpeg)))) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Ok((Ok(report), None))) => Json(report).into_response(),
        Ok(Ok((Err(e), _))) => {
            match &e {
                PhotoError::NoFace => log::info!("No face in photo"),
                PhotoError::Analysis(err) => log::warn!("Photo analysis failed: {err:#}"),
            }
            let warning = PhotoWarning {
                warning: e.to_string(),
            };
            (StatusCode::UNPROCESSABLE_ENTITY, Json(warning)).into_response()
        }
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(e.into()),
    }
}

/// Serve the accumulated CSV log as attachment.
pub async fn download(Extension(state): Extension<Arc<AppState>>) -> Response {
    let log = Arc::clone(&state.log);
    match tokio::task::spawn_blocking(move || log.contents()).await {
        Ok(Ok(contents)) => {
            let headers = [
                (header::CONTENT_TYPE, "text/csv".to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{DOWNLOAD_FILE_NAME}\""),
                ),
            ];
            (headers, contents).into_response()
        }
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(e.into()),
    }
}

fn internal_error(e: anyhow::Error) -> Response {
    log::error!("Request failed: {e:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
}
