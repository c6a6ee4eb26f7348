use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::protocol::{FrameMsg, ProtoMsg};
use futures::SinkExt;
use gender_server::{
    analysis::{FaceAnalysis, FaceAnalyzer, FaceRegion, GenderScores},
    csv_log::{GenderLog, HEADER},
    data_socket::serve_data_socket,
    decision::DecisionPolicy,
    endpoints::{app, AppState},
    overlay::{encode_jpeg, Overlay},
    processor::{GenderProcessor, ProcessorContext},
    pubsub::{gender_channel, NamedPubSub},
};
use image::{Rgb, RgbImage};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Sees a face with 45% "Woman" in bright images, fails on gray ones and
/// finds nothing in dark ones.
struct BrightnessAnalyzer;

impl FaceAnalyzer for BrightnessAnalyzer {
    fn analyze(&self, image: &RgbImage) -> Result<Vec<FaceAnalysis>> {
        match image.get_pixel(image.width() - 1, image.height() - 1)[0] {
            0..=63 => return Ok(vec![]),
            64..=191 => bail!("classifier output missing"),
            _ => {}
        }
        Ok(vec![FaceAnalysis {
            region: FaceRegion {
                x: 10,
                y: 10,
                width: 20,
                height: 20,
            },
            detection_confidence: 0.99,
            gender: GenderScores::new(45.0, 55.0),
        }])
    }
}

fn context(dir: &tempfile::TempDir) -> Result<ProcessorContext> {
    Ok(ProcessorContext {
        analyzer: Arc::new(BrightnessAnalyzer),
        policy: Arc::new(DecisionPolicy::default()),
        log: Arc::new(GenderLog::open(dir.path().join("gender_log.csv"))?),
        overlay: Arc::new(Overlay::new()?),
        analyze_every: 30,
    })
}

fn jpeg(brightness: u8) -> Result<Vec<u8>> {
    encode_jpeg(&RgbImage::from_pixel(64, 48, Rgb([brightness; 3])), 90)
}

async fn serve_http(ctx: ProcessorContext) -> SocketAddr {
    let state = Arc::new(AppState {
        pubsub: Arc::new(NamedPubSub::new()),
        log: Arc::clone(&ctx.log),
        photo: Mutex::new(GenderProcessor::new(ctx)),
    });
    let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
        .serve(app(state).into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

#[tokio::test]
async fn camera_frames_are_annotated_and_logged() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = context(&dir)?;
    let log = Arc::clone(&ctx.log);
    let pubsub = Arc::new(NamedPubSub::new());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(serve_data_socket(listener, Arc::clone(&pubsub), ctx));

    let mut annotated = pubsub.get_broadcast_receiver(&gender_channel("cam")).await;

    let stream = TcpStream::connect(addr).await?;
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());
    transport
        .send(Bytes::from(ProtoMsg::ConnectReq("cam".into()).serialize()?))
        .await?;
    transport
        .send(Bytes::from(
            ProtoMsg::FrameMsg(FrameMsg::new(0, jpeg(255)?)).serialize()?,
        ))
        .await?;

    let item = tokio::time::timeout(Duration::from_secs(10), annotated.recv()).await??;
    assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg"));

    let observations = log.read_all()?;
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].label, "Female");
    assert_eq!(observations[0].confidence, 45.0);

    transport
        .send(Bytes::from(ProtoMsg::Disconnect.serialize()?))
        .await?;
    Ok(())
}

#[tokio::test]
async fn photo_endpoint_reports_and_warns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let addr = serve_http(context(&dir)?).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/photo");

    let resp = client.post(&url).body(jpeg(255)?).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let report: serde_json::Value = serde_json::from_str(&resp.text().await?)?;
    assert_eq!(report["label"], "Female");
    assert_eq!(report["faces"], 1);
    assert_eq!(report["logged"], true);

    // A second photo right away falls into the cooldown
    let resp = client.post(&url).body(jpeg(255)?).send().await?;
    let report: serde_json::Value = serde_json::from_str(&resp.text().await?)?;
    assert_eq!(report["logged"], false);

    let resp = client.post(&url).body(jpeg(0)?).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    assert!(resp.text().await?.contains("No face detected"));

    let resp = client.post(&url).body(jpeg(128)?).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    let warning: serde_json::Value = serde_json::from_str(&resp.text().await?)?;
    assert_eq!(
        warning["warning"],
        "Face analysis failed: classifier output missing"
    );

    let resp = client.post(&url).body("not an image").send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{url}?format=jpeg"))
        .body(jpeg(255)?)
        .send()
        .await?;
    assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "image/jpeg");
    let annotated = image::load_from_memory(&resp.bytes().await?)?.to_rgb8();
    assert_eq!(annotated.dimensions(), (64, 48));

    Ok(())
}

#[tokio::test]
async fn download_serves_csv_attachment() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let addr = serve_http(context(&dir)?).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/photo"))
        .body(jpeg(255)?)
        .send()
        .await?;

    let resp = client.get(format!("http://{addr}/download")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()[reqwest::header::CONTENT_TYPE], "text/csv");
    assert_eq!(
        resp.headers()[reqwest::header::CONTENT_DISPOSITION],
        "attachment; filename=\"gender_logs.csv\""
    );

    let body = resp.text().await?;
    let mut lines = body.lines();
    assert_eq!(lines.next(), Some(HEADER));
    assert!(lines.next().unwrap().contains(",Female,45.00%"));
    assert_eq!(lines.next(), None);

    let health = client
        .get(format!("http://{addr}/healthcheck"))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(health, "healthy");
    Ok(())
}

#[tokio::test]
async fn index_page_does_not_reflect_stream_name() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let addr = serve_http(context(&dir)?).await;

    let payload = "\"><script>alert(1)</script>";
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/"))
        .query(&[("name", payload)])
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let page = resp.text().await?;
    assert!(page.contains("Download Excel/CSV Logs"));
    assert!(!page.contains(payload));
    assert!(!page.contains("alert(1)"));
    Ok(())
}
