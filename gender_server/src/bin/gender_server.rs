//! Gender server binary.
//!
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use gender_server::{
    config::Args,
    csv_log::GenderLog,
    data_socket::spawn_data_socket,
    endpoints::{app, AppState},
    meter::spawn_meter_logger,
    nn::{GenderModel, OnnxAnalyzer, UltrafaceModel},
    overlay::Overlay,
    processor::{GenderProcessor, ProcessorContext},
    pubsub::NamedPubSub,
    utils::ensure_model,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Fetch missing models before loading them
    let client = reqwest::Client::new();
    let detector_path = args.detector_model_path();
    ensure_model(&client, Some(&args.detector.model_url()), &detector_path).await?;
    let gender_path = args.gender_model_path();
    ensure_model(&client, Some(args.gender_model_url.as_str()), &gender_path).await?;

    let detector = UltrafaceModel::new(
        &detector_path,
        args.detector,
        args.max_iou,
        args.min_face_confidence,
    )?;
    let classifier = GenderModel::new(
        &gender_path,
        args.gender_input_size,
        args.gender_preproc(),
        args.gender_output,
    )?;

    let overlay = match &args.font {
        Some(path) => Overlay::with_font_file(path)?,
        None => Overlay::new()?,
    };

    let policy = args.policy();
    log::info!("Decision policy: {:?}", &policy);

    let log = Arc::new(GenderLog::open(&args.log_file)?);
    let ctx = ProcessorContext {
        analyzer: Arc::new(OnnxAnalyzer::new(detector, classifier)),
        policy: Arc::new(policy),
        log: Arc::clone(&log),
        overlay: Arc::new(overlay),
        analyze_every: args.analyze_every,
    };

    // Pub/Sub-Engine between the data socket and the HTTP streams
    let pubsub = Arc::new(NamedPubSub::new());

    // Create socket to receive image streams via network
    spawn_data_socket(Arc::clone(&pubsub), ctx.clone(), &args.socket_address).await?;

    spawn_meter_logger();

    let state = Arc::new(AppState {
        pubsub,
        log,
        photo: Mutex::new(GenderProcessor::new(ctx)),
    });

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{}", &addr);
    axum::Server::bind(&addr)
        .serve(app(state).into_make_service())
        .await?;

    Ok(())
}
