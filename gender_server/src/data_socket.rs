//! Data socket module to receive image streams via network.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::protocol::ProtoMsg;
use futures::StreamExt;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{
    as_jpeg_stream_item,
    meter::METER,
    overlay::encode_jpeg,
    processor::{GenderProcessor, ProcessorContext},
    pubsub::{gender_channel, BytesSender, NamedPubSub},
};

const JPEG_QUALITY: u8 = 80;

/// Bind the data socket and serve it on a separate task.
pub async fn spawn_data_socket(
    pubsub: Arc<NamedPubSub>,
    ctx: ProcessorContext,
    addr: &str,
) -> Result<JoinHandle<Result<()>>> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;
    log::info!("Data socket listening on {}", listener.local_addr()?);

    Ok(tokio::spawn(serve_data_socket(listener, pubsub, ctx)))
}

/// Accept camera connections forever.
pub async fn serve_data_socket(
    listener: TcpListener,
    pubsub: Arc<NamedPubSub>,
    ctx: ProcessorContext,
) -> Result<()> {
    loop {
        let (socket, _peer_addr) = listener.accept().await?;
        let pubsub = Arc::clone(&pubsub);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_incoming(socket, pubsub, ctx).await {
                log::warn!("Camera connection closed: {e:#}");
            }
        });
    }
}

async fn handle_incoming(
    stream: TcpStream,
    pubsub: Arc<NamedPubSub>,
    ctx: ProcessorContext,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New TCP connection", &addr);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let channel = match transport.next().await {
        Some(Ok(data)) => match ProtoMsg::deserialize(&data) {
            Ok(ProtoMsg::ConnectReq(channel)) => channel,
            _ => bail!("{addr}: first message must name the channel"),
        },
        _ => bail!("{addr}: no channel name"),
    };
    log::info!("{}: Streaming channel {}", &addr, &channel);

    let raw_tx = pubsub.get_broadcast_sender(&channel).await;
    let gender_tx = pubsub.get_broadcast_sender(&gender_channel(&channel)).await;

    // One frame in flight, frames arriving meanwhile are dropped
    let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(1);
    let worker = tokio::task::spawn_blocking(move || {
        run_processor(GenderProcessor::new(ctx), frame_rx, gender_tx)
    });

    while let Some(res) = transport.next().await {
        let data = match res {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Error in TCP codec: {e}");
                break;
            }
        };

        match ProtoMsg::deserialize(&data) {
            Ok(ProtoMsg::FrameMsg(msg)) => {
                METER.tick_raw();
                let jpeg = Bytes::from(msg.data);
                if raw_tx.receiver_count() > 0 {
                    raw_tx.send(as_jpeg_stream_item(&jpeg)).ok();
                }

                match frame_tx.try_send(jpeg) {
                    Ok(()) => (),
                    Err(TrySendError::Full(_)) => {
                        log::trace!("{}: Processor busy, dropping frame {}", &channel, msg.seq)
                    }
                    Err(TrySendError::Closed(_)) => bail!("processor for {channel} stopped"),
                }
            }
            Ok(ProtoMsg::Disconnect) => {
                log::info!("{}: Channel {} disconnected", &addr, &channel);
                break;
            }
            Ok(ProtoMsg::ConnectReq(_)) => log::warn!("{}: Ignoring repeated connect", &addr),
            Err(e) => log::warn!("{}: Undecodable message: {e}", &addr),
        }
    }

    drop(frame_tx);
    worker.await?;

    Ok(())
}

/// Blocking loop owning the processor of one stream.
fn run_processor(
    mut processor: GenderProcessor,
    mut frame_rx: mpsc::Receiver<Bytes>,
    gender_tx: BytesSender,
) {
    while let Some(jpeg) = frame_rx.blocking_recv() {
        let frame = match image::load_from_memory(&jpeg) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                log::warn!("Failed to decode frame: {e}");
                continue;
            }
        };

        let annotated = processor.process_frame(frame);

        if gender_tx.receiver_count() == 0 {
            continue;
        }
        match encode_jpeg(&annotated, JPEG_QUALITY) {
            Ok(buf) => {
                gender_tx.send(as_jpeg_stream_item(&buf)).ok();
            }
            Err(e) => log::warn!("Failed to encode frame: {e:#}"),
        }
    }
}
