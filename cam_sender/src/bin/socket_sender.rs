use std::{path::PathBuf, time::Duration};

use bytes::Bytes;
use cam_sender::{
    sensors::{get_camera_capture_fn, get_replay_capture_fn},
    Error,
};
use clap::Parser;
use common::protocol::{FrameMsg, ProtoMsg};
use env_logger::TimestampPrecision;
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the gender server data socket
    #[clap(long, default_value = "127.0.0.1:3001")]
    address: String,

    /// Channel name that this sender publishes to
    #[clap(long, default_value = "unknown")]
    channel: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Replay the JPEG files of this directory instead of using a camera
    #[clap(long)]
    replay_dir: Option<PathBuf>,

    /// Upper bound for the frames sent per second
    #[clap(long, default_value_t = 30)]
    max_fps: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Launching socket sender for channel {}", &args.channel);

    let mut capture_fn = match &args.replay_dir {
        Some(dir) => get_replay_capture_fn(dir)?,
        None => get_camera_capture_fn(&args.device)?,
    };

    let stream = TcpStream::connect(&args.address).await?;
    log::info!("Connected to {} as {}", &args.address, &args.channel);

    // Wrap stream in transport handler with length-delimited codec
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    // Send init message
    let init_msg = ProtoMsg::ConnectReq(args.channel.clone()).serialize()?;
    transport.send(Bytes::from(init_msg)).await?;

    let mut pace = tokio::time::interval(Duration::from_secs(1) / args.max_fps.max(1));
    let mut seq = 0;

    // Send captured frames in a loop
    loop {
        pace.tick().await;
        match capture_fn() {
            Some(frame) => {
                let data = ProtoMsg::FrameMsg(FrameMsg::new(seq, frame)).serialize()?;
                transport.send(Bytes::from(data)).await?;
                seq += 1;
            }
            None => log::error!("Unable to capture frame, trying again..."),
        }
    }
}
