use std::path::PathBuf;

use cam_sender::Error;
use clap::Parser;
use env_logger::TimestampPrecision;
use simple_error::simple_error;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the gender server HTTP endpoint
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// JPEG photo to analyse
    photo: PathBuf,

    /// Save the annotated photo here
    #[clap(long)]
    annotated: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let data = std::fs::read(&args.photo)?;
    let client = reqwest::Client::new();
    let url = format!("http://{}/photo", &args.address);

    log::info!("Sending {} to {}", args.photo.display(), &url);
    let resp = client.post(&url).body(data.clone()).send().await?;
    let status = resp.status();
    println!("{}", resp.text().await?);
    if !status.is_success() {
        return Err(simple_error!("server answered {}", status).into());
    }

    if let Some(path) = &args.annotated {
        let resp = client
            .post(format!("{url}?format=jpeg"))
            .body(data)
            .send()
            .await?
            .error_for_status()?;
        std::fs::write(path, resp.bytes().await?)?;
        log::info!("Annotated photo written to {}", path.display());
    }

    Ok(())
}
