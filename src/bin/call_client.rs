//! # Call Client
//!
//! Places a test call against the raw audio endpoint: streams a 16-bit mono WAV
//! file in real time, hangs up, and writes whatever the agent said back to a WAV.
//!
//! ```text
//! call-client --input hello.wav --output reply.wav
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

/// Stream a WAV file to a voice call agent and record the reply
#[derive(Parser, Debug)]
#[command(name = "call-client", version)]
struct Cli {
    /// Server base URL
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Client id used in the call path (random when omitted)
    #[arg(long, value_name = "ID")]
    client_id: Option<String>,

    /// 16-bit mono PCM WAV to send as caller audio
    #[arg(short, long, value_name = "PATH")]
    input: PathBuf,

    /// Where to save the agent's audio
    #[arg(short, long, value_name = "PATH", default_value = "reply.wav")]
    output: PathBuf,

    /// Duration of each audio frame sent
    #[arg(long, value_name = "MS", default_value = "30")]
    frame_ms: u32,

    /// How long to keep listening after the last frame
    #[arg(long, value_name = "SECONDS", default_value = "5")]
    linger: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let (sample_rate, samples) = read_wav(&cli.input)?;
    info!(
        "Loaded {} samples ({:.1}s at {} Hz)",
        samples.len(),
        samples.len() as f32 / sample_rate as f32,
        sample_rate
    );

    let client_id = cli
        .client_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let url = format!("{}/ws/audio/{}", cli.server.trim_end_matches('/'), client_id);

    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    info!("Connected to {}", url);
    let (mut write, mut read) = ws_stream.split();

    let receiver = tokio::spawn(async move {
        let mut reply = Vec::new();
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    debug!("Received {} bytes of agent audio", data.len());
                    reply.extend_from_slice(&data);
                }
                Ok(Message::Text(text)) => info!("Server event: {}", text),
                Ok(Message::Close(frame)) => {
                    info!("Server closed the call: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Connection error: {}", e);
                    break;
                }
            }
        }
        reply
    });

    let frame_samples = (sample_rate * cli.frame_ms / 1000) as usize;
    if frame_samples == 0 {
        return Err(anyhow!("Frame duration of {}ms is too short", cli.frame_ms));
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.frame_ms as u64));
    for frame in samples.chunks(frame_samples) {
        ticker.tick().await;
        let bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
        write.send(Message::Binary(bytes)).await?;
    }
    info!("Finished streaming caller audio, listening for {}s", cli.linger);

    tokio::time::sleep(Duration::from_secs(cli.linger)).await;
    write.send(Message::Text("end_session".to_string())).await?;

    let reply = match tokio::time::timeout(Duration::from_secs(cli.linger), receiver).await {
        Ok(joined) => joined?,
        Err(_) => return Err(anyhow!("Server did not close the call")),
    };

    write_wav(&cli.output, sample_rate, &reply)?;
    info!(
        "Saved {:.1}s of agent audio to {}",
        reply.len() as f32 / 2.0 / sample_rate as f32,
        cli.output.display()
    );
    Ok(())
}

fn read_wav(path: &PathBuf) -> Result<(u32, Vec<i16>)> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let (header, data) = wav::read(&mut file)?;

    if header.channel_count != 1 {
        return Err(anyhow!(
            "Expected mono audio, got {} channels",
            header.channel_count
        ));
    }

    match data {
        wav::BitDepth::Sixteen(samples) => Ok((header.sampling_rate, samples)),
        _ => Err(anyhow!("Expected 16-bit PCM, got {} bits", header.bits_per_sample)),
    }
}

fn write_wav(path: &PathBuf, sample_rate: u32, pcm: &[u8]) -> Result<()> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file)?;
    Ok(())
}
