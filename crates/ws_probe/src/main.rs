use anyhow::Context;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use novaview_core::telemetry::{power_to_db, SeqStatus, SequenceTracker};
use novaview_core::wire::command::Command;
use novaview_core::wire::frame::{self, Payload};
use std::io::IsTerminal;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Parser)]
#[command(
    name = "ws_probe",
    version,
    about = "Connect to a spectrum WebSocket, decode binary frames and print one line per frame."
)]
struct Args {
    /// WebSocket URL (example: ws://127.0.0.1:8081/)
    url: String,

    /// Number of messages to print before exiting
    #[arg(long, default_value_t = 10)]
    count: usize,

    /// Per-message read timeout (milliseconds)
    #[arg(long, default_value_t = 4000)]
    timeout_ms: u64,

    /// Command to send after connecting, e.g. `F:7074` or `e:-3000:-50`.
    /// May be repeated.
    #[arg(long = "send")]
    send: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .with_writer(std::io::stdout)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("init tracing: {e}"))?;

    let args = Args::parse();
    let commands = args
        .send
        .iter()
        .map(|s| s.parse::<Command>().with_context(|| format!("bad command {s:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (mut ws, _) = tokio_tungstenite::connect_async(args.url.as_str())
        .await
        .context("connect")?;

    for cmd in &commands {
        ws.send(Message::Text(cmd.to_string()))
            .await
            .with_context(|| format!("send {cmd}"))?;
        tracing::info!(cmd = %cmd, "sent");
    }

    let mut seq = SequenceTracker::default();
    for idx in 0..args.count {
        let msg = tokio::time::timeout(Duration::from_millis(args.timeout_ms), ws.next())
            .await
            .context("timeout")?
            .context("websocket ended")?
            .context("read message")?;

        match msg {
            Message::Binary(b) => describe(idx, &b, &mut seq),
            Message::Text(s) => {
                tracing::info!(idx, bytes = s.len(), "text");
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            Message::Close(frame) => {
                tracing::info!(idx, frame = ?frame, "close");
                break;
            }
        }
    }

    Ok(())
}

fn describe(idx: usize, buf: &[u8], seq: &mut SequenceTracker) {
    let frame = match frame::decode(buf) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(idx, bytes = buf.len(), error = %e, "undecodable");
            return;
        }
    };
    let h = &frame.header;
    let order = match seq.observe(h.source_id, h.sequence) {
        SeqStatus::First | SeqStatus::InOrder => String::new(),
        SeqStatus::Gap(n) => format!("gap={n}"),
        SeqStatus::Late => "late".to_string(),
    };

    match &frame.payload {
        Payload::Spectrum(p) => {
            let (lo, hi) = p
                .raw_bins
                .iter()
                .fold((u8::MAX, u8::MIN), |(lo, hi), &b| (lo.min(b), hi.max(b)));
            tracing::info!(
                idx,
                seq = h.sequence,
                source = h.source_id,
                bins = p.bin_count,
                center_hz = p.center_hz,
                tuned_hz = p.tuned_hz,
                bin_hz = p.bin_width_hz,
                zoom = p.zoom_level,
                offset = p.autorange_offset,
                gain = p.autorange_gain,
                raw_min = lo,
                raw_max = hi,
                order = %order,
                "spectrum"
            );
        }
        Payload::ChannelMeta(m) => {
            tracing::info!(
                idx,
                seq = h.sequence,
                description = ?m.description,
                low_hz = ?m.low_edge_hz,
                high_hz = ?m.high_edge_hz,
                power_db = ?m.baseband_power.and_then(power_to_db),
                unknown_tags = m.unknown_tags,
                order = %order,
                "channel"
            );
        }
        Payload::Audio(a) => {
            tracing::info!(
                idx,
                seq = h.sequence,
                samples = a.samples().len(),
                order = %order,
                "audio"
            );
        }
    }
}
