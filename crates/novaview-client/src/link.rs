//! One live WebSocket at a time, rebuilt after every disconnect.
//!
//! The session is synchronous: each event is handed to it with an
//! [`Outbox`] as its command sink, and whatever it emitted is written to the
//! socket before the next event is taken.

use crate::shutdown::Shutdown;
use anyhow::Context;
use futures::{Sink, SinkExt, StreamExt};
use novaview_core::config::Config;
use novaview_core::control::CommandSink;
use novaview_core::session::{Session, SessionEvent};
use novaview_core::wire::command::Command;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;

const TICK: Duration = Duration::from_millis(50);
const SUMMARY_EVERY: Duration = Duration::from_secs(10);

/// Command sink backed by the socket's writer half.
#[derive(Debug, Default)]
pub struct Outbox {
    open: bool,
    pending: Vec<Command>,
}

impl CommandSink for Outbox {
    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, cmd: &Command) -> anyhow::Result<()> {
        anyhow::ensure!(self.open, "message channel closed");
        self.pending.push(cmd.clone());
        Ok(())
    }
}

impl Outbox {
    /// Writes buffered commands in order. On the first failure the channel is
    /// marked closed and the failed command plus everything after it goes
    /// back to the session's queue.
    pub async fn flush<S>(&mut self, ws: &mut S, session: &mut Session) -> anyhow::Result<()>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let mut cmds = std::mem::take(&mut self.pending).into_iter();
        while let Some(cmd) = cmds.next() {
            let text = cmd.to_string();
            if let Err(e) = ws.send(Message::Text(text)).await {
                self.open = false;
                session.requeue(cmd);
                cmds.for_each(|rest| session.requeue(rest));
                return Err(e).context("send command");
            }
        }
        Ok(())
    }
}

enum Ended {
    Closed,
    Shutdown,
}

pub async fn run(cfg: Config, tune_hz: Option<f64>, mut shutdown: Shutdown) -> anyhow::Result<()> {
    let url = cfg.server.url.clone();
    let reconnect = Duration::from_millis(cfg.server.reconnect_ms);
    let mut session = Session::new(cfg, Instant::now());
    let mut outbox = Outbox::default();

    // Every open restates the mode and the last tuned frequency.
    if let Some(hz) = tune_hz {
        let hz = session.tune(&mut outbox, hz);
        tracing::info!(hz, "initial tune queued");
    }

    loop {
        match connect_once(&url, &mut session, &mut outbox, &mut shutdown).await {
            Ok(Ended::Shutdown) => return Ok(()),
            Ok(Ended::Closed) => tracing::info!(url = %url, "connection closed"),
            Err(e) => tracing::warn!(url = %url, error = ?e, "connection failed"),
        }
        outbox.open = false;
        session.on_channel_closed();
        log_summary(&session);

        if shutdown.is_requested() {
            return Ok(());
        }
        tracing::info!(delay_ms = reconnect.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(reconnect) => {}
            _ = shutdown.requested() => return Ok(()),
        }
        session.reset(Instant::now());
    }
}

async fn connect_once(
    url: &str,
    session: &mut Session,
    outbox: &mut Outbox,
    shutdown: &mut Shutdown,
) -> anyhow::Result<Ended> {
    let (ws, _) = tokio::select! {
        res = tokio_tungstenite::connect_async(url) => res.with_context(|| format!("connect {url}"))?,
        _ = shutdown.requested() => return Ok(Ended::Shutdown),
    };
    tracing::info!(url, "connected");
    let (mut tx, mut rx) = ws.split();

    outbox.open = true;
    session.on_channel_open(outbox, Instant::now());
    outbox.flush(&mut tx, session).await?;

    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut summary =
        tokio::time::interval_at(tokio::time::Instant::now() + SUMMARY_EVERY, SUMMARY_EVERY);

    loop {
        tokio::select! {
            msg = rx.next() => {
                let Some(msg) = msg else {
                    return Ok(Ended::Closed);
                };
                match msg.context("read message")? {
                    Message::Binary(buf) => {
                        if let SessionEvent::Spectrum { range: Some(range), .. } =
                            session.on_binary(outbox, &buf, Instant::now())
                        {
                            tracing::debug!(min_db = range.min_db, max_db = range.max_db, "autoscaled");
                        }
                    }
                    Message::Text(txt) => {
                        tracing::debug!(bytes = txt.len(), "ignoring text message");
                    }
                    Message::Close(frame) => {
                        tracing::info!(frame = ?frame, "close frame");
                        return Ok(Ended::Closed);
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                }
            }
            _ = tick.tick() => {
                session.on_tick(outbox, Instant::now());
            }
            _ = summary.tick() => log_summary(session),
            _ = shutdown.requested() => {
                let _ = tx.send(Message::Close(None)).await;
                return Ok(Ended::Shutdown);
            }
        }
        outbox.flush(&mut tx, session).await?;
    }
}

fn log_summary(session: &Session) {
    let t = session.telemetry();
    let d = session.control().diagnostics();
    let range = session.spectrum().range();
    tracing::info!(
        decoded = t.frames.decoded,
        dropped = t.frames.dropped,
        lost = t.frames.lost,
        late = t.frames.late,
        audio_samples = t.frames.audio_samples,
        center_hz = ?t.center_hz,
        baseband_db = ?t.baseband_power_db,
        min_db = range.min_db,
        max_db = range.max_db,
        sent = d.sent,
        resent = d.resent,
        abandoned = d.abandoned,
        queued = session.control().queued().count(),
        "summary"
    );
}
