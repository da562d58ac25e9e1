use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub spectrum: SpectrumSettings,
    #[serde(default)]
    pub waterfall: WaterfallSettings,
    #[serde(default)]
    pub control: ControlSettings,
    #[serde(default)]
    pub tuning: TuningSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpectrumSettings {
    /// Exponential averaging count; 0 disables averaging.
    #[serde(default)]
    pub averaging: u32,
    #[serde(default)]
    pub max_hold: bool,
    #[serde(default)]
    pub min_hold: bool,
    /// Max-hold decay per frame, in `(0, 1]`. 1 holds forever.
    #[serde(default = "default_decay")]
    pub max_hold_decay: f64,
    /// Autoscale never picks a ceiling below this.
    #[serde(default = "default_min_ceiling_db")]
    pub min_ceiling_db: f64,
    /// How far the waterfall floor sits below the spectrum floor.
    #[serde(default = "default_waterfall_bias_db")]
    pub waterfall_bias_db: f64,
    #[serde(default = "default_min_hold_settle_ms")]
    pub min_hold_settle_ms: u64,
    #[serde(default = "default_min_db")]
    pub initial_min_db: f64,
    #[serde(default = "default_max_db")]
    pub initial_max_db: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaterfallSettings {
    #[serde(default = "default_waterfall_height")]
    pub height: usize,
    /// Draw one row per N frames; 0 and 1 draw every frame.
    #[serde(default)]
    pub line_decimation: u8,
    #[serde(default = "default_drag_threshold_px")]
    pub drag_threshold_px: f64,
    #[serde(default = "default_click_max_ms")]
    pub click_max_ms: u64,
    #[serde(default = "default_click_max_px")]
    pub click_max_px: f64,
    #[serde(default = "default_recenter_throttle_ms")]
    pub recenter_throttle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlSettings {
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u32,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_ack_give_up_ms")]
    pub ack_give_up_ms: u64,
    #[serde(default = "default_ack_max_retries")]
    pub ack_max_retries: u8,
    #[serde(default = "default_average_repeat_ms")]
    pub average_repeat_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TuningSettings {
    #[serde(default = "default_step_hz")]
    pub step_hz: f64,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_url() -> String {
    "ws://127.0.0.1:8081/".to_string()
}
fn default_reconnect_ms() -> u64 {
    2000
}
fn default_decay() -> f64 {
    1.0
}
fn default_min_ceiling_db() -> f64 {
    -80.0
}
fn default_waterfall_bias_db() -> f64 {
    5.0
}
fn default_min_hold_settle_ms() -> u64 {
    2000
}
fn default_min_db() -> f64 {
    -120.0
}
fn default_max_db() -> f64 {
    -20.0
}
fn default_waterfall_height() -> usize {
    512
}
fn default_drag_threshold_px() -> f64 {
    4.0
}
fn default_click_max_ms() -> u64 {
    300
}
fn default_click_max_px() -> f64 {
    3.0
}
fn default_recenter_throttle_ms() -> u64 {
    150
}
fn default_poll_ms() -> u32 {
    100
}
fn default_ack_timeout_ms() -> u64 {
    800
}
fn default_ack_give_up_ms() -> u64 {
    2000
}
fn default_ack_max_retries() -> u8 {
    3
}
fn default_average_repeat_ms() -> u64 {
    333
}
fn default_step_hz() -> f64 {
    1000.0
}
fn default_mode() -> String {
    "usb".to_string()
}

impl Default for Server {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            averaging: 0,
            max_hold: false,
            min_hold: false,
            max_hold_decay: default_decay(),
            min_ceiling_db: default_min_ceiling_db(),
            waterfall_bias_db: default_waterfall_bias_db(),
            min_hold_settle_ms: default_min_hold_settle_ms(),
            initial_min_db: default_min_db(),
            initial_max_db: default_max_db(),
        }
    }
}

impl Default for WaterfallSettings {
    fn default() -> Self {
        Self {
            height: default_waterfall_height(),
            line_decimation: 0,
            drag_threshold_px: default_drag_threshold_px(),
            click_max_ms: default_click_max_ms(),
            click_max_px: default_click_max_px(),
            recenter_throttle_ms: default_recenter_throttle_ms(),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            ack_give_up_ms: default_ack_give_up_ms(),
            ack_max_retries: default_ack_max_retries(),
            average_repeat_ms: default_average_repeat_ms(),
        }
    }
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            step_hz: default_step_hz(),
            mode: default_mode(),
        }
    }
}

impl SpectrumSettings {
    pub fn min_hold_settle(&self) -> Duration {
        Duration::from_millis(self.min_hold_settle_ms)
    }
}

impl ControlSettings {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_give_up(&self) -> Duration {
        Duration::from_millis(self.ack_give_up_ms)
    }

    pub fn average_repeat(&self) -> Duration {
        Duration::from_millis(self.average_repeat_ms)
    }
}

impl WaterfallSettings {
    pub fn click_max(&self) -> Duration {
        Duration::from_millis(self.click_max_ms)
    }

    pub fn recenter_throttle(&self) -> Duration {
        Duration::from_millis(self.recenter_throttle_ms)
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.spectrum;
        anyhow::ensure!(s.averaging <= 1000, "spectrum.averaging must be <= 1000");
        anyhow::ensure!(
            s.max_hold_decay > 0.0 && s.max_hold_decay <= 1.0,
            "spectrum.max_hold_decay must be in (0, 1]"
        );
        anyhow::ensure!(
            s.waterfall_bias_db.is_finite() && s.waterfall_bias_db >= 0.0,
            "spectrum.waterfall_bias_db must be >= 0"
        );
        anyhow::ensure!(
            s.initial_min_db < s.initial_max_db,
            "spectrum.initial_min_db must be below spectrum.initial_max_db"
        );

        let w = &self.waterfall;
        anyhow::ensure!(w.height >= 1, "waterfall.height must be >= 1");
        anyhow::ensure!(
            w.line_decimation <= 3,
            "waterfall.line_decimation must be 0..=3"
        );
        anyhow::ensure!(
            w.drag_threshold_px >= 0.0,
            "waterfall.drag_threshold_px must be >= 0"
        );

        let c = &self.control;
        anyhow::ensure!(c.poll_ms >= 20, "control.poll_ms must be >= 20");
        anyhow::ensure!(c.ack_timeout_ms > 0, "control.ack_timeout_ms must be > 0");

        anyhow::ensure!(
            self.tuning.step_hz.is_finite() && self.tuning.step_hz > 0.0,
            "tuning.step_hz must be > 0"
        );
        anyhow::ensure!(
            !self.tuning.mode.trim().is_empty(),
            "tuning.mode must not be empty"
        );
        Ok(())
    }
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg = parse(&raw).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

pub fn parse(raw: &str) -> anyhow::Result<Config> {
    let cfg: Config = serde_json::from_str(raw)?;
    cfg.validate()?;
    Ok(cfg)
}
