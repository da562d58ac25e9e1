//! Scrolling waterfall and drag-to-pan reconciliation.
//!
//! Exactly one writer touches the live rows at any time. In `Normal` only
//! [`WaterfallBuffer::push_row`] writes; in `Dragging` only the shifted blit
//! of the drag-start snapshot writes and arriving rows are dropped from
//! rendering until the pointer is released.

use crate::config::WaterfallSettings;
use crate::display::palette::{Palette, Rgba};
use crate::dsp::autoscale::DisplayRange;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

type Rows = VecDeque<Vec<Rgba>>;

/// Frequency layout of the rows currently on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub center_hz: f64,
    pub bin_width_hz: f64,
}

impl Geometry {
    pub fn new(center_hz: f64, bin_width_hz: f64) -> Self {
        Self {
            center_hz,
            bin_width_hz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Drawn,
    Decimated,
    /// A drag is in progress; the frame still counted for holds upstream.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerOutcome {
    Ignored,
    Pressed,
    /// Preview moved; nothing to send yet.
    Previewed { bin_shift: i32 },
    /// Throttled mid-drag re-center request.
    Recenter { center_hz: f64 },
    /// Drag released and committed; send one final re-center.
    Committed { center_hz: f64, bin_shift: i32 },
    /// Short, still press: tune to the frequency under the pointer.
    Click { freq_hz: f64 },
}

#[derive(Debug, Clone, Copy)]
struct Press {
    x_px: f64,
    at: Instant,
}

/// Live only between drag start and release.
#[derive(Debug, Clone)]
pub struct DragSession {
    snapshot: Rows,
    pub start_center_hz: f64,
    pub current_bin_shift: i32,
    start_x_px: f64,
    hz_per_bin: f64,
    bins_per_px: f64,
    last_recenter: Option<Instant>,
}

#[derive(Debug, Clone)]
enum DragState {
    Normal { press: Option<Press> },
    Dragging(DragSession),
}

pub struct WaterfallBuffer {
    width: usize,
    height: usize,
    rows: Rows,
    palette: Palette,
    background: Rgba,
    range: DisplayRange,
    geometry: Option<Geometry>,
    surface_width_px: Option<f64>,
    line_decimation: u8,
    arrivals: u64,
    state: DragState,
    drag_threshold_px: f64,
    click_max: Duration,
    click_max_px: f64,
    recenter_throttle: Duration,
}

impl WaterfallBuffer {
    pub fn new(width: usize, settings: &WaterfallSettings, range: DisplayRange) -> Self {
        let height = settings.height.max(1);
        let background = Rgba::BLACK;
        Self {
            width,
            height,
            rows: blank_rows(width, height, background),
            palette: Palette::default(),
            background,
            range,
            geometry: None,
            surface_width_px: None,
            line_decimation: settings.line_decimation.min(3),
            arrivals: 0,
            state: DragState::Normal { press: None },
            drag_threshold_px: settings.drag_threshold_px,
            click_max: settings.click_max(),
            click_max_px: settings.click_max_px,
            recenter_throttle: settings.recenter_throttle(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging(_))
    }

    pub fn drag(&self) -> Option<&DragSession> {
        match &self.state {
            DragState::Dragging(d) => Some(d),
            DragState::Normal { .. } => None,
        }
    }

    /// Row 0 is the newest.
    pub fn row(&self, i: usize) -> Option<&[Rgba]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Rgba]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub fn background(&self) -> Rgba {
        self.background
    }

    pub fn set_background(&mut self, color: Rgba) {
        self.background = color;
    }

    pub fn set_palette(&mut self, palette: Palette) {
        if !palette.is_empty() {
            self.palette = palette;
        }
    }

    pub fn set_range(&mut self, range: DisplayRange) {
        self.range = range;
    }

    pub fn range(&self) -> DisplayRange {
        self.range
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = Some(geometry);
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    /// Pixel width of the surface pointer coordinates refer to. Until set,
    /// one pixel is one bin.
    pub fn set_surface_width(&mut self, px: f64) {
        if px.is_finite() && px > 0.0 {
            self.surface_width_px = Some(px);
        }
    }

    fn surface_width(&self) -> f64 {
        self.surface_width_px.unwrap_or(self.width as f64)
    }

    pub fn set_line_decimation(&mut self, n: u8) {
        self.line_decimation = n.min(3);
    }

    /// Rebuilds the buffer for a new bin count. Any drag in progress ends
    /// without a commit since its snapshot no longer lines up.
    pub fn resize(&mut self, width: usize) {
        if width == self.width {
            return;
        }
        if self.is_dragging() {
            tracing::debug!(old = self.width, new = width, "bin count changed mid-drag; dropping drag");
        }
        self.width = width;
        self.rows = blank_rows(width, self.height, self.background);
        self.state = DragState::Normal { press: None };
        self.arrivals = 0;
    }

    pub fn clear(&mut self) {
        self.rows = blank_rows(self.width, self.height, self.background);
    }

    /// Scrolls one row in. Only writes in `Normal`.
    pub fn push_row(&mut self, db: &[f64]) -> RowOutcome {
        if self.is_dragging() {
            return RowOutcome::Suppressed;
        }
        if db.len() != self.width {
            self.resize(db.len());
        }

        self.arrivals = self.arrivals.wrapping_add(1);
        let every = u64::from(self.line_decimation.max(1));
        if (self.arrivals - 1) % every != 0 {
            return RowOutcome::Decimated;
        }

        let mut row = match self.rows.pop_back() {
            Some(row) => row,
            None => vec![self.background; self.width],
        };
        row.clear();
        let (lo, hi) = (self.range.wf_min_db, self.range.wf_max_db);
        row.extend(db.iter().map(|&v| self.palette.color(v, lo, hi)));
        self.rows.push_front(row);
        RowOutcome::Drawn
    }

    fn hz_per_px(&self) -> Option<f64> {
        let g = self.geometry?;
        let v = g.bin_width_hz * self.width as f64 / self.surface_width();
        (v.is_finite() && v > 0.0).then_some(v)
    }

    /// Frequency under a pointer position.
    pub fn freq_at(&self, x_px: f64) -> Option<f64> {
        let g = self.geometry?;
        let hz_per_px = self.hz_per_px()?;
        Some(g.center_hz + (x_px - self.surface_width() / 2.0) * hz_per_px)
    }

    pub fn pointer_down(&mut self, x_px: f64, now: Instant) -> PointerOutcome {
        match self.state {
            DragState::Normal { .. } => {
                self.state = DragState::Normal {
                    press: Some(Press { x_px, at: now }),
                };
                PointerOutcome::Pressed
            }
            DragState::Dragging(_) => PointerOutcome::Ignored,
        }
    }

    pub fn pointer_move(&mut self, x_px: f64, now: Instant) -> PointerOutcome {
        if let DragState::Normal { press: Some(press) } = self.state {
            if (x_px - press.x_px).abs() <= self.drag_threshold_px {
                return PointerOutcome::Ignored;
            }
            let Some(session) = self.start_drag(press) else {
                return PointerOutcome::Ignored;
            };
            self.state = DragState::Dragging(session);
            tracing::debug!(x_px, "waterfall drag started");
        }

        let throttle = self.recenter_throttle;
        let DragState::Dragging(drag) = &mut self.state else {
            return PointerOutcome::Ignored;
        };
        let shift = bin_shift(x_px - drag.start_x_px, drag.bins_per_px);
        if shift != drag.current_bin_shift {
            drag.current_bin_shift = shift;
            blit_shifted(&drag.snapshot, &mut self.rows, shift, self.background);
        }

        let due = match drag.last_recenter {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= throttle,
        };
        if due {
            drag.last_recenter = Some(now);
            return PointerOutcome::Recenter {
                center_hz: drag.start_center_hz - f64::from(shift) * drag.hz_per_bin,
            };
        }
        PointerOutcome::Previewed { bin_shift: shift }
    }

    pub fn pointer_up(&mut self, x_px: f64, now: Instant) -> PointerOutcome {
        let state = std::mem::replace(&mut self.state, DragState::Normal { press: None });
        match state {
            DragState::Dragging(drag) => {
                let shift = bin_shift(x_px - drag.start_x_px, drag.bins_per_px);
                blit_shifted(&drag.snapshot, &mut self.rows, shift, self.background);
                let center_hz = drag.start_center_hz - f64::from(shift) * drag.hz_per_bin;
                tracing::debug!(shift, center_hz, "waterfall drag committed");
                PointerOutcome::Committed {
                    center_hz,
                    bin_shift: shift,
                }
            }
            DragState::Normal { press: Some(press) } => {
                let short = now.saturating_duration_since(press.at) < self.click_max;
                let still = (x_px - press.x_px).abs() < self.click_max_px;
                match self.freq_at(x_px) {
                    Some(freq_hz) if short && still => PointerOutcome::Click { freq_hz },
                    _ => PointerOutcome::Ignored,
                }
            }
            DragState::Normal { press: None } => PointerOutcome::Ignored,
        }
    }

    fn start_drag(&self, press: Press) -> Option<DragSession> {
        let g = self.geometry?;
        if !(g.bin_width_hz > 0.0) || self.width == 0 {
            return None;
        }
        Some(DragSession {
            snapshot: self.rows.clone(),
            start_center_hz: g.center_hz,
            current_bin_shift: 0,
            start_x_px: press.x_px,
            hz_per_bin: g.bin_width_hz,
            bins_per_px: self.width as f64 / self.surface_width(),
            last_recenter: None,
        })
    }

    /// Packed RGBA bytes, row 0 first.
    pub fn to_rgba_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.height * 4);
        for row in &self.rows {
            out.extend_from_slice(bytemuck::cast_slice(row));
        }
        out
    }
}

fn blank_rows(width: usize, height: usize, bg: Rgba) -> Rows {
    (0..height).map(|_| vec![bg; width]).collect()
}

/// Pixel displacement to a whole number of bins, rounding half away from
/// zero so the preview leads the pointer.
pub fn bin_shift(dx_px: f64, bins_per_px: f64) -> i32 {
    let bins = dx_px * bins_per_px;
    if !bins.is_finite() {
        return 0;
    }
    bins.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32
}

/// `dst[x] = src[x - shift]`, exposing background at the vacated edge.
fn blit_shifted(src: &Rows, dst: &mut Rows, shift: i32, bg: Rgba) {
    for (s, d) in src.iter().zip(dst.iter_mut()) {
        shift_row(s, d, shift, bg);
    }
}

fn shift_row(src: &[Rgba], dst: &mut Vec<Rgba>, shift: i32, bg: Rgba) {
    let width = src.len();
    dst.clear();
    dst.resize(width, bg);
    let n = shift.unsigned_abs() as usize;
    if n >= width {
        return;
    }
    if shift >= 0 {
        dst[n..].copy_from_slice(&src[..width - n]);
    } else {
        dst[..width - n].copy_from_slice(&src[n..]);
    }
}
