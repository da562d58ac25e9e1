/// Bins examined on each side of the tuned bin.
pub const WINDOW_HALF_BINS: i64 = 1600;
/// Bins at either end of the spectrum that never take part.
pub const EDGE_GUARD_BINS: i64 = 20;
/// Half width of the smoothing kernel (21 samples total).
pub const SMOOTH_HALF_BINS: usize = 10;
pub const STEP_DB: f64 = 5.0;

/// Display bounds for the spectrum trace and the waterfall palette.
///
/// `min_db < max_db` always holds, and `wf_min_db < wf_max_db`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayRange {
    pub min_db: f64,
    pub max_db: f64,
    pub wf_min_db: f64,
    pub wf_max_db: f64,
}

impl DisplayRange {
    /// Returns `None` unless both bounds are finite and ordered.
    pub fn new(min_db: f64, max_db: f64) -> Option<Self> {
        if !(min_db.is_finite() && max_db.is_finite() && min_db < max_db) {
            return None;
        }
        Some(Self {
            min_db,
            max_db,
            wf_min_db: min_db,
            wf_max_db: max_db,
        })
    }

    /// Moves only the waterfall floor down by `bias_db`.
    pub fn with_waterfall_bias(mut self, bias_db: f64) -> Self {
        let bias = if bias_db.is_finite() { bias_db.max(0.0) } else { 0.0 };
        self.wf_min_db = self.min_db - bias;
        self.wf_max_db = self.max_db;
        self
    }
}

/// Smoothed floor and raw ceiling of a spectrum, before rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    pub floor_db: f64,
    pub ceiling_db: f64,
}

/// Looks for the noise floor and the strongest signal around the tuned bin.
///
/// Returns `None` when the tuned bin sits outside `[20, len - 20)` or the
/// data is degenerate; callers keep the range they already have.
pub fn measure_min_max(db: &[f64], tuned_bin: i64) -> Option<MinMax> {
    let len = i64::try_from(db.len()).ok()?;
    let upper = len - EDGE_GUARD_BINS;
    if len <= 0 || tuned_bin < EDGE_GUARD_BINS || tuned_bin >= upper {
        return None;
    }

    let lo = (tuned_bin - WINDOW_HALF_BINS).max(EDGE_GUARD_BINS) as usize;
    let hi = (tuned_bin + WINDOW_HALF_BINS).min(upper) as usize;

    let mut floor = f64::INFINITY;
    let mut ceiling = f64::NEG_INFINITY;
    for i in lo..hi {
        let kernel = &db[i - SMOOTH_HALF_BINS..=i + SMOOTH_HALF_BINS];
        let mean = data_stat_low(kernel);
        floor = floor.min(mean);
        ceiling = ceiling.max(db[i]);
    }

    let whole = db.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if whole > ceiling {
        ceiling = whole;
    }

    if !(floor.is_finite() && ceiling.is_finite()) {
        return None;
    }
    Some(MinMax {
        floor_db: floor,
        ceiling_db: ceiling,
    })
}

/// Statistic used for the floor estimate: the arithmetic mean.
pub fn data_stat_low(kernel: &[f64]) -> f64 {
    if kernel.is_empty() {
        return f64::NAN;
    }
    kernel.iter().sum::<f64>() / kernel.len() as f64
}

/// Rounds a measurement into display bounds: the ceiling goes up to the next
/// 5 dB step plus one step of headroom and never below `min_ceiling_db`.
pub fn derive_range(mm: MinMax, min_ceiling_db: f64, waterfall_bias_db: f64) -> Option<DisplayRange> {
    let mut max_db = (mm.ceiling_db / STEP_DB).ceil() * STEP_DB + STEP_DB;
    if min_ceiling_db.is_finite() {
        max_db = max_db.max(min_ceiling_db);
    }
    let mut min_db = (mm.floor_db / STEP_DB).floor() * STEP_DB;
    if min_db >= max_db {
        min_db = max_db - 2.0 * STEP_DB;
    }
    DisplayRange::new(min_db, max_db).map(|r| r.with_waterfall_bias(waterfall_bias_db))
}
