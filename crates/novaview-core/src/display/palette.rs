use bytemuck::{Pod, Zeroable};

pub const PALETTE_LEN: usize = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

// Gradient stops, evenly spaced from weakest to strongest.
const STOPS: [Rgba; 7] = [
    Rgba::rgb(0, 0, 0),
    Rgba::rgb(0, 0, 140),
    Rgba::rgb(0, 90, 255),
    Rgba::rgb(0, 230, 230),
    Rgba::rgb(240, 240, 0),
    Rgba::rgb(255, 40, 0),
    Rgba::rgb(255, 255, 255),
];

#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<Rgba>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::gradient(&STOPS, PALETTE_LEN)
    }
}

impl Palette {
    /// Linear interpolation through `stops`. Needs at least one stop and
    /// one entry; degenerate input yields a single black entry.
    pub fn gradient(stops: &[Rgba], len: usize) -> Self {
        if stops.is_empty() || len == 0 {
            return Self {
                colors: vec![Rgba::BLACK],
            };
        }
        if stops.len() == 1 || len == 1 {
            return Self {
                colors: vec![stops[0]; len],
            };
        }
        let segments = (stops.len() - 1) as f64;
        let colors = (0..len)
            .map(|i| {
                let t = i as f64 / (len - 1) as f64 * segments;
                let k = (t.floor() as usize).min(stops.len() - 2);
                let frac = t - k as f64;
                let (a, b) = (stops[k], stops[k + 1]);
                let mix = |x: u8, y: u8| {
                    (f64::from(x) + (f64::from(y) - f64::from(x)) * frac).round() as u8
                };
                Rgba::rgb(mix(a.r, b.r), mix(a.g, b.g), mix(a.b, b.b))
            })
            .collect();
        Self { colors }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[Rgba] {
        &self.colors
    }

    /// Nearest palette index for `db` normalized against `[min_db, max_db]`.
    /// NaN input or an empty range maps to the last entry.
    pub fn index(&self, db: f64, min_db: f64, max_db: f64) -> usize {
        let last = self.colors.len() - 1;
        let span = max_db - min_db;
        if !db.is_finite() || !(span > 0.0) || !span.is_finite() {
            return last;
        }
        let norm = ((db - min_db) / span).clamp(0.0, 1.0);
        ((norm * last as f64).round() as usize).min(last)
    }

    pub fn color(&self, db: f64, min_db: f64, max_db: f64) -> Rgba {
        self.colors[self.index(db, min_db, max_db)]
    }
}
