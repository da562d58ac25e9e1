use std::fmt;
use std::str::FromStr;

/// Text commands written to the server, colon delimited with a fixed field
/// order. Frequencies travel in kHz, filter edges in Hz.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Tune { khz: f64 },
    Mode(String),
    Zoom(ZoomRequest),
    Edges { low_hz: f64, high_hz: f64 },
    Average(u32),
    PollRate { ms: u32 },
    Audio { start: bool, id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ZoomRequest {
    Level(i32),
    In,
    Out,
    Center { khz: f64 },
}

impl Command {
    pub fn tune_hz(hz: f64) -> Self {
        Self::Tune { khz: hz / 1000.0 }
    }

    pub fn center_hz(hz: f64) -> Self {
        Self::Zoom(ZoomRequest::Center { khz: hz / 1000.0 })
    }
}

/// Up to three decimals, trailing zeros removed, never `-0`.
pub fn fmt_decimal(v: f64) -> String {
    let s = format!("{:.3}", v + 0.0);
    let s = if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s.as_str()
    };
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// The value a peer reads back from [`fmt_decimal`] text.
pub fn wire_decimal(v: f64) -> f64 {
    fmt_decimal(v).parse().unwrap_or(v)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Tune { khz } => write!(f, "F:{}", fmt_decimal(*khz)),
            Command::Mode(mode) => write!(f, "M:{mode}"),
            Command::Zoom(ZoomRequest::Level(level)) => write!(f, "Z:{level}"),
            Command::Zoom(ZoomRequest::In) => f.write_str("Z:+"),
            Command::Zoom(ZoomRequest::Out) => f.write_str("Z:-"),
            Command::Zoom(ZoomRequest::Center { khz }) => write!(f, "Z:c:{}", fmt_decimal(*khz)),
            Command::Edges { low_hz, high_hz } => {
                write!(f, "e:{}:{}", fmt_decimal(*low_hz), fmt_decimal(*high_hz))
            }
            Command::Average(n) => write!(f, "g:{n}"),
            Command::PollRate { ms } => write!(f, "r:{ms}"),
            Command::Audio { start, id } => {
                let verb = if *start { "START" } else { "STOP" };
                write!(f, "A:{verb}:{id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed command {0:?}")]
pub struct ParseCommandError(pub String);

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseCommandError(s.to_string());
        let num = |v: &str| v.parse::<f64>().ok().filter(|v| v.is_finite());
        let (verb, rest) = s.split_once(':').ok_or_else(bad)?;
        let cmd = match verb {
            "F" => Command::Tune {
                khz: num(rest).ok_or_else(bad)?,
            },
            "M" if !rest.is_empty() => Command::Mode(rest.to_string()),
            "Z" => match rest {
                "+" => Command::Zoom(ZoomRequest::In),
                "-" => Command::Zoom(ZoomRequest::Out),
                _ => match rest.strip_prefix("c:") {
                    Some(khz) => Command::Zoom(ZoomRequest::Center {
                        khz: num(khz).ok_or_else(bad)?,
                    }),
                    None => Command::Zoom(ZoomRequest::Level(rest.parse().map_err(|_| bad())?)),
                },
            },
            "e" => {
                let (low, high) = rest.split_once(':').ok_or_else(bad)?;
                Command::Edges {
                    low_hz: num(low).ok_or_else(bad)?,
                    high_hz: num(high).ok_or_else(bad)?,
                }
            }
            "g" => Command::Average(rest.parse().map_err(|_| bad())?),
            "r" => Command::PollRate {
                ms: rest.parse().map_err(|_| bad())?,
            },
            "A" => {
                let (verb, id) = rest.split_once(':').ok_or_else(bad)?;
                let start = match verb {
                    "START" => true,
                    "STOP" => false,
                    _ => return Err(bad()),
                };
                Command::Audio {
                    start,
                    id: id.to_string(),
                }
            }
            _ => return Err(bad()),
        };
        Ok(cmd)
    }
}
