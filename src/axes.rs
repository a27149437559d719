use super::{MARGIN, X_MIN_WIDTH, Y_MIN};

/// How the time axis follows incoming levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XRange {
    /// Everything from the first level on
    Full,
    /// The last `width` seconds
    Sliding(f64),
}

impl Default for XRange {
    fn default() -> Self {
        XRange::Full
    }
}

impl XRange {
    pub fn sliding(width: f64) -> Self {
        XRange::Sliding(width.max(X_MIN_WIDTH))
    }

    /// Lower and upper time bound for a series of (ascending) times
    pub fn bounds(&self, times: &[f64]) -> Option<(f64, f64)> {
        let first = *times.first()?;
        let last = *times.last()?;
        Some(match self {
            XRange::Full => (first, (first + X_MIN_WIDTH).max(last)),
            XRange::Sliding(width) => (last - width.max(X_MIN_WIDTH), last),
        })
    }
}

/// How the level axis is scaled
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YRange {
    /// Fit the levels, with a small margin
    Auto,
    Manual { low: f64, height: f64 },
}

impl Default for YRange {
    fn default() -> Self {
        YRange::Auto
    }
}

impl YRange {
    pub fn manual(low: f64, height: f64) -> Self {
        YRange::Manual {
            low: low.max(Y_MIN.0),
            height: height.max(Y_MIN.1),
        }
    }

    /// Lower and upper level bound for a series of levels
    pub fn bounds(&self, levels: &[f64]) -> Option<(f64, f64)> {
        if levels.is_empty() {
            return None;
        }
        Some(match self {
            YRange::Auto => {
                let min = levels.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = levels.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                (min.round() - MARGIN, max.round() + MARGIN)
            }
            YRange::Manual { low, height } => (*low, low + height),
        })
    }
}
