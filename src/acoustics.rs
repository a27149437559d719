//! Decibel calculus and statistical indicators of level time series.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest level used in decibel calculus, corresponding to zero energy
pub const LOW_DB: f64 = -100.0;

/// Linear (energy) value of a level
pub fn from_db(x: f64) -> f64 {
    10f64.powf(0.1 * x)
}

/// Level of a linear (energy) value, never below [LOW_DB]
pub fn to_db(x: f64) -> f64 {
    10.0 * x.max(from_db(LOW_DB)).log10()
}

/// Energetic sum of two levels
pub fn plus_db(x: f64, y: f64) -> f64 {
    to_db(from_db(x) + from_db(y))
}

/// Energetic sum of a series of levels
pub fn sum_db(x: &[f64]) -> f64 {
    to_db(x.iter().map(|v| from_db(*v)).sum())
}

/// Energy equivalent average of a series of levels
pub fn average_db(x: &[f64]) -> Option<f64> {
    if x.is_empty() {
        return None;
    }
    Some(to_db(x.iter().map(|v| from_db(*v)).sum::<f64>() / x.len() as f64))
}

/// Parse a level from text, clamping `-inf` and very low values to [LOW_DB]
pub fn parse_db(s: &str) -> Result<f64, std::num::ParseFloatError> {
    let v = s.trim().parse::<f64>()?;
    if v.is_nan() {
        return Ok(LOW_DB);
    }
    Ok(v.max(LOW_DB))
}

/// The indicators shown next to a level plot, all in dB(A)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BasicIndicators {
    pub laeq: f64,
    pub lamin: f64,
    pub lamax: f64,
    pub la10: f64,
    pub la50: f64,
    pub la90: f64,
    /// Standard deviation of the levels
    pub sigma: f64,
}

impl fmt::Display for BasicIndicators {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "LAeq {:.1} | LAmin {:.1} | LAmax {:.1} | LA10 {:.1} | LA50 {:.1} | LA90 {:.1} | sigma {:.1}",
            self.laeq, self.lamin, self.lamax, self.la10, self.la50, self.la90, self.sigma
        )
    }
}

/// The complete set of indicators of a level time series, all levels in dB(A)
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Indicators {
    pub laeq: f64,
    /// Sound exposure level
    pub asel: f64,
    pub lamax: f64,
    pub lamin: f64,
    pub la05: f64,
    pub la10: f64,
    pub la50: f64,
    pub la90: f64,
    pub la95: f64,
    /// Events exceeding LA50 by 3 dB(A) for at least 3 seconds
    pub ncn: usize,
    /// Events found by [MadMax] with default settings
    pub mm60: usize,
    /// Traffic noise index
    pub tni: f64,
    /// Noise pollution level
    pub npl: f64,
}

impl fmt::Display for Indicators {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "LAeq {:.1} | ASEL {:.1} | LAmax {:.1} | LAmin {:.1} | LA05 {:.1} | LA10 {:.1} | LA50 {:.1} | LA90 {:.1} | LA95 {:.1} | Ncn {} | MM60 {} | TNI {:.1} | NPL {:.1}",
            self.laeq,
            self.asel,
            self.lamax,
            self.lamin,
            self.la05,
            self.la10,
            self.la50,
            self.la90,
            self.la95,
            self.ncn,
            self.mm60,
            self.tni,
            self.npl
        )
    }
}

/// Settings of the MadMax noise event detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MadMax {
    /// Minimum level of a maximum
    pub threshold: f64,
    /// Minimum drop in level after a maximum
    pub drop: f64,
    /// Maximum time to wait for the drop, in seconds
    pub droptime: f64,
    /// Minimum time between events, in seconds
    pub mindt: f64,
}

impl Default for MadMax {
    fn default() -> Self {
        Self {
            threshold: 60.0,
            drop: 5.0,
            droptime: 25.0,
            mindt: 3.0,
        }
    }
}

impl MadMax {
    /// The `(time, level)` noise events in `levels`, sampled `dt` seconds apart
    /// starting at time 0
    pub fn events(&self, levels: &[f64], dt: f64) -> Vec<(f64, f64)> {
        // pad with infinite levels so the first and last samples are never maxima
        let padded = std::iter::once(f64::INFINITY)
            .chain(levels.iter().cloned())
            .chain(std::iter::once(f64::INFINITY))
            .collect::<Vec<_>>();
        let time = |i: usize| dt * (i as f64 - 1.0);

        let mut candidates: Vec<usize> = vec![];
        let mut events: Vec<usize> = vec![];
        for i in 1..padded.len() - 1 {
            if padded[i - 1] < padded[i] && padded[i] > padded[i + 1] && padded[i] >= self.threshold {
                candidates.push(i);
            }
            let last_event = events.last().copied();
            candidates.retain(|&j| {
                time(i) - time(j) <= self.droptime
                    && last_event.map_or(true, |e| time(j) - time(e) >= self.mindt)
            });
            let (dropped, waiting): (Vec<usize>, Vec<usize>) = candidates
                .iter()
                .partition(|&&j| padded[j] - padded[i] >= self.drop);
            events.extend(dropped);
            candidates = waiting;
        }
        events.into_iter().map(|i| (time(i), padded[i])).collect()
    }
}

/// Statistics on a time series of levels. Every method returns `None` for an empty series.
pub trait LevelStatistics {
    /// Equivalent continuous level
    fn leq(&self) -> Option<f64>;

    fn minimum(&self) -> Option<f64>;

    fn maximum(&self) -> Option<f64>;

    /// Arithmetic mean of the levels
    fn average(&self) -> Option<f64>;

    /// Population standard deviation of the levels
    fn stdev(&self) -> Option<f64>;

    /// The level exceeded during `p` percent of the time, interpolated linearly
    /// between samples
    fn percentile(&self, p: f64) -> Option<f64>;

    /// Sound exposure level, for samples `dt` seconds apart
    fn sel(&self, dt: f64) -> Option<f64>;

    /// Number of events exceeding `reference` by at least `threshold` dB for at least
    /// `duration` seconds, for samples `dt` seconds apart
    fn ncn(&self, dt: f64, reference: f64, threshold: f64, duration: f64) -> usize;

    /// Noise events found with the MadMax algorithm, for samples `dt` seconds apart
    fn madmax(&self, dt: f64, settings: &MadMax) -> Vec<(f64, f64)>;

    fn basic_indicators(&self) -> Option<BasicIndicators> {
        Some(BasicIndicators {
            laeq: self.leq()?,
            lamin: self.minimum()?,
            lamax: self.maximum()?,
            la10: self.percentile(10.0)?,
            la50: self.percentile(50.0)?,
            la90: self.percentile(90.0)?,
            sigma: self.stdev()?,
        })
    }

    /// All indicators, for samples `dt` seconds apart
    fn indicators(&self, dt: f64) -> Option<Indicators> {
        let laeq = self.leq()?;
        let la10 = self.percentile(10.0)?;
        let la50 = self.percentile(50.0)?;
        let la90 = self.percentile(90.0)?;
        Some(Indicators {
            laeq,
            asel: self.sel(dt)?,
            lamax: self.maximum()?,
            lamin: self.minimum()?,
            la05: self.percentile(5.0)?,
            la10,
            la50,
            la90,
            la95: self.percentile(95.0)?,
            ncn: self.ncn(dt, la50, 3.0, 3.0),
            mm60: self.madmax(dt, &MadMax::default()).len(),
            tni: 4.0 * (la10 - la90) + la90 - 30.0,
            npl: laeq + 2.56 * self.stdev()?,
        })
    }
}

impl LevelStatistics for [f64] {
    fn leq(&self) -> Option<f64> {
        average_db(self)
    }

    fn minimum(&self) -> Option<f64> {
        self.iter().cloned().reduce(f64::min)
    }

    fn maximum(&self) -> Option<f64> {
        self.iter().cloned().reduce(f64::max)
    }

    fn average(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.iter().sum::<f64>() / self.len() as f64)
    }

    fn stdev(&self) -> Option<f64> {
        let mean = self.average()?;
        let var = self.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.len() as f64;
        Some(var.sqrt())
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let mut sorted = self.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        // position of the level in the ascending series, starting at 0
        let pos = (sorted.len() - 1) as f64 * (100.0 - p.clamp(0.0, 100.0)) * 0.01;
        let lower = pos.floor() as usize;
        let upper = pos.ceil() as usize;
        let frac = pos - lower as f64;
        Some(sorted[lower] * (1.0 - frac) + sorted[upper] * frac)
    }

    fn sel(&self, dt: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(to_db(from_db(sum_db(self)) * dt))
    }

    fn ncn(&self, dt: f64, reference: f64, threshold: f64, duration: f64) -> usize {
        let min_len = duration / dt;
        self.split(|v| *v < reference + threshold)
            .filter(|run| !run.is_empty() && run.len() as f64 >= min_len)
            .count()
    }

    fn madmax(&self, dt: f64, settings: &MadMax) -> Vec<(f64, f64)> {
        settings.events(self, dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn decibel_calculus() {
        assert!(close(to_db(4000.0), 36.020599913));
        assert!(close(to_db(-5000.0), LOW_DB));
        assert!(close(plus_db(0.0, 0.0), 3.010299957));
        assert!(close(sum_db(&[0.0, 0.0, 10.0, 0.0]), 11.139433523));
        assert!(close(average_db(&[0.0, 0.0, 10.0, 0.0]).unwrap(), 5.118833609));
        assert_eq!(average_db(&[]), None);
    }

    #[test]
    fn parse_levels() {
        assert_eq!(parse_db("20.0").unwrap(), 20.0);
        assert_eq!(parse_db("-150.0").unwrap(), LOW_DB);
        assert_eq!(parse_db("-inf").unwrap(), LOW_DB);
        assert!(parse_db("loud").is_err());
    }

    #[test]
    fn percentiles() {
        let levels = [3.0, 1.0, 5.0, 2.0, 4.0];
        assert!(close(levels.percentile(50.0).unwrap(), 3.0));
        assert!(close(levels.percentile(10.0).unwrap(), 4.6));
        assert!(close(levels.percentile(90.0).unwrap(), 1.4));
        assert!(close(levels.percentile(0.0).unwrap(), 5.0));
        assert!(close(levels.percentile(100.0).unwrap(), 1.0));
        assert!(close([42.0].percentile(10.0).unwrap(), 42.0));
    }

    #[test]
    fn indicators() {
        let levels = [50.0, 50.0, 50.0, 50.0];
        let ind = levels.basic_indicators().unwrap();
        assert!(close(ind.laeq, 50.0));
        assert!(close(ind.la10, 50.0));
        assert!(close(ind.sigma, 0.0));
        assert!(close(levels.sel(0.5).unwrap(), 50.0 + 10.0 * 2f64.log10()));

        let levels = [40.0, 60.0];
        let ind = levels.basic_indicators().unwrap();
        assert_eq!(ind.lamin, 40.0);
        assert_eq!(ind.lamax, 60.0);
        assert!(close(ind.sigma, 10.0));
        assert!(close(ind.laeq, 10.0 * ((1e4 + 1e6) / 2.0f64).log10()));

        let empty: [f64; 0] = [];
        assert_eq!(empty.basic_indicators(), None);
    }

    #[test]
    fn exceeding_events() {
        let levels = [50.0, 50.0, 60.0, 60.0, 60.0, 60.0, 50.0, 60.0, 60.0, 50.0];
        // runs of 4 and 2 samples at 60 dB
        assert_eq!(levels.ncn(1.0, 50.0, 3.0, 3.0), 1);
        assert_eq!(levels.ncn(1.0, 50.0, 3.0, 2.0), 2);
        assert_eq!(levels.ncn(0.5, 50.0, 3.0, 3.0), 0);
        assert_eq!(levels.ncn(1.0, 57.0, 3.0, 1.0), 2);
        assert_eq!(levels.ncn(1.0, 58.0, 3.0, 1.0), 0);
    }

    #[test]
    fn madmax_events() {
        let mm = MadMax::default();
        let levels = [50.0, 70.0, 50.0, 50.0, 72.0, 64.0, 50.0];
        assert_eq!(levels.madmax(1.0, &mm), vec![(1.0, 70.0), (4.0, 72.0)]);
        assert_eq!(levels.madmax(2.0, &mm), vec![(2.0, 70.0), (8.0, 72.0)]);

        // the second peak follows the first too closely
        let levels = [50.0, 70.0, 50.0, 72.0, 50.0];
        assert_eq!(levels.madmax(1.0, &mm), vec![(1.0, 70.0)]);

        // below threshold, or without enough drop
        assert!([50.0, 58.0, 50.0].madmax(1.0, &mm).is_empty());
        assert!([60.0, 70.0, 67.0, 66.0].madmax(1.0, &mm).is_empty());

        // the level takes too long to drop
        let slow = MadMax {
            droptime: 1.0,
            ..mm
        };
        assert!([50.0, 70.0, 68.0, 67.0, 60.0].madmax(1.0, &slow).is_empty());
        assert_eq!([50.0, 70.0, 68.0, 67.0, 60.0].madmax(1.0, &mm), vec![(1.0, 70.0)]);
    }

    #[test]
    fn all_indicators() {
        let levels = [40.0, 60.0];
        let ind = levels.indicators(1.0).unwrap();
        assert!(close(ind.asel, 10.0 * (1e4 + 1e6f64).log10()));
        assert!(close(ind.la05, 59.0));
        assert!(close(ind.la10, 58.0));
        assert!(close(ind.la50, 50.0));
        assert!(close(ind.la90, 42.0));
        assert!(close(ind.la95, 41.0));
        assert!(close(ind.tni, 4.0 * 16.0 + 42.0 - 30.0));
        assert!(close(ind.npl, ind.laeq + 25.6));
        assert_eq!(ind.ncn, 0);
        assert_eq!(ind.mm60, 0);

        let levels = [50.0, 70.0, 70.0, 70.0, 50.0, 50.0, 50.0];
        let ind = levels.indicators(1.0).unwrap();
        assert!(close(ind.la50, 50.0));
        assert_eq!(ind.ncn, 1);
        // a plateau is not a maximum
        assert_eq!(ind.mm60, 0);

        let empty: [f64; 0] = [];
        assert_eq!(empty.indicators(1.0), None);
    }
}
