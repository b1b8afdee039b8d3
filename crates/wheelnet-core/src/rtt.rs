//! RFC 6298 smoothed round-trip-time estimator.
//!
//! Grounded on `original_source/lib/net/RttStat.{hpp,cpp}`: the textbook
//! SRTT/RTTVAR recurrence (`alpha = 1/8`, `beta = 1/4`), a 500ms RTO floor,
//! and a separate running minimum RTT used elsewhere for path quality
//! estimates rather than retransmission timing.

const ALPHA: f64 = 1.0 / 8.0;
const BETA: f64 = 1.0 / 4.0;
const MIN_RTO_MS: f64 = 500.0;
const MAX_RTO_MS: f64 = 60_000.0;

/// Smoothed RTT, RTT variance, minimum RTT, and derived retransmission
/// timeout, updated one sample at a time.
pub struct RttEstimator {
    srtt_ms: Option<f64>,
    rttvar_ms: f64,
    min_rtt_ms: Option<f64>,
    rto_ms: f64,
}

impl RttEstimator {
    pub fn new() -> Self {
        RttEstimator {
            srtt_ms: None,
            rttvar_ms: 0.0,
            min_rtt_ms: None,
            rto_ms: MIN_RTO_MS,
        }
    }

    /// Folds in one new RTT sample, in milliseconds.
    pub fn sample(&mut self, rtt_ms: f64) {
        self.min_rtt_ms = Some(self.min_rtt_ms.map_or(rtt_ms, |m| m.min(rtt_ms)));

        match self.srtt_ms {
            None => {
                self.srtt_ms = Some(rtt_ms);
                self.rttvar_ms = rtt_ms / 2.0;
            }
            Some(srtt) => {
                self.rttvar_ms = (1.0 - BETA) * self.rttvar_ms + BETA * (srtt - rtt_ms).abs();
                self.srtt_ms = Some((1.0 - ALPHA) * srtt + ALPHA * rtt_ms);
            }
        }

        let srtt = self.srtt_ms.unwrap();
        self.rto_ms = (srtt + 4.0 * self.rttvar_ms).clamp(MIN_RTO_MS, MAX_RTO_MS);
    }

    pub fn smoothed_rtt_ms(&self) -> Option<f64> {
        self.srtt_ms
    }

    pub fn min_rtt_ms(&self) -> Option<f64> {
        self.min_rtt_ms
    }

    pub fn rto_ms(&self) -> f64 {
        self.rto_ms
    }

    /// Exponential backoff on retransmission timeout, per RFC 6298 §5.5,
    /// capped at `MAX_RTO_MS` so a stalled path doesn't silence itself
    /// for minutes at a time.
    pub fn backoff(&mut self) {
        self.rto_ms = (self.rto_ms * 2.0).min(MAX_RTO_MS);
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_srtt_directly() {
        let mut r = RttEstimator::new();
        r.sample(100.0);
        assert_eq!(r.smoothed_rtt_ms(), Some(100.0));
        assert_eq!(r.min_rtt_ms(), Some(100.0));
    }

    #[test]
    fn rto_floor_is_500ms() {
        let mut r = RttEstimator::new();
        r.sample(10.0);
        assert!(r.rto_ms() >= MIN_RTO_MS);
    }

    #[test]
    fn smoothing_converges_toward_stable_sample() {
        let mut r = RttEstimator::new();
        r.sample(50.0);
        for _ in 0..50 {
            r.sample(80.0);
        }
        let srtt = r.smoothed_rtt_ms().unwrap();
        assert!((srtt - 80.0).abs() < 1.0, "srtt={srtt}");
    }

    #[test]
    fn min_rtt_tracks_lowest_sample_only() {
        let mut r = RttEstimator::new();
        r.sample(100.0);
        r.sample(40.0);
        r.sample(90.0);
        assert_eq!(r.min_rtt_ms(), Some(40.0));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut r = RttEstimator::new();
        r.sample(10.0);
        let first = r.rto_ms();
        r.backoff();
        assert_eq!(r.rto_ms(), (first * 2.0).min(MAX_RTO_MS));
        for _ in 0..20 {
            r.backoff();
        }
        assert_eq!(r.rto_ms(), MAX_RTO_MS);
    }
}
