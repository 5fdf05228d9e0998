//! Per-name, time-windowed budget enforcement.
//!
//! A quota grants a budget (the denominator, e.g. `100MB`) per window (the
//! divisor, e.g. `10min`). Charges inside the current window accumulate
//! against the budget. Once the window has lapsed, the next charge is
//! evaluated against a prorated projection of the carried-over usage, so a
//! client that overspent one window is not instantly forgiven at the
//! boundary. A configurable poena factor controls how much of the old
//! window's usage carries over.

mod registry;

pub use registry::QuotaRegistry;

use std::sync::Arc;

use thiserror::Error;

use crate::units::{self, Unit, UnitKind, UnitParseError};

/// Default poena factor: carried-over usage is fully forgiven.
pub const DEFAULT_POENA_FACTOR: f64 = 0.0;

/// Wall-clock time in fractional seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Failure to configure a quota.
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("malformed quota '{0}': expected NAME:DENOM/DIVISOR[:POENA[:FLAGS]]")]
    Malformed(String),
    #[error(transparent)]
    Unit(#[from] UnitParseError),
    #[error("quota '{0}': window length must be a whole positive number of seconds")]
    BadWindow(String),
    #[error("quota '{0}': poena factor must be a finite number")]
    BadPoena(String),
    #[error("duplicate quota '{0}'")]
    Duplicate(String),
}

/// Immutable definition of one quota.
#[derive(Debug, Clone)]
pub struct QuotaSpec {
    pub name: String,
    /// Budget granted per window, in `denom_unit`.
    pub denom: f64,
    pub denom_unit: Unit,
    /// Window length, in `divisor_unit`.
    pub divisor: f64,
    pub divisor_unit: Unit,
    /// Fraction of a lapsed window's usage that carries over.
    pub poena_factor: f64,
    /// Whether rejections advertise a Retry-After hint.
    pub send_retry_after: bool,
}

impl QuotaSpec {
    /// Parse a quota definition like `api:100MB/10min:0.5:h`.
    ///
    /// The poena factor defaults to [`DEFAULT_POENA_FACTOR`] when omitted.
    /// The only recognized flag is `h` (send Retry-After hints); unknown
    /// flag characters are ignored.
    pub fn parse(text: &str) -> Result<Self, QuotaError> {
        let malformed = || QuotaError::Malformed(text.to_string());

        let (name, rest) = text.split_once(':').ok_or_else(malformed)?;
        if name.is_empty() {
            return Err(malformed());
        }
        let (denom_text, rest) = rest.split_once('/').ok_or_else(malformed)?;

        let mut parts = rest.splitn(3, ':');
        let divisor_text = parts.next().unwrap_or("");
        let poena_text = parts.next();
        let flags_text = parts.next().unwrap_or("");

        let (denom_unit, denom) = units::parse(denom_text)?;
        let (divisor_unit, divisor) = units::parse(divisor_text)?;

        let poena_factor = match poena_text {
            None | Some("") => DEFAULT_POENA_FACTOR,
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite())
                .ok_or_else(|| QuotaError::BadPoena(name.to_string()))?,
        };

        let spec = Self {
            name: name.to_string(),
            denom,
            denom_unit,
            divisor,
            divisor_unit,
            poena_factor,
            send_retry_after: flags_text.contains('h'),
        };

        let window = spec.window_secs();
        if !window.is_finite() || window < 1.0 || window.fract() != 0.0 {
            return Err(QuotaError::BadWindow(spec.name));
        }
        Ok(spec)
    }

    /// Budget per window in base units of the denominator's kind.
    pub fn limit(&self) -> f64 {
        self.denom * self.denom_unit.multiplier
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> f64 {
        self.divisor * self.divisor_unit.multiplier
    }
}

/// Outcome of charging a quota.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allow: bool,
    /// Suggested wait before retrying, in seconds. Zero when the charge was
    /// accepted or the quota suppresses hints.
    pub retry_after_secs: f64,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allow: true,
            retry_after_secs: 0.0,
        }
    }

    fn reject(spec: &QuotaSpec, retry_after_secs: f64) -> Self {
        Self {
            allow: false,
            retry_after_secs: if spec.send_retry_after {
                retry_after_secs
            } else {
                0.0
            },
        }
    }
}

/// Mutable usage tracked for one quota.
#[derive(Debug)]
pub struct QuotaState {
    spec: Arc<QuotaSpec>,
    /// Start of the current window, floored to a window-length boundary.
    window_start: u64,
    /// Usage charged so far, in base units of the denominator's kind.
    accumulated: f64,
}

impl QuotaState {
    pub fn new(spec: Arc<QuotaSpec>, now: f64) -> Self {
        let mut state = Self {
            spec,
            window_start: 0,
            accumulated: 0.0,
        };
        state.reinitialize(now);
        state
    }

    pub fn spec(&self) -> &Arc<QuotaSpec> {
        &self.spec
    }

    pub fn accumulated(&self) -> f64 {
        self.accumulated
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    /// Reset to an empty window starting at the boundary at or before `now`.
    pub fn reinitialize(&mut self, now: f64) {
        self.window_start = floor_to_window(now, self.spec.window_secs());
        self.accumulated = 0.0;
    }

    fn is_in_window(&self, now: f64) -> bool {
        let start = self.window_start as f64;
        start <= now && now < start + self.spec.window_secs()
    }

    /// Charge `amount` against the quota at time `now`.
    ///
    /// Request-denominated quotas always charge one unit regardless of the
    /// requested amount. A rejected in-window charge still accumulates, so
    /// repeated over-limit attempts push the suggested retry further out.
    pub fn charge(&mut self, amount: f64, now: f64) -> Decision {
        let amount = if self.spec.denom_unit.kind == UnitKind::Request {
            1.0
        } else {
            amount
        };
        let limit = self.spec.limit();
        let window = self.spec.window_secs();

        if self.is_in_window(now) {
            self.accumulated += amount;
            if self.accumulated <= limit {
                return Decision::allow();
            }
            let retry_after = (self.accumulated / limit) * window;
            tracing::debug!(
                quota = %self.spec.name,
                used = self.accumulated,
                limit,
                retry_after,
                "current window over budget"
            );
            return Decision::reject(&self.spec, retry_after);
        }

        // The window has lapsed: decay the old usage, then judge the charge
        // by the rate it implies over a full window.
        let decayed = self.spec.poena_factor * self.accumulated;
        let elapsed = now - self.window_start as f64;
        let prorated = prorate(decayed + amount, elapsed, window);

        if prorated <= limit {
            self.window_start = floor_to_window(now, window);
            self.accumulated = prorated;
            return Decision::allow();
        }

        self.accumulated = decayed + amount;
        let retry_after = (prorated / limit) * window * (elapsed / window);
        tracing::debug!(
            quota = %self.spec.name,
            prorated,
            limit,
            retry_after,
            "lapsed window still over budget"
        );
        Decision::reject(&self.spec, retry_after)
    }
}

/// Project `amount` spent over `elapsed` seconds onto a full window.
fn prorate(amount: f64, elapsed: f64, window: f64) -> f64 {
    (amount / elapsed) * window
}

/// Largest window-length multiple at or before `now`.
fn floor_to_window(now: f64, window: f64) -> u64 {
    let now = now as u64;
    let window = window as u64;
    now - now % window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(text: &str) -> Arc<QuotaSpec> {
        Arc::new(QuotaSpec::parse(text).unwrap())
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{a} != {b}");
    }

    #[test]
    fn test_parse_full_spec() {
        let q = QuotaSpec::parse("api:100MB/10min:0.5:h").unwrap();
        assert_eq!(q.name, "api");
        assert_close(q.denom, 100.0);
        assert_eq!(q.denom_unit.kind, UnitKind::Byte);
        assert_close(q.divisor, 10.0);
        assert_eq!(q.divisor_unit.kind, UnitKind::Second);
        assert_close(q.poena_factor, 0.5);
        assert!(q.send_retry_after);
        assert_close(q.limit(), 100.0 * 1024.0 * 1024.0);
        assert_close(q.window_secs(), 600.0);
    }

    #[test]
    fn test_parse_defaults() {
        let q = QuotaSpec::parse("q:100Bytes/10sec").unwrap();
        assert_close(q.poena_factor, DEFAULT_POENA_FACTOR);
        assert!(!q.send_retry_after);
    }

    #[test]
    fn test_parse_unknown_flags_ignored() {
        let q = QuotaSpec::parse("q:1KB/1min:0.5:xh").unwrap();
        assert!(q.send_retry_after);
        let q = QuotaSpec::parse("q:1KB/1min:0.5:z").unwrap();
        assert!(!q.send_retry_after);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            QuotaSpec::parse("nocolon"),
            Err(QuotaError::Malformed(_))
        ));
        assert!(matches!(
            QuotaSpec::parse("q:100Bytes"),
            Err(QuotaError::Malformed(_))
        ));
        assert!(matches!(
            QuotaSpec::parse(":100Bytes/10sec"),
            Err(QuotaError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_bad_poena() {
        assert!(matches!(
            QuotaSpec::parse("q:1KB/1min:fast"),
            Err(QuotaError::BadPoena(_))
        ));
    }

    #[test]
    fn test_parse_window_must_be_whole_seconds() {
        // An explicit zero takes the parser's default value of 1, so `0sec`
        // names a one-second window rather than an error.
        let q = QuotaSpec::parse("q:1KB/0sec").unwrap();
        assert_close(q.window_secs(), 1.0);
        assert!(matches!(
            QuotaSpec::parse("q:1KB/1.5sec"),
            Err(QuotaError::BadWindow(_))
        ));
        // A bare number is a dimensionless count of seconds.
        assert!(QuotaSpec::parse("q:1KB/500").is_ok());
    }

    #[test]
    fn test_in_window_accept_then_reject() {
        let mut state = QuotaState::new(spec("q1:100Bytes/10sec"), 0.0);

        let d = state.charge(60.0, 0.0);
        assert!(d.allow);
        assert_close(state.accumulated(), 60.0);

        // Second charge exceeds the budget and is rejected, but it still
        // accumulates.
        let d = state.charge(60.0, 2.0);
        assert!(!d.allow);
        assert_close(d.retry_after_secs, 0.0);
        assert_close(state.accumulated(), 120.0);
    }

    #[test]
    fn test_reject_hint_scales_with_overuse() {
        let mut state = QuotaState::new(spec("q1:100Bytes/10sec:0:h"), 0.0);
        assert!(state.charge(60.0, 0.0).allow);

        let d = state.charge(60.0, 2.0);
        assert!(!d.allow);
        assert_close(d.retry_after_secs, 12.0);

        // Piling on pushes the hint further out.
        let d = state.charge(60.0, 3.0);
        assert!(!d.allow);
        assert_close(d.retry_after_secs, 18.0);
    }

    #[test]
    fn test_request_quotas_charge_one_per_call() {
        let mut state = QuotaState::new(spec("q2:100Req/1sec"), 0.0);
        let d = state.charge(4096.0, 0.0);
        assert!(d.allow);
        assert_close(state.accumulated(), 1.0);
    }

    #[test]
    fn test_lapsed_window_prorates_and_rolls() {
        let mut state = QuotaState::new(spec("q2:100Req/1sec"), 0.0);
        assert!(state.charge(4096.0, 0.0).allow);

        // At t=1.5 the window [0, 1) has lapsed. With the default poena the
        // old usage is forgiven and the projected rate is (0 + 1) / 1.5.
        let d = state.charge(4096.0, 1.5);
        assert!(d.allow);
        assert_eq!(state.window_start(), 1);
        assert_close(state.accumulated(), 1.0 / 1.5);
    }

    #[test]
    fn test_poena_carries_usage_over() {
        let mut state = QuotaState::new(spec("q:100Bytes/10sec:0.5:h"), 0.0);
        assert!(state.charge(100.0, 0.0).allow);

        // At t=15 half the old usage carries over: (50 + 60) / 15 * 10.
        let d = state.charge(60.0, 15.0);
        assert!(d.allow);
        assert_eq!(state.window_start(), 10);
        assert_close(state.accumulated(), (50.0 + 60.0) / 15.0 * 10.0);
    }

    #[test]
    fn test_lapsed_window_reject_keeps_old_window() {
        let mut state = QuotaState::new(spec("q:10Bytes/10sec:1:h"), 0.0);
        assert!(state.charge(10.0, 0.0).allow);

        // At t=12 the projection (10 + 10) / 12 * 10 exceeds the budget.
        let d = state.charge(10.0, 12.0);
        assert!(!d.allow);
        assert_eq!(state.window_start(), 0);
        assert_close(state.accumulated(), 20.0);
        let prorated = 20.0 / 12.0 * 10.0;
        assert_close(d.retry_after_secs, (prorated / 10.0) * 10.0 * (12.0 / 10.0));
    }

    #[test]
    fn test_window_start_stays_aligned() {
        let mut state = QuotaState::new(spec("q:1KB/10sec"), 37.0);
        assert_eq!(state.window_start(), 30);
        assert!(state.charge(1.0, 38.0).allow);
        assert!(state.charge(1.0, 53.0).allow);
        assert_eq!(state.window_start() % 10, 0);
    }

    #[test]
    fn test_zero_amount_in_window_is_idempotent() {
        let mut state = QuotaState::new(spec("q:100Bytes/10sec"), 0.0);
        assert!(state.charge(60.0, 0.0).allow);

        let d = state.charge(0.0, 1.0);
        assert!(d.allow);
        assert_close(state.accumulated(), 60.0);

        // The zero charge does not change the outcome of the next real one.
        let d = state.charge(40.0, 2.0);
        assert!(d.allow);
        assert_close(state.accumulated(), 100.0);
    }

    #[test]
    fn test_reinitialize_clears_usage() {
        let mut state = QuotaState::new(spec("q:100Bytes/10sec"), 0.0);
        assert!(state.charge(60.0, 0.0).allow);
        state.reinitialize(25.0);
        assert_eq!(state.window_start(), 20);
        assert_close(state.accumulated(), 0.0);
    }

    #[test]
    fn test_is_in_window() {
        let state = QuotaState::new(spec("q:1KB/10sec"), 0.0);
        assert!(state.is_in_window(0.0));
        assert!(state.is_in_window(9.9));
        assert!(!state.is_in_window(10.0));
        assert!(!state.is_in_window(-1.0));
    }

    #[test]
    fn test_prorate() {
        assert_close(prorate(1.0, 1.5, 1.0), 1.0 / 1.5);
        assert_close(prorate(110.0, 15.0, 10.0), 110.0 / 15.0 * 10.0);
    }

    #[test]
    fn test_floor_to_window() {
        assert_eq!(floor_to_window(37.9, 10.0), 30);
        assert_eq!(floor_to_window(40.0, 10.0), 40);
        assert_eq!(floor_to_window(5.0, 10.0), 0);
    }
}
