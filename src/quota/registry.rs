//! Shared, name-keyed quota table.
//!
//! All charges for a name go through one [`std::sync::Mutex`], so the
//! read-evaluate-update cycle of a charge is atomic with respect to
//! concurrent requests. The lock is never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::units::{self, Unit};

use super::{Decision, QuotaError, QuotaSpec, QuotaState};

/// Thread-safe collection of quotas, keyed by name.
#[derive(Debug, Default)]
pub struct QuotaRegistry {
    quotas: Mutex<HashMap<String, QuotaState>>,
}

impl QuotaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QuotaState>> {
        self.quotas.lock().expect("quota table mutex poisoned")
    }

    /// Add a quota, rejecting duplicate names.
    pub fn register(&self, spec: QuotaSpec, now: f64) -> Result<(), QuotaError> {
        let mut quotas = self.lock();
        if quotas.contains_key(&spec.name) {
            return Err(QuotaError::Duplicate(spec.name));
        }
        let name = spec.name.clone();
        let state = QuotaState::new(Arc::new(spec), now);
        tracing::info!(quota = %name, "registered quota");
        quotas.insert(name, state);
        Ok(())
    }

    /// Charge `amount` against the named quota.
    ///
    /// Unknown names are not under quota and the charge is accepted.
    pub fn evaluate(&self, name: &str, amount: f64, now: f64) -> Decision {
        match self.lock().get_mut(name) {
            Some(state) => state.charge(amount, now),
            None => Decision::allow(),
        }
    }

    /// Reset every quota to an empty window starting at `now`.
    pub fn reinitialize_all(&self, now: f64) {
        for state in self.lock().values_mut() {
            state.reinitialize(now);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// One human-readable usage line per quota, sorted by name.
    ///
    /// Usage is shown in an auto-scaled unit of the budget's kind, e.g.
    /// `api: 1.5MB per 10min`.
    pub fn summaries(&self) -> Vec<String> {
        let quotas = self.lock();
        let mut lines: Vec<String> = quotas
            .values()
            .map(|state| {
                let spec = state.spec();
                let base = Unit::new(spec.denom_unit.kind, 1.0);
                let mut auto = Unit::auto(spec.denom_unit.kind);
                let shown = units::normalize(&mut auto, &base, state.accumulated());
                format!(
                    "{}: {} per {}",
                    spec.name,
                    units::format(&auto, shown, false),
                    units::format(&spec.divisor_unit, spec.divisor, false),
                )
            })
            .collect();
        lines.sort();
        lines
    }
}
