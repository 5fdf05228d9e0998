//! Quantity-with-unit parsing, formatting, and normalization.
//!
//! Quotas are denominated in heterogeneous units: bytes, requests, and
//! seconds. A [`Unit`] pairs a kind with a multiplier into the kind's base
//! unit (bytes use binary multiples, so `MB` is 2^20). Text like `100MB` or
//! `10min` round-trips through [`parse`] and [`format`]; [`normalize`]
//! converts values between units of the same kind, picking a readable
//! magnitude when the target is the auto unit.

use thiserror::Error;

const KILO: f64 = 1024.0;
const MEGA: f64 = 1024.0 * 1024.0;
const GIGA: f64 = 1024.0 * 1024.0 * 1024.0;

const MINUTE: f64 = 60.0;
const HOUR: f64 = 3600.0;
const DAY: f64 = 86400.0;
const WEEK: f64 = 604800.0;

/// The dimension a unit measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Request,
    Byte,
    Second,
    /// Dimensionless: no recognized suffix.
    Unset,
}

/// A unit of measure: a kind plus a multiplier into the kind's base unit.
///
/// An infinite multiplier marks the auto unit, which asks [`normalize`] to
/// pick a magnitude for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub kind: UnitKind,
    pub multiplier: f64,
}

impl Unit {
    pub const fn new(kind: UnitKind, multiplier: f64) -> Self {
        Self { kind, multiplier }
    }

    /// The auto unit of `kind`: normalization picks the concrete multiplier.
    pub const fn auto(kind: UnitKind) -> Self {
        Self {
            kind,
            multiplier: f64::INFINITY,
        }
    }

    pub fn is_auto(&self) -> bool {
        !self.multiplier.is_finite()
    }

    /// Convert `value` in this unit to the kind's base unit.
    pub fn base(&self, value: f64) -> f64 {
        value * self.multiplier
    }
}

/// Failure to read a quantity from text.
///
/// Unknown suffixes are not an error (they yield [`UnitKind::Unset`]); only
/// a numeric prefix too large for a double is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitParseError {
    #[error("numeric value out of range in '{0}'")]
    Overflow(String),
}

/// Parse a quantity like `100MB`, `10min`, or `2.5GB` into a unit and value.
///
/// The numeric prefix is optional and defaults to 1 (as does an explicit 0).
/// The suffix is matched case-insensitively by prefix, so `10minutes` reads
/// the same as `10min`. Text with no recognized suffix parses as a
/// dimensionless [`UnitKind::Unset`] quantity.
pub fn parse(text: &str) -> Result<(Unit, f64), UnitParseError> {
    let text = text.trim_start();
    let (number, rest) = split_numeric_prefix(text);
    let value = match number {
        Some(v) if !v.is_finite() => return Err(UnitParseError::Overflow(text.to_string())),
        Some(v) if v == 0.0 => 1.0,
        Some(v) => v,
        None => 1.0,
    };
    let suffix: &str = rest.trim_start();
    Ok((match_suffix(suffix), value))
}

/// Longest leading substring that parses as a double, plus the remainder.
fn split_numeric_prefix(text: &str) -> (Option<f64>, &str) {
    for end in (1..=text.len()).rev() {
        if !text.is_char_boundary(end) {
            continue;
        }
        if let Ok(value) = text[..end].parse::<f64>() {
            return (Some(value), &text[end..]);
        }
    }
    (None, text)
}

/// Suffix table, matched by case-insensitive prefix in declaration order.
fn match_suffix(suffix: &str) -> Unit {
    const TABLE: &[(&str, UnitKind, f64)] = &[
        ("gb", UnitKind::Byte, GIGA),
        ("mb", UnitKind::Byte, MEGA),
        ("kb", UnitKind::Byte, KILO),
        ("byte", UnitKind::Byte, 1.0),
        ("b", UnitKind::Byte, 1.0),
        ("req", UnitKind::Request, 1.0),
        ("sec", UnitKind::Second, 1.0),
        ("min", UnitKind::Second, MINUTE),
        ("hr", UnitKind::Second, HOUR),
        ("hour", UnitKind::Second, HOUR),
        ("d", UnitKind::Second, DAY),
        ("w", UnitKind::Second, WEEK),
    ];

    let lowered = suffix.to_ascii_lowercase();
    for (prefix, kind, multiplier) in TABLE {
        if lowered.starts_with(prefix) {
            return Unit::new(*kind, *multiplier);
        }
    }
    Unit::new(UnitKind::Unset, 1.0)
}

/// Render `value` in `unit` as text that [`parse`] reads back.
///
/// The label is chosen from the unit's own multiplier tier, not from the
/// value. With `short`, a value of exactly one request renders as `req` and
/// base-tier seconds render as `sec`.
pub fn format(unit: &Unit, value: f64, short: bool) -> String {
    match unit.kind {
        UnitKind::Request => {
            let v = value * unit.multiplier;
            if short && v == 1.0 {
                "req".to_string()
            } else {
                format!("{v}req")
            }
        }
        UnitKind::Byte => {
            let label = if unit.multiplier >= GIGA {
                "GB"
            } else if unit.multiplier >= MEGA {
                "MB"
            } else if unit.multiplier >= KILO {
                "KB"
            } else {
                "B"
            };
            format!("{value}{label}")
        }
        UnitKind::Second => {
            let label = if unit.multiplier >= WEEK {
                "w"
            } else if unit.multiplier >= DAY {
                "d"
            } else if unit.multiplier >= HOUR {
                "hr"
            } else if unit.multiplier >= MINUTE {
                "min"
            } else if short {
                return "sec".to_string();
            } else {
                "sec"
            };
            format!("{value}{label}")
        }
        UnitKind::Unset => format!("{value}"),
    }
}

/// Convert `value` from `source` into `target`, returning the converted
/// value.
///
/// Both units must share a kind, and `source` must be concrete. A concrete
/// target leaves the units untouched. An auto target is mutated in place:
/// its multiplier is chosen from the same magnitude ladder [`format`] uses,
/// applied to the base-unit value (requests always pick the base unit, and
/// a dimensionless target adopts the source multiplier).
pub fn normalize(target: &mut Unit, source: &Unit, value: f64) -> f64 {
    debug_assert_eq!(target.kind, source.kind);
    debug_assert!(!source.is_auto());

    if !target.is_auto() {
        return value * source.multiplier / target.multiplier;
    }

    let base = value * source.multiplier;
    match target.kind {
        UnitKind::Request => {
            target.multiplier = 1.0;
            base
        }
        UnitKind::Byte => {
            target.multiplier = byte_tier(base);
            base / target.multiplier
        }
        UnitKind::Second => {
            target.multiplier = second_tier(base);
            base / target.multiplier
        }
        UnitKind::Unset => {
            target.multiplier = source.multiplier;
            value
        }
    }
}

fn byte_tier(base: f64) -> f64 {
    if base >= GIGA {
        GIGA
    } else if base >= MEGA {
        MEGA
    } else if base >= KILO {
        KILO
    } else {
        1.0
    }
}

fn second_tier(base: f64) -> f64 {
    if base >= WEEK {
        WEEK
    } else if base >= DAY {
        DAY
    } else if base >= HOUR {
        HOUR
    } else if base >= MINUTE {
        MINUTE
    } else {
        1.0
    }
}
