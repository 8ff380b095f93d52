// Copyright (c) 2025-2026 Genesis contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{NaiveDateTime, Timelike};

/// Check a cron-subset schedule against a clock reading.
///
/// Five whitespace-separated fields: minute, hour, day, month, weekday.
/// Each field is `*`, a literal integer, or `*/N`.  Ranges and lists are
/// intentionally unsupported, and day/month/weekday are parsed for shape
/// but not matched.  Malformed schedules never match.
pub fn schedule_matches(schedule: &str, now: NaiveDateTime) -> bool {
    let parts: Vec<&str> = schedule.split_whitespace().collect();
    if parts.len() != 5 {
        return false;
    }
    let minute_ok = match field_matches(parts[0], now.minute()) {
        Some(ok) => ok,
        None => return false,
    };
    let hour_ok = match field_matches(parts[1], now.hour()) {
        Some(ok) => ok,
        None => return false,
    };
    minute_ok && hour_ok
}

/// `Some(matched)` for a well-formed field, `None` for garbage.
fn field_matches(field: &str, value: u32) -> Option<bool> {
    if field == "*" {
        return Some(true);
    }
    if let Some(step) = field.strip_prefix("*/") {
        let interval: u32 = step.parse().ok()?;
        if interval == 0 {
            return None;
        }
        return Some(value % interval == 0);
    }
    let literal: u32 = field.parse().ok()?;
    Some(literal == value)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
