//! Recurrence arithmetic
//!
//! Fixed units (`minutes`, `hour`, `daily`, `weekly`) add `every × unit`.
//! Calendar units add months and clamp the day to the end of a shorter
//! target month, so Jan 31 + 1 month is Feb 28 (Feb 29 in leap years).
//! Time of day is preserved.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Fast-forward over missed occurrences
//! - 1.0.0: Initial calculator

use super::model::{Recurrence, Reminder};
use chrono::{DateTime, Duration, Months, Utc};

/// Months per quarterly step
const QUARTER_MONTHS: u32 = 4;

/// Add calendar months, clamping the day to the target month's last day
pub fn add_calendar_months(anchor: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    anchor
        .checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time from `anchor` to the next fire
///
/// `every` of zero is treated as one. `Once` never recurs and yields zero.
pub fn duration(every: u32, unit: Recurrence, anchor: DateTime<Utc>) -> Duration {
    let every = every.max(1);
    match unit {
        Recurrence::Once => Duration::zero(),
        Recurrence::Minutes => Duration::minutes(i64::from(every)),
        Recurrence::Hour => Duration::hours(i64::from(every)),
        Recurrence::Daily => Duration::days(i64::from(every)),
        Recurrence::Weekly => Duration::weeks(i64::from(every)),
        Recurrence::Monthly => add_calendar_months(anchor, every) - anchor,
        Recurrence::Quarterly => {
            add_calendar_months(anchor, every.saturating_mul(QUARTER_MONTHS)) - anchor
        }
    }
}

/// Trigger time of the occurrence after the currently scheduled one
pub fn next_after(reminder: &Reminder) -> DateTime<Utc> {
    let anchor = reminder.next_trigger_time;
    anchor + duration(reminder.every, reminder.recurrence, anchor)
}

/// First trigger strictly after `now`, plus the number of occurrences skipped
///
/// Returns the reminder's own trigger unchanged when it is already in the
/// future or when the reminder does not recur.
pub fn fast_forward(reminder: &Reminder, now: DateTime<Utc>) -> (DateTime<Utc>, u32) {
    let mut next = reminder.next_trigger_time;
    if next > now || !reminder.recurrence.is_recurring() {
        return (next, 0);
    }

    let mut skipped: u32 = 0;
    match reminder.recurrence {
        Recurrence::Monthly | Recurrence::Quarterly => {
            // Step one at a time: month lengths vary
            while next <= now {
                next = next + duration(reminder.every, reminder.recurrence, next);
                skipped = skipped.saturating_add(1);
            }
        }
        _ => {
            let step = duration(reminder.every, reminder.recurrence, next);
            let behind = now - next;
            let steps = behind.num_seconds() / step.num_seconds() + 1;
            next = i32::try_from(steps)
                .ok()
                .and_then(|n| step.checked_mul(n))
                .and_then(|jump| next.checked_add_signed(jump))
                // Too far behind to count in steps: restart one step past now
                .unwrap_or(now + step);
            skipped = u32::try_from(steps).unwrap_or(u32::MAX);
        }
    }
    (next, skipped)
}
