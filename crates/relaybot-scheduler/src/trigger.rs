//! Trigger parsing and next-fire computation (§4.2 "Trigger parsing").
//!
//! A trigger string is either a bare timezone-naive ISO-8601 datetime (fires
//! once) or `cron:<expr>` where `<expr>` is a 5- or 6-field cron expression
//! with `?` accepted as an alias for `*`. The `cron` crate only parses 6- or
//! 7-field expressions (seconds first), so a bare 5-field expression gets a
//! leading `0` seconds field spliced in.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use crate::error::{Result, SchedulerError};

pub enum Trigger {
    Once(DateTime<Utc>),
    Cron(CronSchedule),
}

pub fn parse(trigger: &str) -> Result<Trigger> {
    if let Some(expr) = trigger.strip_prefix("cron:") {
        let normalized = normalize_cron(expr);
        let schedule = CronSchedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidTrigger {
            trigger: trigger.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Trigger::Cron(schedule))
    } else {
        let naive = NaiveDateTime::parse_from_str(trigger, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(trigger, "%Y-%m-%dT%H:%M"))
            .map_err(|e| SchedulerError::InvalidTrigger {
                trigger: trigger.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Trigger::Once(Utc.from_utc_datetime(&naive)))
    }
}

/// `?` is a Quartz-style "no constraint here" marker; `cron` only knows `*`.
/// A 5-field expression (minute hour day-of-month month day-of-week) is
/// widened to 6 fields by prefixing a `0` seconds field.
fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim().replace('?', "*");
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr
    }
}

/// Next fire time strictly after `from`. For a `Once` trigger that's `None`
/// once `from` has passed it — the caller treats that as "already fired".
pub fn next_after(trigger: &Trigger, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Once(at) => {
            if *at > from {
                Some(*at)
            } else {
                None
            }
        }
        Trigger::Cron(schedule) => schedule.after(&from).next(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_bare_iso_datetime_as_once() {
        let t = parse("2026-04-01T09:00:00").unwrap();
        match t {
            Trigger::Once(at) => assert_eq!(at, Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()),
            _ => panic!("expected Once"),
        }
    }

    #[test]
    fn widens_five_field_cron_and_accepts_question_mark() {
        let t = parse("cron:0 9 * * ?").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = next_after(&t, from).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn once_trigger_in_the_past_has_no_next_fire() {
        let t = parse("2020-01-01T00:00:00").unwrap();
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(next_after(&t, from).is_none());
    }
}
