use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::PlantRecord;

const MINUTES_IN_HOUR: i64 = 60;
const MINUTES_IN_DAY: i64 = 1_440;
const MINUTES_IN_MONTH: i64 = 43_200;
const MINUTES_IN_TWO_MONTHS: i64 = 86_400;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Locale {
    English,
    #[default]
    Portuguese,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported locale `{0}`")]
pub struct UnknownLocale(pub String);

impl FromStr for Locale {
    type Err = UnknownLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lang = s
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match lang.as_str() {
            "en" | "english" => Ok(Locale::English),
            "pt" | "portuguese" => Ok(Locale::Portuguese),
            _ => Err(UnknownLocale(s.to_string())),
        }
    }
}

impl TryFrom<String> for Locale {
    type Error = UnknownLocale;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Title and body of a device reminder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    LessThanMinute,
    Minutes(i64),
    AboutHours(i64),
    Days(i64),
    AboutMonths(i64),
    Months(i64),
    AboutYears(i64),
    OverYears(i64),
    AlmostYears(i64),
}

fn classify(instant: DateTime<Utc>, now: DateTime<Utc>) -> Unit {
    let seconds = (instant - now).num_seconds().abs();
    let minutes = (seconds as f64 / 60.0).round() as i64;

    if minutes < 2 {
        return if minutes == 0 {
            Unit::LessThanMinute
        } else {
            Unit::Minutes(1)
        };
    }
    if minutes < 45 {
        return Unit::Minutes(minutes);
    }
    if minutes < 90 {
        return Unit::AboutHours(1);
    }
    if minutes < MINUTES_IN_DAY {
        return Unit::AboutHours(round_div(minutes, MINUTES_IN_HOUR));
    }
    if minutes < 2_520 {
        return Unit::Days(1);
    }
    if minutes < MINUTES_IN_MONTH {
        return Unit::Days(round_div(minutes, MINUTES_IN_DAY));
    }
    if minutes < MINUTES_IN_TWO_MONTHS {
        return Unit::AboutMonths(round_div(minutes, MINUTES_IN_MONTH));
    }

    let months = minutes / MINUTES_IN_MONTH;
    if months < 12 {
        return Unit::Months(round_div(minutes, MINUTES_IN_MONTH));
    }
    let years = months / 12;
    match months % 12 {
        0..=2 => Unit::AboutYears(years),
        3..=8 => Unit::OverYears(years),
        _ => Unit::AlmostYears(years + 1),
    }
}

fn round_div(value: i64, unit: i64) -> i64 {
    (value as f64 / unit as f64).round() as i64
}

fn plural(n: i64, one: &str, many: &str) -> String {
    if n == 1 {
        one.to_string()
    } else {
        many.replace("{n}", &n.to_string())
    }
}

/// Absolute distance between two instants in words, e.g. "about 3 hours".
/// Direction is ignored; callers add "in"/"ago" themselves.
pub fn humanize_distance(instant: DateTime<Utc>, now: DateTime<Utc>, locale: Locale) -> String {
    let unit = classify(instant, now);
    match locale {
        Locale::English => match unit {
            Unit::LessThanMinute => "less than a minute".to_string(),
            Unit::Minutes(n) => plural(n, "1 minute", "{n} minutes"),
            Unit::AboutHours(n) => plural(n, "about 1 hour", "about {n} hours"),
            Unit::Days(n) => plural(n, "1 day", "{n} days"),
            Unit::AboutMonths(n) => plural(n, "about 1 month", "about {n} months"),
            Unit::Months(n) => plural(n, "1 month", "{n} months"),
            Unit::AboutYears(n) => plural(n, "about 1 year", "about {n} years"),
            Unit::OverYears(n) => plural(n, "over 1 year", "over {n} years"),
            Unit::AlmostYears(n) => plural(n, "almost 1 year", "almost {n} years"),
        },
        Locale::Portuguese => match unit {
            Unit::LessThanMinute => "menos de um minuto".to_string(),
            Unit::Minutes(n) => plural(n, "1 minuto", "{n} minutos"),
            Unit::AboutHours(n) => plural(n, "cerca de 1 hora", "cerca de {n} horas"),
            Unit::Days(n) => plural(n, "1 dia", "{n} dias"),
            Unit::AboutMonths(n) => plural(n, "cerca de 1 mês", "cerca de {n} meses"),
            Unit::Months(n) => plural(n, "1 mês", "{n} meses"),
            Unit::AboutYears(n) => plural(n, "cerca de 1 ano", "cerca de {n} anos"),
            Unit::OverYears(n) => plural(n, "mais de 1 ano", "mais de {n} anos"),
            Unit::AlmostYears(n) => plural(n, "quase 1 ano", "quase {n} anos"),
        },
    }
}

/// Text for the device reminder that fires at `record.date_time_notification`.
pub fn reminder_payload(record: &PlantRecord, locale: Locale) -> NotificationPayload {
    match locale {
        Locale::English => NotificationPayload {
            title: "Heeey, 🌱".to_string(),
            body: format!("It's time to take care of your {}", record.name),
        },
        Locale::Portuguese => NotificationPayload {
            title: "Heeey, 🌱".to_string(),
            body: format!("Está na hora de cuidar da sua {}", record.name),
        },
    }
}

/// Banner shown above the plant list for the next plant due.
pub fn banner_message(record: &PlantRecord, now: DateTime<Utc>, locale: Locale) -> String {
    let distance = humanize_distance(record.date_time_notification, now, locale);
    match locale {
        Locale::English => format!("Don't forget to water your {} in {}.", record.name, distance),
        Locale::Portuguese => format!(
            "Não esqueça de regar a {} à {} horas.",
            record.name, distance
        ),
    }
}
