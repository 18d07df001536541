//! Human-readable durations for configuration files.
//!
//! Accepts `"300ms"`, `"3s"`, `"2m"`, `"1h"` and compounds like `"1m30s"`.
//! Bare integers are whole seconds. Zero means "unset" throughout the
//! transport configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

fn parse(input: &str) -> Option<Duration> {
    let mut rest = input.trim();
    if let Ok(secs) = rest.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];
        let unit = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        total += match &rest[..unit] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        rest = &rest[unit..];
    }
    (!input.trim().is_empty()).then_some(total)
}

pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    if d.subsec_millis() == 0 {
        serializer.serialize_str(&format!("{}s", d.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}ms", d.as_millis()))
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse(&text).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid duration {text:?}: expected forms like \"300ms\", \"3s\" or \"1m30s\""
            ))
        }),
    }
}
