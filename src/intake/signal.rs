//! Signal payload parsing
//!
//! Two JSON dialects are accepted:
//!
//! - `{"action": "long" | "short", "price": 123.4, "time": ...}`
//! - `{"signal": "LONG_SIGNAL" | "SHORT_SIGNAL" | "EXIT_SIGNAL" | "TRAIL_EXIT_SIGNAL", "price": "123.4", "time": "2024-01-01T00:05:00Z"}`
//!
//! `price` may be a number or a numeric string. `time` may be RFC 3339,
//! `YYYY-MM-DD HH:MM:SS` (UTC), or epoch seconds/milliseconds; missing
//! means now.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{TrackerError, TrackerResult};
use crate::types::{Direction, ExitReason};

/// A validated instruction for the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum SignalCommand {
    Open {
        direction: Direction,
        price: f64,
        time: DateTime<Utc>,
    },
    Exit {
        price: f64,
        time: DateTime<Utc>,
        reason: ExitReason,
    },
}

#[derive(Debug, Deserialize)]
struct RawSignal {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    signal: Option<String>,
    #[serde(default)]
    price: Option<Value>,
    #[serde(default)]
    time: Option<Value>,
}

enum Intent {
    Open(Direction),
    Exit(ExitReason),
}

impl SignalCommand {
    /// Parse a raw request body. Content type is not checked.
    pub fn from_body(body: &[u8]) -> TrackerResult<Self> {
        let raw: RawSignal = serde_json::from_slice(body)
            .map_err(|e| TrackerError::InvalidSignal(format!("invalid JSON: {}", e)))?;
        Self::from_raw(raw, Utc::now())
    }

    fn from_raw(raw: RawSignal, now: DateTime<Utc>) -> TrackerResult<Self> {
        let intent = match (raw.action.as_deref(), raw.signal.as_deref()) {
            (Some(action), _) => Direction::from_str(action)
                .map(Intent::Open)
                .ok_or_else(|| TrackerError::InvalidSignal(format!("invalid action: {}", action)))?,
            (None, Some(signal)) => parse_signal_name(signal)?,
            (None, None) => {
                return Err(TrackerError::InvalidSignal(
                    "invalid payload: missing action or signal".to_string(),
                ))
            }
        };

        let price = parse_price(raw.price.as_ref())?;
        let time = match raw.time.as_ref() {
            None | Some(Value::Null) => now,
            Some(value) => parse_time(value)?,
        };

        Ok(match intent {
            Intent::Open(direction) => SignalCommand::Open {
                direction,
                price,
                time,
            },
            Intent::Exit(reason) => SignalCommand::Exit {
                price,
                time,
                reason,
            },
        })
    }
}

fn parse_signal_name(signal: &str) -> TrackerResult<Intent> {
    match signal.trim().to_uppercase().as_str() {
        "LONG_SIGNAL" | "LONG" => Ok(Intent::Open(Direction::Long)),
        "SHORT_SIGNAL" | "SHORT" => Ok(Intent::Open(Direction::Short)),
        "EXIT_SIGNAL" | "EXIT" => Ok(Intent::Exit(ExitReason::Signal)),
        "TRAIL_EXIT_SIGNAL" => Ok(Intent::Exit(ExitReason::TrailingStop)),
        other => Err(TrackerError::InvalidSignal(format!(
            "invalid signal: {}",
            other
        ))),
    }
}

fn parse_price(value: Option<&Value>) -> TrackerResult<f64> {
    let price = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match price {
        Some(p) if p.is_finite() && p > 0.0 => Ok(p),
        _ => Err(TrackerError::InvalidSignal(format!(
            "invalid price: {}",
            value.map(|v| v.to_string()).unwrap_or_else(|| "missing".to_string())
        ))),
    }
}

fn parse_time(value: &Value) -> TrackerResult<DateTime<Utc>> {
    let invalid = || TrackerError::InvalidSignal(format!("invalid time: {}", value));
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(t) = DateTime::parse_from_rfc3339(s) {
                return Ok(t.with_timezone(&Utc));
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| Utc.from_utc_datetime(&naive))
                .map_err(|_| invalid())
        }
        Value::Number(n) => {
            let secs = n.as_i64().ok_or_else(invalid)?;
            // Anything past year ~33658 in seconds is really milliseconds.
            let ts = if secs.abs() >= 1_000_000_000_000 {
                Utc.timestamp_millis_opt(secs)
            } else {
                Utc.timestamp_opt(secs, 0)
            };
            ts.single().ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> TrackerResult<SignalCommand> {
        SignalCommand::from_body(body.as_bytes())
    }

    #[test]
    fn action_dialect_with_numeric_price() {
        let cmd = parse(r#"{"action":"long","price":43250.5,"time":"2024-01-01T00:05:00Z"}"#).unwrap();
        assert_eq!(
            cmd,
            SignalCommand::Open {
                direction: Direction::Long,
                price: 43250.5,
                time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap(),
            }
        );
    }

    #[test]
    fn signal_dialect_with_string_price() {
        let cmd = parse(r#"{"signal":"SHORT_SIGNAL","price":"101.25","time":"2024-01-01T00:00:00Z"}"#)
            .unwrap();
        assert!(matches!(
            cmd,
            SignalCommand::Open { direction: Direction::Short, price, .. } if price == 101.25
        ));
    }

    #[test]
    fn exit_signals_carry_reason() {
        let exit = parse(r#"{"signal":"EXIT_SIGNAL","price":100}"#).unwrap();
        assert!(matches!(exit, SignalCommand::Exit { reason: ExitReason::Signal, .. }));
        let trail = parse(r#"{"signal":"TRAIL_EXIT_SIGNAL","price":100}"#).unwrap();
        assert!(matches!(trail, SignalCommand::Exit { reason: ExitReason::TrailingStop, .. }));
    }

    #[test]
    fn missing_time_means_now() {
        let before = Utc::now();
        let cmd = parse(r#"{"action":"short","price":"99"}"#).unwrap();
        match cmd {
            SignalCommand::Open { time, .. } => assert!(time >= before),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn alternate_time_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        for body in [
            r#"{"action":"long","price":1,"time":"2024-01-01 00:05:00"}"#,
            r#"{"action":"long","price":1,"time":1704067500}"#,
            r#"{"action":"long","price":1,"time":1704067500000}"#,
        ] {
            match parse(body).unwrap() {
                SignalCommand::Open { time, .. } => assert_eq!(time, expected, "{}", body),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn rejects_bad_payloads() {
        for body in [
            "not json",
            r#"{"price":100}"#,
            r#"{"action":"hold","price":100}"#,
            r#"{"signal":"MAYBE","price":100}"#,
            r#"{"action":"long"}"#,
            r#"{"action":"long","price":0}"#,
            r#"{"action":"long","price":"-5"}"#,
            r#"{"action":"long","price":"abc"}"#,
            r#"{"action":"long","price":10,"time":"yesterday"}"#,
        ] {
            assert!(
                matches!(parse(body), Err(TrackerError::InvalidSignal(_))),
                "accepted {}",
                body
            );
        }
    }
}
