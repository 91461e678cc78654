/*!
 * Serde helpers for configuration sources.
 *
 * Values arriving from files and environment variables may be numbers or strings
 * holding numbers, depending on the source. These helpers accept both forms so a
 * `TraversalConfigPatch` deserializes the same way from every source.
 */

use crate::config::SleepTime;
use serde::de::Error;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::time::Duration;

/// Words accepted for an unbounded document limit
const UNBOUNDED_WORDS: [&str; 3] = ["unbounded", "infinity", "none"];

fn value_to_u64<E: Error>(value: &Value) -> Result<u64, E> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| E::custom(format!("Expected a non-negative integer, found {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| E::custom(format!("Cannot parse '{s}' as a non-negative integer"))),
        other => Err(E::custom(format!(
            "Expected numeric value, found: {other}"
        ))),
    }
}

/// Deserialize an optional count that may be given as a number or a numeric string.
///
/// ```rust
/// use serde::Deserialize;
/// use doc_migrate::utils::serde::deserialize_optional_count;
///
/// #[derive(Deserialize)]
/// struct Settings {
///     #[serde(default, deserialize_with = "deserialize_optional_count")]
///     batch_size: Option<usize>,
/// }
///
/// let settings: Settings = serde_json::from_str(r#"{"batch_size": "40"}"#).unwrap();
/// assert_eq!(settings.batch_size, Some(40));
/// ```
pub fn deserialize_optional_count<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let raw = value_to_u64::<D::Error>(&value)?;
            T::try_from(raw)
                .map(Some)
                .map_err(|_| D::Error::custom(format!("Value {raw} is out of range")))
        }
    }
}

/// Deserialize an optional document limit.
///
/// A number bounds the traversal; one of `unbounded`, `infinity` or `none` lifts the
/// bound. A missing field leaves the current setting untouched.
pub fn deserialize_optional_doc_limit<'de, D>(
    deserializer: D,
) -> Result<Option<Option<usize>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s))
            if UNBOUNDED_WORDS
                .iter()
                .any(|word| s.trim().eq_ignore_ascii_case(word)) =>
        {
            Ok(Some(None))
        }
        Some(value) => {
            let raw = value_to_u64::<D::Error>(&value)?;
            usize::try_from(raw)
                .map(|limit| Some(Some(limit)))
                .map_err(|_| D::Error::custom(format!("Value {raw} is out of range")))
        }
    }
}

/// Deserialize an optional duration expressed in milliseconds.
pub fn deserialize_optional_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis: Option<u64> = deserialize_optional_count(deserializer)?;
    Ok(millis.map(Duration::from_millis))
}

/// Deserialize an optional fixed [`SleepTime`] expressed in milliseconds.
pub fn deserialize_optional_sleep_time<'de, D>(
    deserializer: D,
) -> Result<Option<SleepTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let duration = deserialize_optional_millis(deserializer)?;
    Ok(duration.map(SleepTime::Fixed))
}
