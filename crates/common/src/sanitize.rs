//! JSON cleaning for audit payloads.
//!
//! Sync log details keep a copy of the raw source row, the transformed row and
//! the load result. Those payloads can contain timestamps, non-finite floats
//! and arbitrary result structs; everything is flattened here into plain JSON
//! before it is stored.

use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

/// Convert any serializable value into storable JSON.
///
/// * chrono timestamps become ISO-8601 strings (with offset when tz-aware)
/// * `NaN` / `±inf` become `null`
/// * structs become objects, tuples and sequences become arrays
/// * anything serde refuses (e.g. maps with composite keys) falls back to its
///   `Debug` rendering
pub fn clean_for_json<T>(value: &T) -> Value
where
    T: Serialize + Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(err) => {
            log::debug!("falling back to debug rendering for audit payload: {err}");
            Value::String(format!("{value:?}"))
        }
    }
}

/// Non-finite floats have no JSON representation.
pub fn clean_float(value: f64) -> Value {
    if value.is_finite() {
        Value::from(value)
    } else {
        Value::Null
    }
}
