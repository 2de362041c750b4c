//! IP Geolocation module
//!
//! Best-effort lookup of the client's approximate origin via ipapi.co style
//! JSON services. Single attempt, never retried.

use crate::network_analyzer::transport::{bounded, Transport};
use crate::network_analyzer::{OriginLocation, Outcome, ProbeError};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timeout for the lookup
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

const UNKNOWN_CITY: &str = "Unknown City";
const UNKNOWN_COUNTRY: &str = "Unknown Country";
const UNKNOWN_IP: &str = "127.0.0.1";

/// Resolve the client origin. Failure yields the fixed placeholder.
pub async fn resolve_origin(
    transport: &dyn Transport,
    url: &str,
    cancel: &CancellationToken,
) -> Outcome<OriginLocation> {
    let lookup = bounded(cancel, LOOKUP_TIMEOUT, transport.get_json(url))
        .await
        .and_then(|value| parse_origin(&value));

    match lookup {
        Ok(origin) => {
            log::info!("Resolved origin: {}, {}", origin.city, origin.country);
            Outcome::Measured(origin)
        }
        Err(e) => {
            log::warn!("Geolocation lookup failed: {}", e);
            Outcome::Synthetic(OriginLocation::placeholder())
        }
    }
}

/// Read `city`, `country_name` and `ip` from an ipapi.co style document.
///
/// The document must be a JSON object. A field that is missing, empty or not
/// a string falls back to its "Unknown" placeholder on its own.
fn parse_origin(value: &Value) -> Result<OriginLocation, ProbeError> {
    let Value::Object(fields) = value else {
        return Err(ProbeError::Decode(format!(
            "expected a JSON object, got {}",
            json_kind(value)
        )));
    };

    let field = |name: &str, fallback: &str| {
        fields
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(fallback)
            .to_string()
    };

    Ok(OriginLocation {
        city: field("city", UNKNOWN_CITY),
        country: field("country_name", UNKNOWN_COUNTRY),
        ip: field("ip", UNKNOWN_IP),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
