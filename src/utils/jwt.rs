//! Routing metadata carried in the client key.
//!
//! Client keys are JWTs whose payload holds a `dimension_id` claim. The
//! signature is not verified here; the key is only read for routing.

use base64::{engine::general_purpose, Engine as _};

/// Extract the `dimension_id` claim from a JWT client key.
///
/// Returns `None` if the key is not a three-part JWT, the payload is not
/// base64url JSON, or the claim is missing.
///
/// ```
/// use customfit::utils::dimension_id_from_client_key;
///
/// assert_eq!(dimension_id_from_client_key("not-a-jwt"), None);
/// ```
pub fn dimension_id_from_client_key(client_key: &str) -> Option<String> {
    let mut parts = client_key.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    claims
        .get("dimension_id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
