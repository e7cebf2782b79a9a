use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::expression::ExpressionValue;

/// Decodes the payload of a JWT without verifying its signature. Emulated
/// clients sign tokens with throwaway keys, so only the claims matter.
pub fn decode_unverified_jwt(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// `request.auth` for a bearer token: `{uid, token}` or null.
pub fn auth_expression(token: Option<&str>) -> ExpressionValue {
    let Some(claims) = token.and_then(decode_unverified_jwt) else {
        return ExpressionValue::null();
    };
    let uid = claims
        .get("user_id")
        .map_or_else(ExpressionValue::null, ExpressionValue::from_json);
    ExpressionValue::map([
        ("uid".to_string(), uid),
        ("token".to_string(), ExpressionValue::from_json(&claims)),
    ])
}
