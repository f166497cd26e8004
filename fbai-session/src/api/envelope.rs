//! Parsing of the server's `{ success, data }` response envelope
//!
//! Two shapes are accepted:
//!
//! ```json
//! { "success": true, "data": { "user": {..}, "accessToken": "..", "refreshToken": ".." } }
//! { "success": true, "user": {..}, "token": ".." }
//! ```
//!
//! Fields are looked up in `data` first, then at the top level. Anything
//! else, including `success: false`, is rejected with a protocol error.

use super::{LoginOutcome, RefreshedTokens};
use fbai_core::{protocol_error, FbaiError, FbaiResult, UserProjection};
use serde::Deserialize;
use serde_json::Value;

const COMPONENT: &str = "envelope";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    user: Option<Value>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<Payload>,
    #[serde(flatten)]
    top: Payload,
}

/// The useful part of an envelope, merged across both shapes
#[derive(Debug, Default)]
struct Merged {
    user: Option<Value>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn open(body: &str) -> FbaiResult<Merged> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| protocol_error!(format!("Malformed response envelope: {}", e), COMPONENT))?;

    if !envelope.success {
        let reason = envelope
            .message
            .or(envelope.error)
            .unwrap_or_else(|| "no reason given".to_string());
        return Err(protocol_error!(
            format!("Server reported failure: {}", reason),
            COMPONENT
        ));
    }

    let data = envelope.data.unwrap_or_default();
    let top = envelope.top;

    Ok(Merged {
        user: data.user.or(top.user).filter(|user| !user.is_null()),
        access_token: non_empty(data.access_token)
            .or_else(|| non_empty(data.token))
            .or_else(|| non_empty(top.access_token))
            .or_else(|| non_empty(top.token)),
        refresh_token: non_empty(data.refresh_token).or_else(|| non_empty(top.refresh_token)),
    })
}

fn user_from(value: Option<Value>) -> FbaiResult<UserProjection> {
    let value = value.ok_or_else(|| protocol_error!("Response carries no user", COMPONENT))?;
    serde_json::from_value(value)
        .map_err(|e| protocol_error!(format!("Response user is malformed: {}", e), COMPONENT))
}

/// Body of a successful login: user and access token are required
pub fn parse_login(body: &str) -> FbaiResult<LoginOutcome> {
    let merged = open(body)?;
    let access_token = merged
        .access_token
        .ok_or_else(|| protocol_error!("Login response carries no access token", COMPONENT))?;

    Ok(LoginOutcome {
        user: user_from(merged.user)?,
        access_token,
        refresh_token: merged.refresh_token,
    })
}

/// Body of a successful profile request
pub fn parse_profile(body: &str) -> FbaiResult<UserProjection> {
    user_from(open(body)?.user)
}

/// Body of a successful refresh: the access token is required
pub fn parse_refresh(body: &str) -> FbaiResult<RefreshedTokens> {
    let merged = open(body)?;
    let access_token = merged
        .access_token
        .ok_or_else(|| protocol_error!("Refresh response carries no access token", COMPONENT))?;

    Ok(RefreshedTokens {
        access_token,
        refresh_token: merged.refresh_token,
    })
}

/// Human-readable reason from an error body, if it has one
pub fn failure_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Turn a protocol error on the login path into an authentication failure
pub(crate) fn login_rejected(error: FbaiError) -> FbaiError {
    match error {
        FbaiError::Protocol { message, context } if message.starts_with("Server reported failure") => {
            FbaiError::Authentication { message, context }
        }
        other => other,
    }
}
