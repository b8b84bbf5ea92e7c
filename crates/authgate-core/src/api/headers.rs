//! Header normalization.
//!
//! Callers pass headers in whatever spelling they like (`contentType`,
//! `content-type`, `Authorization`, ...). Normalization produces exactly one
//! `Content-Type` and at most one `Authorization` entry; everything else is
//! copied as given.

use serde::{Deserialize, Serialize};

use super::request::Headers;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const AUTHORIZATION: &str = "Authorization";
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Spellings tried first, in order; other case variants follow.
const CONTENT_TYPE_SPELLINGS: &[&str] = &["contentType", "Content-Type", "content-type"];
const AUTHORIZATION_SPELLINGS: &[&str] = &["Authorization", "authorization"];

/// Which Authorization wins when the caller sets one and a credential is present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationPrecedence {
    /// Caller-supplied header is sent as is
    #[default]
    Caller,
    /// Stored access credential replaces the caller's header
    Credential,
}

pub(crate) fn is_content_type(key: &str) -> bool {
    key.eq_ignore_ascii_case("content-type") || key.eq_ignore_ascii_case("contenttype")
}

pub(crate) fn is_authorization(key: &str) -> bool {
    key.eq_ignore_ascii_case("authorization")
}

/// First non-empty value among the preferred spellings, then any other case variant
fn first_value<'a>(
    headers: &'a Headers,
    spellings: &[&str],
    matches: fn(&str) -> bool,
) -> Option<&'a str> {
    let preferred = spellings
        .iter()
        .filter_map(|key| headers.get(*key))
        .map(String::as_str);
    let others = headers
        .iter()
        .filter(|(k, _)| matches(k) && !spellings.contains(&k.as_str()))
        .map(|(_, v)| v.as_str());

    preferred.chain(others).find(|v| !v.trim().is_empty())
}

/// Canonicalize caller headers, adding the default content type and a bearer
/// token from `access_token` where the caller did not set one.
pub fn normalize_headers(
    headers: &Headers,
    access_token: Option<&str>,
    precedence: AuthorizationPrecedence,
) -> Headers {
    let mut normalized: Headers = headers
        .iter()
        .filter(|(k, _)| !is_content_type(k) && !is_authorization(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let content_type = first_value(headers, CONTENT_TYPE_SPELLINGS, is_content_type)
        .unwrap_or(DEFAULT_CONTENT_TYPE);
    normalized.insert(CONTENT_TYPE.to_string(), content_type.to_string());

    let caller = first_value(headers, AUTHORIZATION_SPELLINGS, is_authorization).map(str::to_string);
    let bearer = access_token
        .filter(|t| !t.is_empty())
        .map(|t| format!("Bearer {}", t));

    let authorization = match precedence {
        AuthorizationPrecedence::Caller => caller.or(bearer),
        AuthorizationPrecedence::Credential => bearer.or(caller),
    };
    if let Some(value) = authorization {
        normalized.insert(AUTHORIZATION.to_string(), value);
    }

    normalized
}
