//! Bearer token claims
//!
//! [`TokenClaims`] is the structured form handed to handlers after validation.
//! The wire form (`aud` as one string or many, `scope` as a space-delimited
//! string) is normalized into sets here so that every policy check is a set
//! membership test.

use crate::error::AuthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Claims extracted from a validated token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: BTreeSet<String>,
    pub scope: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
}

impl TokenClaims {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.contains(scope)
    }

    pub fn has_audience(&self, audience: &str) -> bool {
        self.audience.contains(audience)
    }

    /// Scopes joined back into their wire form, for logging
    pub fn scope_string(&self) -> String {
        self.scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// `aud` is either a single string or an array of strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// Claims as they appear in the token payload
#[derive(Debug, Deserialize)]
pub(crate) struct WireClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    iss: String,
    #[serde(default)]
    aud: Option<OneOrMany>,
    #[serde(default)]
    scope: String,
    /// NumericDate: seconds since the epoch, possibly fractional
    exp: f64,
    #[serde(default)]
    iat: f64,
}

/// Millisecond precision; anything finer is truncated
fn numeric_date(seconds: f64) -> Result<DateTime<Utc>, AuthError> {
    if !seconds.is_finite() {
        return Err(AuthError::MalformedToken);
    }
    DateTime::from_timestamp_millis((seconds * 1000.0) as i64).ok_or(AuthError::MalformedToken)
}

impl WireClaims {
    pub(crate) fn into_claims(self) -> Result<TokenClaims, AuthError> {
        let expires_at = numeric_date(self.exp)?;
        let issued_at = numeric_date(self.iat)?;

        let audience = match self.aud {
            None => BTreeSet::new(),
            Some(OneOrMany::One(aud)) => BTreeSet::from([aud]),
            Some(OneOrMany::Many(auds)) => auds.into_iter().collect(),
        };

        let scope = self.scope.split_whitespace().map(str::to_string).collect();

        Ok(TokenClaims {
            subject: self.sub,
            issuer: self.iss,
            audience,
            scope,
            expires_at,
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> TokenClaims {
        serde_json::from_value::<WireClaims>(value)
            .unwrap()
            .into_claims()
            .unwrap()
    }

    #[test]
    fn test_scope_is_a_set_not_a_substring() {
        let claims = parse(json!({
            "sub": "client@clients",
            "scope": "read:messages  write:messages",
            "exp": 2_000_000_000,
        }));

        assert_eq!(claims.scope.len(), 2);
        assert!(claims.has_scope("read:messages"));
        assert!(!claims.has_scope("read"));
        assert!(!claims.has_scope("messages"));
        assert_eq!(claims.scope_string(), "read:messages write:messages");
    }

    #[test]
    fn test_audience_single_or_many() {
        let single = parse(json!({ "aud": "hello-service", "exp": 2_000_000_000 }));
        assert!(single.has_audience("hello-service"));

        let many = parse(json!({
            "aud": ["hello-service", "https://tenant.example.com/userinfo"],
            "exp": 2_000_000_000,
        }));
        assert_eq!(many.audience.len(), 2);
        assert!(many.has_audience("hello-service"));

        let none = parse(json!({ "exp": 2_000_000_000 }));
        assert!(none.audience.is_empty());
    }

    #[test]
    fn test_timestamps() {
        let claims = parse(json!({ "exp": 2_000_000_000, "iat": 1_999_996_400 }));
        assert_eq!(claims.expires_at.timestamp(), 2_000_000_000);
        assert_eq!(claims.issued_at.timestamp(), 1_999_996_400);
    }

    #[test]
    fn test_fractional_timestamps() {
        let claims = parse(json!({ "exp": 2_000_000_000.75, "iat": 1_999_996_400.5 }));
        assert_eq!(claims.expires_at.timestamp_millis(), 2_000_000_000_750);
        assert_eq!(claims.issued_at.timestamp_millis(), 1_999_996_400_500);
    }

    #[test]
    fn test_out_of_range_exp_is_malformed() {
        let wire = serde_json::from_value::<WireClaims>(json!({ "exp": 1e300 })).unwrap();
        assert_eq!(wire.into_claims().unwrap_err(), AuthError::MalformedToken);
    }

    #[test]
    fn test_missing_exp_does_not_parse() {
        assert!(serde_json::from_value::<WireClaims>(json!({ "sub": "x" })).is_err());
    }
}
