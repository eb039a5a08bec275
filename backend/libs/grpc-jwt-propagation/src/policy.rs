//! Claim-based access policy
//!
//! Each configured requirement adds one mandatory predicate; unset requirements
//! are not checked. Built once at startup, shared read-only.

/// Required claim values for a call to be admitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    pub required_scope: Option<String>,
    pub required_audience: Option<String>,
    pub required_issuer: Option<String>,
    pub required_subject: Option<String>,
}

impl AuthorizationPolicy {
    /// Policy with no predicates: any correctly signed, unexpired token passes
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = non_empty(scope.into());
        self
    }

    pub fn require_audience(mut self, audience: impl Into<String>) -> Self {
        self.required_audience = non_empty(audience.into());
        self
    }

    pub fn require_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.required_issuer = non_empty(issuer.into());
        self
    }

    pub fn require_subject(mut self, subject: impl Into<String>) -> Self {
        self.required_subject = non_empty(subject.into());
        self
    }

    /// Number of predicates this policy enforces
    pub fn predicate_count(&self) -> usize {
        [
            &self.required_scope,
            &self.required_audience,
            &self.required_issuer,
            &self.required_subject,
        ]
        .iter()
        .filter(|value| value.is_some())
        .count()
    }
}

// An empty requirement would reject every token; treat it as unset
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
