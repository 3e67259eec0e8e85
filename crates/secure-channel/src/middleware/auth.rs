//! Connection-time authentication.
//!
//! The channel only relies on the [`Authenticator`] contract: a pure function
//! from an optional credential to an identity or a rejection reason. Token
//! minting and what a principal means are the embedding application's
//! business.

use crate::domain::config::AuthConfig;
use std::fmt;
use tracing::debug;

/// Authenticated principal, alive for one connection only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    principal: String,
}

impl Identity {
    /// Identity for `principal`
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    /// Opaque principal string
    pub fn principal(&self) -> &str {
        &self.principal
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.principal)
    }
}

/// Result of validating a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Credential accepted
    Accepted(Identity),
    /// Credential missing or not accepted
    Rejected {
        /// Human readable reason, sent as the close reason
        reason: String,
    },
}

impl AuthOutcome {
    /// Rejection with `reason`
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Whether the credential was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// Validates a connection credential.
///
/// Called exactly once per transport connection, before admission. Must not
/// block: it runs on the upgrade path.
pub trait Authenticator: Send + Sync + 'static {
    /// Validate `credential` (`None` when the `token` query parameter is absent)
    fn validate(&self, credential: Option<&str>) -> AuthOutcome;
}

/// Accept-list of static tokens, each mapped to a principal.
pub struct StaticTokenAuthenticator {
    tokens: Vec<(String, String)>,
}

impl StaticTokenAuthenticator {
    /// Build from `(token, principal)` pairs
    pub fn new<I, T, P>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(t, p)| (t.into(), p.into()))
                .collect(),
        }
    }

    /// Build from the `[auth]` settings section
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.iter().map(|(t, p)| (t.clone(), p.clone())))
    }

    /// Number of accepted tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no token is accepted
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn validate(&self, credential: Option<&str>) -> AuthOutcome {
        let Some(token) = credential.filter(|t| !t.is_empty()) else {
            return AuthOutcome::rejected("No token provided");
        };

        // Compare against every entry so timing does not reveal the match position
        let mut matched: Option<&str> = None;
        for (candidate, principal) in &self.tokens {
            if constant_time_compare(token, candidate) && matched.is_none() {
                matched = Some(principal);
            }
        }

        match matched {
            Some(principal) => {
                debug!(principal = principal, "Token accepted");
                AuthOutcome::Accepted(Identity::new(principal))
            }
            None => AuthOutcome::rejected("Invalid token"),
        }
    }
}

impl<F> Authenticator for F
where
    F: Fn(Option<&str>) -> AuthOutcome + Send + Sync + 'static,
{
    fn validate(&self, credential: Option<&str>) -> AuthOutcome {
        self(credential)
    }
}

/// Constant-time string comparison to prevent timing attacks.
///
/// Both inputs are padded to the longer length with different fill bytes, so
/// the comparison runs over the same number of bytes whether or not the
/// lengths match.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
