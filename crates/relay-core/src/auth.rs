//! Authorization gate: who may connect, and who may register as what.
//!
//! The relay runs two checks:
//!
//! 1. **Admission** ([`AuthorizationGate::admit`]), once per connection, before
//!    any frame is read.  A connection must present *some* credential: either
//!    a session token (controllers) or a device token (devices).
//! 2. **Registration** ([`AuthorizationGate::authorize`]), once per `register`
//!    message, for the specific role being claimed.
//!
//! How a credential was obtained (login form, cookie jar, provisioning) is
//! somebody else's problem.  The gate only answers yes or no.
//!
//! # Device secret comparison
//!
//! [`SharedSecretGate`] compares the presented device token against the
//! configured secret with [`subtle::ConstantTimeEq`], so the time taken does
//! not depend on how many leading bytes matched.

use std::collections::BTreeSet;
use std::fmt;

use subtle::ConstantTimeEq;

use crate::protocol::messages::{DeviceId, Role};

// ── Credentials ───────────────────────────────────────────────────────────────

/// Credentials captured from the connection's establishment request.
///
/// Empty strings are treated as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    session_token: Option<String>,
    device_token: Option<String>,
}

impl Credentials {
    /// Builds credentials from whatever the transport found.
    pub fn new(session_token: Option<String>, device_token: Option<String>) -> Self {
        Self {
            session_token: session_token.filter(|s| !s.is_empty()),
            device_token: device_token.filter(|s| !s.is_empty()),
        }
    }

    /// Credentials carrying only a session token.
    pub fn session(token: impl Into<String>) -> Self {
        Self::new(Some(token.into()), None)
    }

    /// Credentials carrying only a device token.
    pub fn device(token: impl Into<String>) -> Self {
        Self::new(None, Some(token.into()))
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn device_token(&self) -> Option<&str> {
        self.device_token.as_deref()
    }

    /// `true` when neither credential is present.
    pub fn is_empty(&self) -> bool {
        self.session_token.is_none() && self.device_token.is_none()
    }
}

impl fmt::Debug for Credentials {
    // Never print token values.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("device_token", &self.device_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ── Gate trait ────────────────────────────────────────────────────────────────

/// Decides whether a connection may be admitted and may register.
pub trait AuthorizationGate: Send + Sync {
    /// Admission check, run once when the connection is accepted.
    ///
    /// The default admits any connection that carries at least one
    /// credential.
    fn admit(&self, credentials: &Credentials) -> bool {
        !credentials.is_empty()
    }

    /// Returns `true` if a connection holding `credentials` may register as
    /// `role` for `device_id`.
    fn authorize(&self, role: Role, device_id: &DeviceId, credentials: &Credentials) -> bool;
}

// ── Session verification ──────────────────────────────────────────────────────

/// Verifies a controller's session token.
///
/// Real session validation lives with whatever issued the session; the
/// implementations here only cover what the relay can check on its own.
#[cfg_attr(test, mockall::automock)]
pub trait SessionVerifier: Send + Sync {
    fn verify(&self, token: &str) -> bool;
}

/// Accepts any non-empty session token.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionPresence;

impl SessionVerifier for SessionPresence {
    fn verify(&self, token: &str) -> bool {
        !token.is_empty()
    }
}

/// Accepts only session tokens from a fixed list.
#[derive(Clone, Default)]
pub struct SessionAllowList {
    tokens: BTreeSet<String>,
}

impl SessionAllowList {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl SessionVerifier for SessionAllowList {
    fn verify(&self, token: &str) -> bool {
        // Check every entry so the result does not depend on list position.
        self.tokens
            .iter()
            .fold(false, |found, allowed| {
                found | constant_time_eq(allowed.as_bytes(), token.as_bytes())
            })
    }
}

impl fmt::Debug for SessionAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAllowList")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

// ── Default gate ──────────────────────────────────────────────────────────────

/// The relay's standard gate.
///
/// - Controllers: the session token must satisfy the [`SessionVerifier`].
/// - Devices: the device token must equal the configured shared secret.
///   With no secret configured, every device registration is refused.
pub struct SharedSecretGate {
    device_secret: Option<Vec<u8>>,
    sessions: Box<dyn SessionVerifier>,
}

impl SharedSecretGate {
    /// Gate with the given device secret and the [`SessionPresence`] policy.
    pub fn new(device_secret: Option<String>) -> Self {
        Self::with_sessions(device_secret, SessionPresence)
    }

    /// Gate with the given device secret and session policy.
    pub fn with_sessions(
        device_secret: Option<String>,
        sessions: impl SessionVerifier + 'static,
    ) -> Self {
        Self {
            device_secret: device_secret
                .filter(|s| !s.is_empty())
                .map(String::into_bytes),
            sessions: Box::new(sessions),
        }
    }

    /// `true` if a device secret is configured.
    pub fn accepts_devices(&self) -> bool {
        self.device_secret.is_some()
    }
}

impl AuthorizationGate for SharedSecretGate {
    fn authorize(&self, role: Role, _device_id: &DeviceId, credentials: &Credentials) -> bool {
        match role {
            Role::Controller => credentials
                .session_token()
                .is_some_and(|token| self.sessions.verify(token)),
            Role::Device => match (&self.device_secret, credentials.device_token()) {
                (Some(expected), Some(presented)) => {
                    constant_time_eq(expected, presented.as_bytes())
                }
                _ => false,
            },
        }
    }
}

impl fmt::Debug for SharedSecretGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretGate")
            .field("accepts_devices", &self.accepts_devices())
            .finish_non_exhaustive()
    }
}

/// Length is not hidden; contents are.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
