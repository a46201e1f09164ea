//! One-time login codes: issue, deliver, verify.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};

use rosy_types::models::OneTimeCode;

use crate::clock::Clock;
use crate::locks::KeyedLocks;
use crate::mailer::{MailError, Mailer, VerificationMessage};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum CodeError {
    #[error("Invalid email")]
    InvalidEmail,

    #[error("Missing params")]
    MissingParams,

    #[error("No code sent")]
    Missing,

    #[error("Code expired")]
    Expired,

    #[error("Invalid code")]
    Mismatch,

    #[error("Too many attempts, request a new code")]
    TooManyAttempts,

    #[error("Failed to send email")]
    Delivery(#[source] MailError),
}

/// Keyed registry of live codes. At most one code per email: `put`
/// replaces whatever was there.
pub trait CodeStore: Send + Sync {
    fn put(&self, code: OneTimeCode);
    fn get(&self, email: &str) -> Option<OneTimeCode>;
    fn delete(&self, email: &str);
    /// Removes every code expired at `now`. Returns how many went.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct InMemoryCodeStore {
    codes: Mutex<HashMap<String, OneTimeCode>>,
}

impl InMemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, OneTimeCode>> {
        self.codes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CodeStore for InMemoryCodeStore {
    fn put(&self, code: OneTimeCode) {
        self.map().insert(code.email.clone(), code);
    }

    fn get(&self, email: &str) -> Option<OneTimeCode> {
        self.map().get(email).cloned()
    }

    fn delete(&self, email: &str) {
        self.map().remove(email);
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, code| !code.is_expired(now));
        before - map.len()
    }
}

/// Uniform 6-digit code, leading zeros allowed.
pub fn generate_code() -> String {
    let code: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", code)
}

pub fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// Constant-time check of a submitted code against a stored digest.
pub fn code_matches(code_hash: &str, code: &str) -> bool {
    hash_code(code).as_bytes().ct_eq(code_hash.as_bytes()).into()
}

/// Trimmed, lower-cased email if it looks deliverable.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.chars().any(char::is_whitespace) {
        return None;
    }
    let (local, domain) = email.split_once('@')?;
    let domain_ok = !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if local.is_empty() || !domain_ok {
        return None;
    }
    Some(email)
}

/// Issues and checks codes. Every operation on one email runs under that
/// email's lock, so send and verify never interleave for the same key.
pub struct CodeService {
    store: Arc<dyn CodeStore>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn Mailer>,
    locks: KeyedLocks,
    max_attempts: u32,
}

impl CodeService {
    pub fn new(
        store: Arc<dyn CodeStore>,
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn Mailer>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            mailer,
            locks: KeyedLocks::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Stores a fresh code for `email` and mails it. Returns the normalized email.
    pub async fn send_code(&self, email: &str) -> Result<String, CodeError> {
        let email = normalize_email(email).ok_or(CodeError::InvalidEmail)?;
        let code = generate_code();

        let _guard = self.locks.lock(&email).await;
        self.store
            .put(OneTimeCode::issue(&email, hash_code(&code), self.clock.now()));

        let message = VerificationMessage::new(&code);
        if let Err(e) = self.mailer.send(&email, &message.subject, &message.body).await {
            warn!("send mail error for {}: {}", email, e);
            self.store.delete(&email);
            return Err(CodeError::Delivery(e));
        }

        info!("Verification code sent to {}", email);
        Ok(email)
    }

    /// Checks `code` against the live code for `email`. A correct code is
    /// consumed; wrong guesses count toward the attempt limit.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<String, CodeError> {
        let email = email.trim().to_lowercase();
        let code = code.trim();
        if email.is_empty() || code.is_empty() {
            return Err(CodeError::MissingParams);
        }

        let _guard = self.locks.lock(&email).await;
        let mut entry = self.store.get(&email).ok_or(CodeError::Missing)?;

        if entry.is_expired(self.clock.now()) {
            self.store.delete(&email);
            return Err(CodeError::Expired);
        }

        if !code_matches(&entry.code_hash, code) {
            entry.attempts += 1;
            if entry.attempts >= self.max_attempts {
                warn!("Too many wrong codes for {}, dropping code", email);
                self.store.delete(&email);
                return Err(CodeError::TooManyAttempts);
            }
            debug!("Wrong code for {} (attempt {})", email, entry.attempts);
            self.store.put(entry);
            return Err(CodeError::Mismatch);
        }

        self.store.delete(&email);
        info!("Code verified for {}", email);
        Ok(email)
    }

    /// Drops expired codes and idle per-email locks.
    pub fn sweep(&self) -> usize {
        let purged = self.store.purge_expired(self.clock.now());
        self.locks.prune();
        purged
    }
}
