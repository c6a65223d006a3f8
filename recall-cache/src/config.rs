//! Cache configuration.
//!
//! `CacheOptions` carries every tunable the orchestrator consults at
//! runtime: key construction, staleness policy, refresh timing, and
//! the global enable switch. Options are validated once when the
//! cache is constructed, never per call.

use std::time::Duration;

use recall_core::{ConfigError, RecallResult};

/// Default prefix prepended to every cache and dependency key.
pub const DEFAULT_KEY_PREFIX: &str = "recall";

/// How long a same-session reader waits for an in-flight refresh
/// before falling back to the stale value.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a refresh claim is honored before another caller may
/// take it over.
pub const DEFAULT_REFRESH_LEASE: Duration = Duration::from_secs(30);

// ============================================================================
// CacheOptions
// ============================================================================

/// Runtime configuration for a [`ServiceCache`](crate::ServiceCache).
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Prefix for all generated cache keys and dependency keys.
    pub key_prefix: String,
    /// When true, fallback cache keys are SHA-256 hashed instead of
    /// embedding the serialized request.
    pub hash_keys: bool,
    /// When true, invalidation marks entries Dirty and readers may be
    /// served stale values while a refresh runs. When false,
    /// invalidation removes entries outright.
    pub stale_reads_allowed: bool,
    /// Bound on how long a same-session reader blocks waiting for an
    /// in-flight refresh.
    pub lock_timeout: Duration,
    /// Lease granted to the caller that wins a refresh claim. An
    /// expired lease lets another caller take the claim over.
    pub refresh_lease: Duration,
    /// Expiration applied to entries whose request carries none.
    pub default_expiration: Option<Duration>,
    /// Master switch. When false every call goes straight to the
    /// backing service.
    pub enabled: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            hash_keys: false,
            stale_reads_allowed: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            refresh_lease: DEFAULT_REFRESH_LEASE,
            default_expiration: None,
            enabled: true,
        }
    }
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_hashed_keys(mut self, hash: bool) -> Self {
        self.hash_keys = hash;
        self
    }

    pub fn with_stale_reads(mut self, allowed: bool) -> Self {
        self.stale_reads_allowed = allowed;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_refresh_lease(mut self, lease: Duration) -> Self {
        self.refresh_lease = lease;
        self
    }

    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = Some(expiration);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validates option consistency.
    ///
    /// A lock timeout at or beyond the refresh lease would let a
    /// blocked reader outlive the claim it is waiting on, so that
    /// combination is rejected.
    pub fn validate(&self) -> RecallResult<()> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key_prefix".to_string(),
            }
            .into());
        }
        if self.key_prefix.contains(':') || self.key_prefix.contains('|') {
            return Err(ConfigError::InvalidValue {
                field: "key_prefix".to_string(),
                value: self.key_prefix.clone(),
                reason: "must not contain ':' or '|'".to_string(),
            }
            .into());
        }
        if self.lock_timeout >= self.refresh_lease {
            return Err(ConfigError::TimeoutExceedsLease {
                timeout: self.lock_timeout,
                lease: self.refresh_lease,
            }
            .into());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
