//! # Authorization Core
//!
//! The policy engine mediating every cryptographic operation a personal key
//! custodian performs on behalf of local OS packages and remote NIP-46
//! ("bunker") clients: permission storage, rate and velocity limiting,
//! risk-scored interactive approval, a tamper-evident audit chain, and
//! NIP-46 session bookkeeping.
//!
//! ## Layout
//!
//! - [`domain`]: pure business logic, no I/O beyond the [`authority_types`]
//!   ports it's handed.
//! - [`ports`]: the hexagonal seams -- [`ports::inbound::AuthorizationPort`]
//!   is what transports call into; [`ports::outbound`] is what the core
//!   borrows (signer, bunker transport, approver).
//! - [`adapters`]: concrete implementations of those seams -- the
//!   `nostrconnect://` URL parser, the IPC query adapter, the interactive
//!   approval adapter, and the RocksDB production store.
//! - [`runtime_config`]: operator-tunable configuration loaded from TOML.
//!
//! [`AuthorizationCore`] is the composition root: it owns every long-lived
//! component as a single value instead of scattering them across
//! process-wide singletons, so a process can run more than one instance
//! (e.g. isolated per test) without global state leaking between them.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod runtime_config;

use std::sync::Arc;

use authority_types::{Clock, KeyValueStore, SystemClock};

use domain::approval::ApprovalRegistry;
use domain::audit::AuditChain;
use domain::caller_verifier::{CallerVerifier, NonceStore};
use domain::config::Configuration;
use domain::engine::AuthorizationEngine;
use domain::errors::CoreResult;
use domain::nip46::Nip46SessionManager;
use domain::permission::PermissionStore;
use domain::rate_limit::RateLimiter;
use domain::risk::RiskAssessor;
use domain::velocity::{VelocityLimits, VelocityTracker};

use runtime_config::RuntimeConfig;

/// Owns every component the engine wires together, plus the engine itself.
/// Constructed once per process (or once per test, or once per isolated
/// profile); nothing in `domain` reaches for ambient global state.
pub struct AuthorizationCore {
    pub config: Arc<Configuration>,
    pub permissions: Arc<PermissionStore>,
    pub audit: Arc<AuditChain>,
    pub rate_limiter: Arc<RateLimiter>,
    pub velocity: Arc<VelocityTracker>,
    pub risk: Arc<RiskAssessor>,
    pub approvals: Arc<ApprovalRegistry>,
    pub sessions: Arc<Nip46SessionManager>,
    pub caller_verifier: Arc<CallerVerifier>,
    pub nonces: Arc<NonceStore>,
    pub engine: Arc<AuthorizationEngine>,
}

impl AuthorizationCore {
    /// Wires every component from a storage backend, a clock, and an HMAC
    /// key for the audit chain. Most callers will prefer
    /// [`AuthorizationCore::from_runtime_config`], which also resolves the
    /// clock and key from a [`RuntimeConfig`].
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, audit_hmac_key: Vec<u8>) -> CoreResult<Self> {
        Self::with_velocity_limits(store, clock, audit_hmac_key, VelocityLimits::default())
    }

    pub fn with_velocity_limits(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        audit_hmac_key: Vec<u8>,
        velocity_limits: VelocityLimits,
    ) -> CoreResult<Self> {
        let config = Arc::new(Configuration::new(store.clone())?);
        let permissions = Arc::new(PermissionStore::new(store.clone(), clock.clone()));
        let audit = Arc::new(AuditChain::new(store.clone(), clock.clone(), audit_hmac_key)?);
        let rate_limiter = Arc::new(RateLimiter::new(clock.clone()));
        let velocity = Arc::new(VelocityTracker::with_limits(store.clone(), clock.clone(), velocity_limits));
        let risk = Arc::new(RiskAssessor::new(clock.clone()));
        let approvals = Arc::new(ApprovalRegistry::new(clock.clone()));
        let sessions = Arc::new(Nip46SessionManager::new(store.clone()));
        let caller_verifier = Arc::new(CallerVerifier::new(store.clone()));
        let nonces = Arc::new(NonceStore::new(clock.clone()));

        let engine = Arc::new(
            AuthorizationEngine::new(
                config.clone(),
                permissions.clone(),
                audit.clone(),
                rate_limiter.clone(),
                velocity.clone(),
                risk.clone(),
                approvals.clone(),
                sessions.clone(),
                caller_verifier.clone(),
            )
            .with_approval_timeout(std::time::Duration::from_secs(60)),
        );

        Ok(Self {
            config,
            permissions,
            audit,
            rate_limiter,
            velocity,
            risk,
            approvals,
            sessions,
            caller_verifier,
            nonces,
            engine,
        })
    }

    /// Builds from a loaded [`RuntimeConfig`], using the real system clock.
    /// The storage backend must already have been opened by the caller
    /// (`InMemoryKvStore::new()` or, with the `rocksdb-backend` feature,
    /// `RocksDbStore::open`) since only the caller knows which one the
    /// config selected.
    pub fn from_runtime_config(store: Arc<dyn KeyValueStore>, runtime_config: &RuntimeConfig) -> CoreResult<Self> {
        let hmac_key = runtime_config
            .hmac_key_source
            .resolve()
            .map_err(|e| domain::errors::CoreError::DependencyUnavailable { reason: e.to_string() })?;
        let core = Self::with_velocity_limits(
            store,
            Arc::new(SystemClock),
            hmac_key,
            runtime_config.velocity_limits.clone().into(),
        )?;
        Ok(Self {
            engine: Arc::new(
                AuthorizationEngine::new(
                    core.config.clone(),
                    core.permissions.clone(),
                    core.audit.clone(),
                    core.rate_limiter.clone(),
                    core.velocity.clone(),
                    core.risk.clone(),
                    core.approvals.clone(),
                    core.sessions.clone(),
                    core.caller_verifier.clone(),
                )
                .with_approval_timeout(runtime_config.approval_timeout()),
            ),
            ..core
        })
    }

    /// Resolves every outstanding interactive approval as `Deny` so no
    /// caller is left blocked on an `authorize` call when the process
    /// exits.
    pub fn shutdown(&self) {
        self.approvals.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authority_types::{InMemoryKvStore, MockClock};

    #[test]
    fn wires_every_component_without_panicking() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new(0));
        let core = AuthorizationCore::new(store, clock, b"test-key".to_vec()).unwrap();
        assert_eq!(core.approvals.global_count(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_with_no_pending_approvals() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new(0));
        let core = AuthorizationCore::new(store, clock, b"test-key".to_vec()).unwrap();
        core.shutdown();
        core.shutdown();
    }

    #[test]
    fn from_runtime_config_resolves_inline_hmac_key() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let runtime_config = RuntimeConfig::load_from_str(
            r#"
            [hmac_key_source]
            kind = "inline"
            hex = "aabbcc"
            "#,
        )
        .unwrap();
        let core = AuthorizationCore::from_runtime_config(store, &runtime_config).unwrap();
        assert_eq!(core.approvals.global_count(), 0);
    }
}
