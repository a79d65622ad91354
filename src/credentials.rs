//! Rotating per-provider credentials with daily quotas.
//!
//! The pool is the only owner of credential state. Workers [`acquire`] a
//! lease before a provider call and [`release`] it afterwards; both take the
//! pool lock, so quota accounting is atomic across workers. A lease reserves
//! one unit of quota while in flight, which keeps concurrent workers from
//! jointly overshooting a credential's daily limit.
//!
//! [`acquire`]: CredentialPool::acquire
//! [`release`]: CredentialPool::release

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use imagefetch_common::{Error, ProviderKind, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::period_start;
use crate::config::CredentialConfig;

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

/// Resolves configured credential references to key material.
pub trait CredentialStore: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String>;
}

/// Reads `env:NAME` references from the process environment and passes
/// everything else through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn resolve(&self, reference: &str) -> Result<String> {
        match reference.strip_prefix("env:") {
            Some(name) => std::env::var(name).map_err(|_| {
                Error::configuration(format!("environment variable {} is not set", name))
            }),
            None => Ok(reference.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Decrypted credential material. Never logged; use `id` to refer to it.
#[derive(Clone)]
pub struct Credential {
    pub id: String,
    pub key: String,
    pub secret: Option<String>,
    pub tag: Option<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("id", &self.id).finish_non_exhaustive()
    }
}

impl From<&CredentialConfig> for Credential {
    fn from(cfg: &CredentialConfig) -> Self {
        Self {
            id: cfg.id.clone(),
            key: cfg.key.clone(),
            secret: cfg.secret.clone(),
            tag: cfg.tag.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Active,
    /// Quota reached or provider answered 429. Clears at the next reset.
    Exhausted,
    /// Provider rejected the credential. Requires reconfiguration.
    Disabled,
}

/// Why no credential could be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoneAvailable {
    /// Every usable credential has hit its quota for this period.
    QuotaExhausted,
    /// Every credential is disabled.
    AllDisabled,
    /// The provider has no credentials registered.
    NoCredentials,
}

/// How a leased credential's call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Success,
    Failure,
    AuthFailure,
    QuotaExceeded,
}

/// A credential handed out for exactly one provider call.
///
/// Must be returned with [`CredentialPool::release`] (the call happened) or
/// [`CredentialPool::cancel`] (it did not).
#[must_use]
#[derive(Debug)]
pub struct CredentialLease {
    provider: ProviderKind,
    index: usize,
    credential: Arc<Credential>,
}

impl CredentialLease {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }
}

struct Slot {
    credential: Arc<Credential>,
    daily_quota: u32,
    state: CredentialState,
    used: u32,
    in_flight: u32,
    last_used: Option<DateTime<Utc>>,
    period: DateTime<Utc>,
}

impl Slot {
    /// Clear counters and exhaustion when a new quota period has begun.
    fn roll_period(&mut self, current: DateTime<Utc>) {
        if current > self.period {
            self.period = current;
            self.used = 0;
            if self.state == CredentialState::Exhausted {
                self.state = CredentialState::Active;
            }
        }
    }

    fn has_headroom(&self) -> bool {
        self.state == CredentialState::Active && self.used + self.in_flight < self.daily_quota
    }
}

/// Snapshot of one credential, for status output and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialUsage {
    pub id: String,
    pub state: CredentialState,
    pub used: u32,
    pub daily_quota: u32,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

pub struct CredentialPool {
    slots: Mutex<HashMap<ProviderKind, Vec<Slot>>>,
    reset_hour: u32,
}

impl CredentialPool {
    pub fn new(reset_hour: u32) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            reset_hour,
        }
    }

    /// Register a credential for a provider. Registration order breaks
    /// least-recently-used ties.
    pub fn add(
        &self,
        provider: ProviderKind,
        credential: Credential,
        daily_quota: u32,
        now: DateTime<Utc>,
    ) {
        let slot = Slot {
            credential: Arc::new(credential),
            daily_quota,
            state: CredentialState::Active,
            used: 0,
            in_flight: 0,
            last_used: None,
            period: period_start(now, self.reset_hour),
        };
        self.slots.lock().entry(provider).or_default().push(slot);
    }

    /// Hand out the least-recently-used active credential with quota left.
    pub fn acquire(
        &self,
        provider: ProviderKind,
        now: DateTime<Utc>,
    ) -> std::result::Result<CredentialLease, NoneAvailable> {
        let current = period_start(now, self.reset_hour);
        let mut slots = self.slots.lock();
        let slots = match slots.get_mut(&provider) {
            Some(slots) if !slots.is_empty() => slots,
            _ => return Err(NoneAvailable::NoCredentials),
        };

        for slot in slots.iter_mut() {
            slot.roll_period(current);
        }

        // `None` sorts before `Some`, so never-used credentials go first.
        let chosen = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.has_headroom())
            .min_by_key(|(i, s)| (s.last_used, *i))
            .map(|(i, _)| i);

        match chosen {
            Some(index) => {
                let slot = &mut slots[index];
                slot.in_flight += 1;
                slot.last_used = Some(now);
                debug!(
                    provider = %provider,
                    credential = %slot.credential.id,
                    used = slot.used,
                    quota = slot.daily_quota,
                    "Credential acquired"
                );
                Ok(CredentialLease {
                    provider,
                    index,
                    credential: Arc::clone(&slot.credential),
                })
            }
            None if slots.iter().all(|s| s.state == CredentialState::Disabled) => {
                Err(NoneAvailable::AllDisabled)
            }
            None => Err(NoneAvailable::QuotaExhausted),
        }
    }

    /// Record a completed call. Every call counts against quota, success or not.
    pub fn release(&self, lease: CredentialLease, usage: Usage) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots
            .get_mut(&lease.provider)
            .and_then(|s| s.get_mut(lease.index))
        else {
            return;
        };

        slot.in_flight = slot.in_flight.saturating_sub(1);
        slot.used = slot.used.saturating_add(1);

        match usage {
            Usage::AuthFailure => {
                warn!(
                    provider = %lease.provider,
                    credential = %slot.credential.id,
                    "Credential rejected by provider, disabling"
                );
                slot.state = CredentialState::Disabled;
            }
            Usage::QuotaExceeded => {
                warn!(
                    provider = %lease.provider,
                    credential = %slot.credential.id,
                    "Provider reported quota exceeded, marking exhausted"
                );
                if slot.state == CredentialState::Active {
                    slot.state = CredentialState::Exhausted;
                }
            }
            Usage::Success | Usage::Failure => {}
        }

        if slot.state == CredentialState::Active && slot.used >= slot.daily_quota {
            debug!(
                provider = %lease.provider,
                credential = %slot.credential.id,
                "Credential reached daily quota"
            );
            slot.state = CredentialState::Exhausted;
        }
    }

    /// Return a lease whose call never happened. Nothing is counted.
    pub fn cancel(&self, lease: CredentialLease) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots
            .get_mut(&lease.provider)
            .and_then(|s| s.get_mut(lease.index))
        {
            slot.in_flight = slot.in_flight.saturating_sub(1);
        }
    }

    /// Preload today's usage, e.g. from a previous process.
    pub fn set_used(&self, provider: ProviderKind, id: &str, used: u32) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots
            .get_mut(&provider)
            .and_then(|s| s.iter_mut().find(|s| s.credential.id == id))
        {
            slot.used = used;
            if slot.state == CredentialState::Active && used >= slot.daily_quota {
                slot.state = CredentialState::Exhausted;
            }
        }
    }

    pub fn usage(&self, provider: ProviderKind) -> Vec<CredentialUsage> {
        self.slots
            .lock()
            .get(&provider)
            .map(|slots| {
                slots
                    .iter()
                    .map(|s| CredentialUsage {
                        id: s.credential.id.clone(),
                        state: s.state,
                        used: s.used,
                        daily_quota: s.daily_quota,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
