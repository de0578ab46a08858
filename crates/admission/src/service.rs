//! Rate admission service
//!
//! Turns a caller into a window key, applies a policy's limit through the
//! [`WindowStore`] and reports the outcome. Keys are prefixed with the policy
//! name so two policies never share a budget for the same caller.

use crate::preset::{Preset, PresetTable};
use crate::window::{Admission, RateLimit, WindowStore};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// What the service knows about the caller of an operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerContext {
    /// Remote address, if known
    pub addr: Option<String>,
    /// Authenticated user, if any
    pub user_id: Option<String>,
}

impl CallerContext {
    /// Anonymous caller from `addr`
    pub fn from_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: Some(addr.into()),
            user_id: None,
        }
    }

    /// Attach an authenticated user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// `ip:<addr>`, or `ip:unknown`
    pub fn ip_key(&self) -> String {
        format!("ip:{}", self.addr.as_deref().unwrap_or("unknown"))
    }

    /// `user:<id>`, falling back to [`ip_key`](Self::ip_key) for anonymous callers
    pub fn user_key(&self) -> String {
        match &self.user_id {
            Some(id) => format!("user:{id}"),
            None => self.ip_key(),
        }
    }
}

type KeyFn = Box<dyn Fn(&CallerContext) -> String + Send + Sync>;
type BypassFn = Box<dyn Fn(&CallerContext) -> bool + Send + Sync>;

/// A named limit with key derivation and an optional bypass
pub struct AdmissionPolicy {
    name: String,
    limit: RateLimit,
    key_fn: Option<KeyFn>,
    bypass: Option<BypassFn>,
}

impl AdmissionPolicy {
    /// Policy keyed by caller address
    pub fn new(name: impl Into<String>, limit: RateLimit) -> Self {
        Self {
            name: name.into(),
            limit,
            key_fn: None,
            bypass: None,
        }
    }

    /// Derive keys with `f` instead of the caller address
    pub fn with_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallerContext) -> String + Send + Sync + 'static,
    {
        self.key_fn = Some(Box::new(f));
        self
    }

    /// Key by authenticated user, falling back to address
    pub fn per_user(self) -> Self {
        self.with_key_fn(CallerContext::user_key)
    }

    /// Skip limiting entirely for callers matching `f`
    pub fn with_bypass<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallerContext) -> bool + Send + Sync + 'static,
    {
        self.bypass = Some(Box::new(f));
        self
    }

    /// Policy name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured limit
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Namespaced window key for `caller`
    pub fn key_for(&self, caller: &CallerContext) -> String {
        let raw = match &self.key_fn {
            Some(f) => f(caller),
            None => caller.ip_key(),
        };
        format!("{}:{}", self.name, raw)
    }

    fn bypasses(&self, caller: &CallerContext) -> bool {
        self.bypass.as_ref().is_some_and(|f| f(caller))
    }
}

impl fmt::Debug for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionPolicy")
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("custom_key", &self.key_fn.is_some())
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}

/// Admits or rejects operations per caller
pub struct RateAdmissionService {
    store: Arc<WindowStore>,
    presets: PresetTable,
}

impl RateAdmissionService {
    /// Service over `store` with default presets
    pub fn new(store: Arc<WindowStore>) -> Self {
        Self {
            store,
            presets: PresetTable::default(),
        }
    }

    /// Replace the preset table
    pub fn with_presets(mut self, presets: PresetTable) -> Self {
        self.presets = presets;
        self
    }

    /// The backing store
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }

    /// The effective presets
    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    /// Policy for a preset, keyed by caller address and namespaced by preset name
    pub fn policy(&self, preset: Preset) -> AdmissionPolicy {
        AdmissionPolicy::new(preset.name(), self.presets.get(preset))
    }

    /// Decide one operation for `caller` under `policy`
    ///
    /// Bypassed callers never touch the store and see the full limit as
    /// remaining.
    pub fn check(&self, policy: &AdmissionPolicy, caller: &CallerContext) -> Admission {
        if policy.bypasses(caller) {
            trace!(target: "courier::admission", policy = %policy.name, "Bypassed");
            return Admission::unrestricted(policy.limit, self.store.now());
        }
        let key = policy.key_for(caller);
        self.check_key(&key, policy.limit)
    }

    /// Decide one operation for `caller` under a preset with default keying
    pub fn check_preset(&self, preset: Preset, caller: &CallerContext) -> Admission {
        self.check(&self.policy(preset), caller)
    }

    /// Decide one operation for an explicit key
    pub fn check_key(&self, key: &str, limit: RateLimit) -> Admission {
        let admission = self.store.check(key, limit);
        if admission.success {
            trace!(target: "courier::admission", key, remaining = admission.remaining, "Admitted");
        } else {
            warn!(
                target: "courier::admission",
                key,
                limit = admission.limit,
                retry_after_secs = admission.retry_after_secs().unwrap_or(0),
                "Rate limit exceeded"
            );
        }
        admission
    }
}
