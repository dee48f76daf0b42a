//! Service entity
//!
//! A service owns its provider registrations, the heartbeat table keyed by
//! full endpoint (`host:port`), and its subscriptions. The registration list
//! and the heartbeat table are kept in lockstep: every mutation here touches
//! both or neither.
//!
//! Methods on [`Service`] are synchronous and assume the caller holds the
//! service's lock (see [`super::registry::ServiceRegistry`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::clock::duration_millis;
use super::registry::RegistryError;
use super::router::{Route, RoutingPolicy};

/// Length of generated subscription tokens
pub const TOKEN_LENGTH: usize = 10;

/// Length of generated service ids
pub const SERVICE_ID_LENGTH: usize = 15;

/// Random alphanumeric string used for tokens and generated service ids
pub(crate) fn generate_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

static SERVICE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,64}$").expect("valid service id pattern"));

/// Check a client-supplied service id
pub fn validate_service_id(id: &str) -> Result<(), RegistryError> {
    if SERVICE_ID_REGEX.is_match(id) {
        Ok(())
    } else {
        Err(RegistryError::InvalidServiceId(id.to_string()))
    }
}

// ============================================================================
// Endpoint / Registration / Subscription
// ============================================================================

/// Network address of a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Identity string used as the heartbeat key and for deregistration
    pub fn full(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn validate(&self) -> Result<(), RegistryError> {
        if self.host.trim().is_empty() || self.host.contains(char::is_whitespace) {
            return Err(RegistryError::InvalidEndpoint(format!(
                "invalid host '{}'",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(RegistryError::InvalidEndpoint(format!(
                "port 0 is not routable for host '{}'",
                self.host
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A provider's membership in a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(flatten)]
    pub endpoint: Endpoint,

    /// When the provider registered (epoch millis)
    pub registered_at: i64,
}

impl Registration {
    pub fn full_endpoint(&self) -> String {
        self.endpoint.full()
    }
}

/// Subscriber bookkeeping kept against a token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub created_at: i64,
    pub last_used_at: i64,
}

// ============================================================================
// Service Spec
// ============================================================================

/// Descriptive fields of a service, replaced wholesale by `replace`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: Option<String>,

    /// Services this one calls
    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub routing: RoutingPolicy,
}

impl ServiceSpec {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }
}

// ============================================================================
// Service
// ============================================================================

/// One logical service with its providers, heartbeats and subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,

    #[serde(flatten)]
    pub spec: ServiceSpec,

    pub created_at: i64,

    #[serde(default)]
    registrations: Vec<Registration>,

    /// Full endpoint -> last heartbeat (epoch millis)
    #[serde(default)]
    heartbeats: BTreeMap<String, i64>,

    /// Token -> subscriber
    #[serde(default)]
    subscriptions: BTreeMap<String, Subscription>,

    #[serde(skip)]
    route_cursor: u64,
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.spec == other.spec
            && self.created_at == other.created_at
            && self.registrations == other.registrations
            && self.heartbeats == other.heartbeats
            && self.subscriptions == other.subscriptions
    }
}

impl Service {
    pub fn new(id: impl Into<String>, spec: ServiceSpec, now: i64) -> Self {
        Self {
            id: id.into(),
            spec,
            created_at: now,
            registrations: Vec::new(),
            heartbeats: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            route_cursor: 0,
        }
    }

    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }

    pub fn heartbeats(&self) -> &BTreeMap<String, i64> {
        &self.heartbeats
    }

    pub fn subscriptions(&self) -> &BTreeMap<String, Subscription> {
        &self.subscriptions
    }

    pub fn last_heartbeat(&self, endpoint: &str) -> Option<i64> {
        self.heartbeats.get(endpoint).copied()
    }

    pub fn is_registered(&self, endpoint: &str) -> bool {
        self.registrations
            .iter()
            .any(|r| r.full_endpoint() == endpoint)
    }

    /// Overwrite every descriptive field
    pub fn apply_spec(&mut self, spec: ServiceSpec) {
        self.spec = spec;
    }

    /// Add a provider and stamp its first heartbeat.
    ///
    /// Re-registering a live endpoint is rejected; providers refresh through
    /// [`Service::heartbeat`].
    pub fn register(&mut self, endpoint: Endpoint, now: i64) -> Result<Registration, RegistryError> {
        endpoint.validate()?;

        let key = endpoint.full();
        if self.is_registered(&key) {
            return Err(RegistryError::AlreadyRegistered {
                service_id: self.id.clone(),
                endpoint: key,
            });
        }

        let registration = Registration {
            endpoint,
            registered_at: now,
        };
        self.registrations.push(registration.clone());
        self.heartbeats.insert(key, now);

        Ok(registration)
    }

    /// Remove a provider together with its heartbeat entry
    pub fn deregister(&mut self, endpoint: &str) -> Result<Registration, RegistryError> {
        // A stray heartbeat must not outlive the registration either way.
        self.heartbeats.remove(endpoint);

        let position = self
            .registrations
            .iter()
            .position(|r| r.full_endpoint() == endpoint)
            .ok_or_else(|| RegistryError::EndpointNotFound {
                service_id: self.id.clone(),
                endpoint: endpoint.to_string(),
            })?;

        Ok(self.registrations.remove(position))
    }

    /// Refresh a registered provider's heartbeat
    pub fn heartbeat(&mut self, endpoint: &str, now: i64) -> Result<(), RegistryError> {
        if !self.is_registered(endpoint) {
            return Err(RegistryError::EndpointNotFound {
                service_id: self.id.clone(),
                endpoint: endpoint.to_string(),
            });
        }

        self.heartbeats.insert(endpoint.to_string(), now);
        Ok(())
    }

    /// Refresh every registered provider; returns how many were refreshed
    pub fn heartbeat_all(&mut self, now: i64) -> usize {
        for registration in &self.registrations {
            self.heartbeats.insert(registration.full_endpoint(), now);
        }
        self.registrations.len()
    }

    /// Whether a provider's heartbeat is within the expiry interval
    pub fn is_live(&self, endpoint: &str, now: i64, expiry: Duration) -> bool {
        match self.heartbeats.get(endpoint) {
            Some(last) => now.saturating_sub(*last) <= duration_millis(expiry),
            None => false,
        }
    }

    /// Providers the next sweep would evict
    pub fn expired_endpoints(&self, now: i64, expiry: Duration) -> Vec<String> {
        self.registrations
            .iter()
            .map(Registration::full_endpoint)
            .filter(|key| !self.is_live(key, now, expiry))
            .collect()
    }

    /// Evict stale providers through the regular deregister path
    pub fn evict_expired(&mut self, now: i64, expiry: Duration) -> Vec<Registration> {
        self.expired_endpoints(now, expiry)
            .into_iter()
            .filter_map(|key| self.deregister(&key).ok())
            .collect()
    }

    /// Drop heartbeat entries that have no registration behind them.
    ///
    /// Returns the dropped endpoint keys so the caller can report them.
    pub fn repair(&mut self) -> Vec<String> {
        let orphaned: Vec<String> = self
            .heartbeats
            .keys()
            .filter(|key| !self.is_registered(key))
            .cloned()
            .collect();

        for key in &orphaned {
            self.heartbeats.remove(key);
        }

        orphaned
    }

    /// Record a new subscriber and hand back its token
    pub fn subscribe(&mut self, now: i64) -> String {
        let token = loop {
            let candidate = generate_id(TOKEN_LENGTH);
            if !self.subscriptions.contains_key(&candidate) {
                break candidate;
            }
        };

        self.subscriptions.insert(
            token.clone(),
            Subscription {
                created_at: now,
                last_used_at: now,
            },
        );
        token
    }

    pub fn unsubscribe(&mut self, token: &str) -> Result<Subscription, RegistryError> {
        self.subscriptions
            .remove(token)
            .ok_or_else(|| RegistryError::SubscriptionNotFound {
                service_id: self.id.clone(),
            })
    }

    /// Drop subscriptions unused for longer than `idle`
    pub fn evict_idle_subscriptions(&mut self, now: i64, idle: Duration) -> usize {
        let limit = duration_millis(idle);
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|_, s| now.saturating_sub(s.last_used_at) <= limit);
        before - self.subscriptions.len()
    }

    /// Select a live provider for `token`.
    ///
    /// Providers past expiry are skipped even if no sweep has removed them
    /// yet.
    pub fn route(&mut self, token: &str, now: i64, expiry: Duration) -> Result<Route, RegistryError> {
        let subscription = self
            .subscriptions
            .get_mut(token)
            .ok_or_else(|| RegistryError::Unauthorized {
                service_id: self.id.clone(),
            })?;
        subscription.last_used_at = now;

        let live: Vec<&Registration> = self
            .registrations
            .iter()
            .filter(|r| {
                self.heartbeats
                    .get(&r.full_endpoint())
                    .is_some_and(|last| now.saturating_sub(*last) <= duration_millis(expiry))
            })
            .collect();

        let policy = self.spec.routing;
        let index = policy
            .select(live.len(), &mut self.route_cursor, token)
            .ok_or_else(|| RegistryError::Unavailable {
                service_id: self.id.clone(),
            })?;

        Ok(Route {
            service_id: self.id.clone(),
            endpoint: live[index].endpoint.clone(),
            policy,
            candidates: live.len(),
        })
    }

    /// Client-facing projection; never exposes subscription tokens
    pub fn view(&self) -> ServiceView {
        ServiceView {
            id: self.id.clone(),
            spec: self.spec.clone(),
            created_at: self.created_at,
            providers: self
                .registrations
                .iter()
                .map(|r| ProviderView {
                    endpoint: r.endpoint.clone(),
                    registered_at: r.registered_at,
                    last_heartbeat: self.last_heartbeat(&r.full_endpoint()),
                })
                .collect(),
            subscriber_count: self.subscriptions.len(),
        }
    }
}

/// Provider as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderView {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub registered_at: i64,
    pub last_heartbeat: Option<i64>,
}

/// Service as shown to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceView {
    pub id: String,
    #[serde(flatten)]
    pub spec: ServiceSpec,
    pub created_at: i64,
    pub providers: Vec<ProviderView>,
    pub subscriber_count: usize,
}

// ============================================================================
// Tests
// ============================================================================
