//! Service registry
//!
//! The single source of truth for services, their providers and their
//! subscribers.
//!
//! # Locking
//!
//! - The service map sits behind one `RwLock`. Adding or removing a service
//!   takes it for writing, only for the map edit.
//! - Every per-service operation holds the map for reading and the
//!   service's own `Mutex`, so traffic on different services never contends.
//! - Cluster membership has its own lock inside [`ClusterIndex`]; when both
//!   are needed the map lock is always taken first.
//!
//! The sweeper and the snapshot writer go through the same locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ConcordErrorTrait, ErrorKind};
use crate::metrics;

use super::clock::Clock;
use super::cluster::{ClusterIndex, ClusterInfo, ClusterMap};
use super::router::Route;
use super::service::{
    generate_id, validate_service_id, Endpoint, Registration, Service, ServiceSpec, ServiceView,
    SERVICE_ID_LENGTH,
};

type ServiceMap = HashMap<String, Mutex<Service>>;

// ============================================================================
// Errors
// ============================================================================

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service already exists: {0}")]
    ServiceExists(String),

    #[error("Invalid service id: '{0}'")]
    InvalidServiceId(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Endpoint {endpoint} already registered for service {service_id}")]
    AlreadyRegistered { service_id: String, endpoint: String },

    #[error("Endpoint {endpoint} is not registered for service {service_id}")]
    EndpointNotFound { service_id: String, endpoint: String },

    #[error("Subscription not found for service {service_id}")]
    SubscriptionNotFound { service_id: String },

    #[error("Token is not subscribed to service {service_id}")]
    Unauthorized { service_id: String },

    #[error("No live provider for service {service_id}")]
    Unavailable { service_id: String },

    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("Service {service_id} already belongs to cluster {cluster_id}")]
    ClusterConflict { service_id: String, cluster_id: String },
}

impl ConcordErrorTrait for RegistryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ServiceNotFound(_)
            | Self::EndpointNotFound { .. }
            | Self::SubscriptionNotFound { .. }
            | Self::ClusterNotFound(_) => ErrorKind::NotFound,
            Self::ServiceExists(_)
            | Self::AlreadyRegistered { .. }
            | Self::ClusterConflict { .. } => ErrorKind::Conflict,
            Self::InvalidServiceId(_) | Self::InvalidEndpoint(_) => ErrorKind::InvalidArgument,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
        }
    }

    fn is_recoverable(&self) -> bool {
        // A provider may heartbeat again shortly.
        matches!(self, Self::Unavailable { .. })
    }
}

// ============================================================================
// Options / Reports
// ============================================================================

/// Liveness settings shared by routing and the sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Heartbeat age after which a provider is evicted
    pub expiry_interval: Duration,

    /// Idle age after which a subscription is dropped (never when `None`)
    pub subscription_idle_timeout: Option<Duration>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            expiry_interval: Duration::from_secs(90),
            subscription_idle_timeout: None,
        }
    }
}

/// Result of a cluster-wide heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHeartbeat {
    pub cluster_id: String,
    pub services: usize,
    pub endpoints: usize,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub services: usize,
    pub registrations: usize,
    pub subscriptions: usize,
    pub clusters: usize,
}

/// Anomalies dropped by [`ServiceRegistry::repair`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// `(service, endpoint)` heartbeat entries without a registration
    pub orphaned_heartbeats: Vec<(String, String)>,

    /// `(cluster, service)` references to unknown services
    pub orphaned_memberships: Vec<(String, String)>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_heartbeats.is_empty() && self.orphaned_memberships.is_empty()
    }
}

// ============================================================================
// Service Registry
// ============================================================================

/// Registry of services, providers, subscribers and clusters
pub struct ServiceRegistry {
    services: RwLock<ServiceMap>,
    clusters: ClusterIndex,
    clock: Arc<dyn Clock>,
    options: RegistryOptions,

    /// Last mutation (epoch millis)
    modified: AtomicI64,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new(clock: Arc<dyn Clock>, options: RegistryOptions) -> Self {
        let now = clock.now_millis();
        Self::from_parts(clock, options, Vec::new(), ClusterMap::new(), now)
    }

    /// Rebuild a registry from restored services and clusters.
    ///
    /// No validation happens here; follow up with [`ServiceRegistry::repair`].
    pub fn from_parts(
        clock: Arc<dyn Clock>,
        options: RegistryOptions,
        services: Vec<Service>,
        clusters: ClusterMap,
        modified: i64,
    ) -> Self {
        let services = services
            .into_iter()
            .map(|s| (s.id.clone(), Mutex::new(s)))
            .collect();

        Self {
            services: RwLock::new(services),
            clusters: ClusterIndex::from_map(clusters),
            clock,
            options,
            modified: AtomicI64::new(modified),
        }
    }

    pub fn options(&self) -> RegistryOptions {
        self.options
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Time of the last mutation (epoch millis)
    pub fn modified_at(&self) -> i64 {
        self.modified.load(Ordering::SeqCst)
    }

    /// Record a mutation at the current time
    pub(crate) fn touch(&self) {
        self.modified.fetch_max(self.now(), Ordering::SeqCst);
    }

    /// Run `f` on one service under its lock
    async fn with_service<T>(
        &self,
        service_id: &str,
        f: impl FnOnce(&mut Service) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let services = self.services.read().await;
        let handle = services
            .get(service_id)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.to_string()))?;

        let mut service = handle.lock().await;
        f(&mut service)
    }

    /// Run `f` on a service, creating it first when absent.
    ///
    /// A service created here is removed again if `f` fails, so a rejected
    /// call leaves the map as it found it.
    async fn with_service_creating<T>(
        &self,
        service_id: &str,
        f: impl FnOnce(&mut Service) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        validate_service_id(service_id)?;

        {
            let services = self.services.read().await;
            if let Some(handle) = services.get(service_id) {
                let mut service = handle.lock().await;
                return f(&mut service);
            }
        }

        let mut services = self.services.write().await;
        let created = !services.contains_key(service_id);
        let now = self.now();
        let handle = services
            .entry(service_id.to_string())
            .or_insert_with(|| Mutex::new(Service::new(service_id, ServiceSpec::default(), now)));
        let result = f(handle.get_mut());

        if created {
            if result.is_err() {
                services.remove(service_id);
            } else {
                metrics::set_registered_services(services.len());
                self.touch();
                tracing::info!(service_id, "Service created");
            }
        }

        result
    }

    // ------------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------------

    /// Get a service, creating an empty one on first use
    pub async fn create_or_get_service(&self, service_id: &str) -> Result<ServiceView, RegistryError> {
        self.with_service_creating(service_id, |service| Ok(service.view()))
            .await
    }

    /// Create a service; generates an id when none is given
    pub async fn create_service(
        &self,
        service_id: Option<String>,
        spec: ServiceSpec,
    ) -> Result<ServiceView, RegistryError> {
        let mut services = self.services.write().await;

        let service_id = match service_id {
            Some(id) => {
                validate_service_id(&id)?;
                if services.contains_key(&id) {
                    return Err(RegistryError::ServiceExists(id));
                }
                id
            }
            None => loop {
                let candidate = generate_id(SERVICE_ID_LENGTH);
                if !services.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let service = Service::new(service_id.clone(), spec, self.now());
        let view = service.view();
        services.insert(service_id.clone(), Mutex::new(service));
        metrics::set_registered_services(services.len());
        self.touch();

        tracing::info!(service_id = %service_id, "Service created");
        Ok(view)
    }

    pub async fn get_service(&self, service_id: &str) -> Result<ServiceView, RegistryError> {
        self.with_service(service_id, |service| Ok(service.view()))
            .await
    }

    /// All services, ordered by id
    pub async fn list_services(&self) -> Vec<ServiceView> {
        let services = self.services.read().await;
        let mut views = Vec::with_capacity(services.len());

        for handle in services.values() {
            views.push(handle.lock().await.view());
        }

        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Replace every descriptive field of a service
    pub async fn replace_service(
        &self,
        service_id: &str,
        spec: ServiceSpec,
    ) -> Result<ServiceView, RegistryError> {
        let view = self
            .with_service(service_id, |service| {
                service.apply_spec(spec);
                Ok(service.view())
            })
            .await?;

        self.touch();
        tracing::debug!(service_id, "Service replaced");
        Ok(view)
    }

    /// Delete a service with its providers and subscriptions
    pub async fn delete_service(&self, service_id: &str) -> Result<ServiceView, RegistryError> {
        let mut services = self.services.write().await;

        let removed = services
            .remove(service_id)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.to_string()))?;
        self.clusters.remove_service(service_id).await;
        metrics::set_registered_services(services.len());
        drop(services);

        self.touch();
        tracing::info!(service_id, "Service deleted");
        Ok(removed.into_inner().view())
    }

    // ------------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------------

    /// Register a provider, creating the service on first use
    pub async fn register(
        &self,
        service_id: &str,
        endpoint: Endpoint,
    ) -> Result<Registration, RegistryError> {
        endpoint.validate()?;

        let now = self.now();
        let registration = self
            .with_service_creating(service_id, |service| service.register(endpoint, now))
            .await?;

        self.touch();
        metrics::record_registration();
        tracing::debug!(service_id, endpoint = %registration.endpoint, "Provider registered");
        Ok(registration)
    }

    /// Remove a provider
    pub async fn deregister(
        &self,
        service_id: &str,
        endpoint: &Endpoint,
    ) -> Result<Registration, RegistryError> {
        let key = endpoint.full();
        let registration = self
            .with_service(service_id, |service| service.deregister(&key))
            .await?;

        self.touch();
        tracing::debug!(service_id, endpoint = %key, "Provider deregistered");
        Ok(registration)
    }

    /// Refresh a provider's heartbeat
    pub async fn heartbeat(&self, service_id: &str, endpoint: &Endpoint) -> Result<(), RegistryError> {
        let now = self.now();
        let key = endpoint.full();
        let result = self
            .with_service(service_id, |service| service.heartbeat(&key, now))
            .await;

        match &result {
            Ok(()) => {
                self.touch();
                metrics::record_heartbeat(true);
            }
            Err(e) => {
                metrics::record_heartbeat(false);
                tracing::debug!(service_id, endpoint = %key, error = %e, "Heartbeat rejected");
            }
        }

        result
    }

    // ------------------------------------------------------------------------
    // Subscriptions / routing
    // ------------------------------------------------------------------------

    /// Subscribe to a service; returns the generated token
    pub async fn subscribe(&self, service_id: &str) -> Result<String, RegistryError> {
        let now = self.now();
        let token = self
            .with_service(service_id, |service| Ok(service.subscribe(now)))
            .await?;

        self.touch();
        tracing::debug!(service_id, "Subscription created");
        Ok(token)
    }

    pub async fn unsubscribe(&self, service_id: &str, token: &str) -> Result<(), RegistryError> {
        self.with_service(service_id, |service| service.unsubscribe(token))
            .await?;

        self.touch();
        tracing::debug!(service_id, "Subscription removed");
        Ok(())
    }

    /// Pick a live provider for a subscriber's query
    pub async fn route(&self, service_id: &str, token: &str) -> Result<Route, RegistryError> {
        let now = self.now();
        let expiry = self.options.expiry_interval;
        let result = self
            .with_service(service_id, |service| service.route(token, now, expiry))
            .await;

        metrics::record_route(match &result {
            Ok(_) => "routed",
            Err(e) => e.kind().as_str(),
        });

        result
    }

    // ------------------------------------------------------------------------
    // Clusters
    // ------------------------------------------------------------------------

    /// Add existing services to a cluster
    pub async fn add_to_cluster(
        &self,
        cluster_id: &str,
        service_ids: &[String],
    ) -> Result<ClusterInfo, RegistryError> {
        let services = self.services.read().await;

        if let Some(missing) = service_ids.iter().find(|id| !services.contains_key(id.as_str())) {
            return Err(RegistryError::ServiceNotFound(missing.clone()));
        }

        let info = self.clusters.add(cluster_id, service_ids).await?;
        drop(services);

        self.touch();
        tracing::debug!(cluster_id, services = service_ids.len(), "Cluster membership updated");
        Ok(info)
    }

    /// Services belonging to a cluster
    pub async fn cluster_services(&self, cluster_id: &str) -> Result<Vec<ServiceView>, RegistryError> {
        let services = self.services.read().await;
        let members = self.clusters.members(cluster_id).await?;

        let mut views = Vec::with_capacity(members.len());
        for service_id in &members {
            if let Some(handle) = services.get(service_id) {
                views.push(handle.lock().await.view());
            }
        }

        Ok(views)
    }

    pub async fn list_clusters(&self) -> Vec<ClusterInfo> {
        self.clusters.list().await
    }

    pub async fn cluster_of(&self, service_id: &str) -> Option<String> {
        self.clusters.cluster_of(service_id).await
    }

    /// Refresh the heartbeat of every provider of every member service
    pub async fn cluster_heartbeat(&self, cluster_id: &str) -> Result<ClusterHeartbeat, RegistryError> {
        let now = self.now();
        let services = self.services.read().await;
        let members = self.clusters.members(cluster_id).await?;

        let mut report = ClusterHeartbeat {
            cluster_id: cluster_id.to_string(),
            services: 0,
            endpoints: 0,
        };

        for service_id in &members {
            if let Some(handle) = services.get(service_id) {
                report.endpoints += handle.lock().await.heartbeat_all(now);
                report.services += 1;
            }
        }
        drop(services);

        self.touch();
        for _ in 0..report.endpoints {
            metrics::record_heartbeat(true);
        }
        tracing::debug!(
            cluster_id,
            services = report.services,
            endpoints = report.endpoints,
            "Cluster heartbeat"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Whole-registry passes
    // ------------------------------------------------------------------------

    /// Visit every service under its own lock
    pub(crate) async fn for_each_service<F>(&self, mut f: F)
    where
        F: FnMut(&mut Service),
    {
        let services = self.services.read().await;
        for handle in services.values() {
            let mut service = handle.lock().await;
            f(&mut service);
        }
    }

    /// Drop heartbeat entries without registrations and cluster references to
    /// unknown services, reporting each one.
    pub async fn repair(&self) -> RepairReport {
        let mut report = RepairReport::default();

        let services = self.services.read().await;
        for handle in services.values() {
            let mut service = handle.lock().await;
            for endpoint in service.repair() {
                tracing::warn!(
                    service_id = %service.id,
                    endpoint = %endpoint,
                    "Dropped heartbeat entry without registration"
                );
                report
                    .orphaned_heartbeats
                    .push((service.id.clone(), endpoint));
            }
        }

        let known: BTreeSet<String> = services.keys().cloned().collect();
        for (cluster_id, service_id) in self.clusters.retain_known(&known).await {
            tracing::warn!(
                cluster_id = %cluster_id,
                service_id = %service_id,
                "Dropped cluster reference to unknown service"
            );
            report.orphaned_memberships.push((cluster_id, service_id));
        }
        drop(services);

        if !report.is_clean() {
            self.touch();
        }
        report
    }

    /// Consistent copy of every service and the cluster table
    pub async fn export(&self) -> (Vec<Service>, ClusterMap) {
        let services = self.services.read().await;

        let mut copies = Vec::with_capacity(services.len());
        for handle in services.values() {
            copies.push(handle.lock().await.clone());
        }
        copies.sort_by(|a, b| a.id.cmp(&b.id));

        let clusters = self.clusters.snapshot().await;
        (copies, clusters)
    }

    pub async fn stats(&self) -> RegistryStats {
        let services = self.services.read().await;
        let mut stats = RegistryStats {
            services: services.len(),
            ..RegistryStats::default()
        };

        for handle in services.values() {
            let service = handle.lock().await;
            stats.registrations += service.registrations().len();
            stats.subscriptions += service.subscriptions().len();
        }
        drop(services);

        stats.clusters = self.clusters.len().await;
        stats
    }
}

// ============================================================================
// Tests
// ============================================================================
