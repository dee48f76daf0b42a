//! Cluster index
//!
//! Maps a cluster id to the set of services managed together. A service
//! belongs to at most one cluster. The index has its own lock and never
//! touches service entities; callers that need existence checks take the
//! registry's map lock first.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::registry::RegistryError;

/// Cluster id -> member service ids
pub type ClusterMap = BTreeMap<String, BTreeSet<String>>;

/// A cluster and its members, as listed to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub id: String,
    pub services: Vec<String>,
}

/// Membership table for clusters
#[derive(Debug, Default)]
pub struct ClusterIndex {
    clusters: RwLock<ClusterMap>,
}

impl ClusterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(clusters: ClusterMap) -> Self {
        Self {
            clusters: RwLock::new(clusters),
        }
    }

    /// Add services to a cluster, creating the cluster on first use.
    ///
    /// Fails without changing anything if any service already sits in a
    /// different cluster.
    pub async fn add(&self, cluster_id: &str, service_ids: &[String]) -> Result<ClusterInfo, RegistryError> {
        let mut clusters = self.clusters.write().await;

        for service_id in service_ids {
            if let Some((other, _)) = clusters
                .iter()
                .find(|(id, members)| id.as_str() != cluster_id && members.contains(service_id))
            {
                return Err(RegistryError::ClusterConflict {
                    service_id: service_id.clone(),
                    cluster_id: other.clone(),
                });
            }
        }

        let members = clusters.entry(cluster_id.to_string()).or_default();
        members.extend(service_ids.iter().cloned());

        Ok(ClusterInfo {
            id: cluster_id.to_string(),
            services: members.iter().cloned().collect(),
        })
    }

    /// Member service ids of a cluster
    pub async fn members(&self, cluster_id: &str) -> Result<Vec<String>, RegistryError> {
        self.clusters
            .read()
            .await
            .get(cluster_id)
            .map(|members| members.iter().cloned().collect())
            .ok_or_else(|| RegistryError::ClusterNotFound(cluster_id.to_string()))
    }

    /// Cluster a service belongs to, if any
    pub async fn cluster_of(&self, service_id: &str) -> Option<String> {
        self.clusters
            .read()
            .await
            .iter()
            .find(|(_, members)| members.contains(service_id))
            .map(|(id, _)| id.clone())
    }

    /// Drop a service from whichever cluster holds it
    pub async fn remove_service(&self, service_id: &str) -> bool {
        let mut clusters = self.clusters.write().await;
        clusters
            .values_mut()
            .fold(false, |removed, members| members.remove(service_id) || removed)
    }

    /// Drop references to services not in `known`; returns the dropped
    /// `(cluster, service)` pairs
    pub async fn retain_known(&self, known: &BTreeSet<String>) -> Vec<(String, String)> {
        let mut clusters = self.clusters.write().await;
        let mut dropped = Vec::new();

        for (cluster_id, members) in clusters.iter_mut() {
            members.retain(|service_id| {
                let keep = known.contains(service_id);
                if !keep {
                    dropped.push((cluster_id.clone(), service_id.clone()));
                }
                keep
            });
        }

        dropped
    }

    pub async fn list(&self) -> Vec<ClusterInfo> {
        self.clusters
            .read()
            .await
            .iter()
            .map(|(id, members)| ClusterInfo {
                id: id.clone(),
                services: members.iter().cloned().collect(),
            })
            .collect()
    }

    /// Copy of the whole table, for snapshots
    pub async fn snapshot(&self) -> ClusterMap {
        self.clusters.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.clusters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clusters.read().await.is_empty()
    }
}
