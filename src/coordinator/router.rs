//! Query routing
//!
//! Picks one live provider for a subscriber's query. Eligibility (valid
//! token, fresh heartbeat) is decided by the service entity; this module only
//! owns the selection policies.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::service::Endpoint;

/// How a service spreads queries across its live providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Rotate through live providers in registration order
    RoundRobin,

    /// Pin each subscription token to one provider while the live set is stable
    TokenHash,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl RoutingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::TokenHash => "token_hash",
        }
    }

    /// Choose an index into `candidates` live providers.
    ///
    /// `cursor` is the service's round-robin position; it only moves for
    /// [`RoutingPolicy::RoundRobin`]. Returns `None` when there is nothing to
    /// choose from.
    pub fn select(&self, candidates: usize, cursor: &mut u64, token: &str) -> Option<usize> {
        if candidates == 0 {
            return None;
        }

        let index = match self {
            Self::RoundRobin => {
                let index = (*cursor % candidates as u64) as usize;
                *cursor = cursor.wrapping_add(1);
                index
            }
            Self::TokenHash => (token_hash(token) % candidates as u64) as usize,
        };

        Some(index)
    }
}

/// Stable 64-bit hash of a subscription token
fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Outcome of a routed query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub service_id: String,
    pub endpoint: Endpoint,
    pub policy: RoutingPolicy,

    /// Number of live providers the choice was made from
    pub candidates: usize,
}

impl Route {
    /// `host:port` of the selected provider
    pub fn address(&self) -> String {
        self.endpoint.full()
    }
}
