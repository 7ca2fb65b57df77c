//! Optional distributed-broker relay probe.
//!
//! The bus can be constructed with a probe for an external broker. The
//! probe is consulted once at `start()`; whether it succeeds or not, all
//! dispatch stays in-process, so publishers and subscribers observe
//! identical behavior either way. An unreachable broker only downgrades
//! the reported backend state.

use async_trait::async_trait;

/// Reachability probe for an external broker backend.
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    /// Backend name reported through bus metrics, e.g. "redis".
    fn name(&self) -> &str;

    /// Returns true when the broker answered within the probe's own
    /// deadline. Must never panic; any transport failure is `false`.
    async fn probe(&self) -> bool;
}

/// Probe that always fails. Useful for exercising the degradation path.
#[derive(Debug, Default)]
pub struct UnreachableBroker {
    name: String,
}

impl UnreachableBroker {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl BrokerProbe for UnreachableBroker {
    fn name(&self) -> &str {
        if self.name.is_empty() {
            "unreachable"
        } else {
            &self.name
        }
    }

    async fn probe(&self) -> bool {
        false
    }
}
