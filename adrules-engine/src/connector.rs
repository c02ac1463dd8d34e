//! Seam between the engine and the advertising platform.

use std::collections::{HashMap, VecDeque};

use adrules_protocol::entity::{EntityStatus, EntityType, TimePreset};
use adrules_protocol::metrics::MetricsSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

/// Current delivery state of an entity. Budgets and bids are minor units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityState {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub status: EntityStatus,
    #[serde(default)]
    pub budget: Option<i64>,
    #[serde(default)]
    pub bid: Option<i64>,
}

/// Change requested on an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntityMutation {
    SetStatus(EntityStatus),
    SetBudget(i64),
    SetBid(i64),
}

/// Smallest budget and bid the platform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformLimits {
    pub min_budget: i64,
    pub min_bid: i64,
}

impl Default for PlatformLimits {
    fn default() -> Self {
        Self {
            min_budget: 1,
            min_bid: 1,
        }
    }
}

#[async_trait]
pub trait AdPlatformConnector: Send + Sync + 'static {
    /// Metrics for one entity. Unavailable fields are omitted, never zeroed.
    async fn fetch_snapshot(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        time_preset: TimePreset,
    ) -> Result<MetricsSnapshot, ConnectorError>;

    async fn entity_state(&self, entity_id: &str, entity_type: EntityType) -> Result<EntityState, ConnectorError>;

    async fn mutate_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        mutation: EntityMutation,
    ) -> Result<(), ConnectorError>;

    fn limits(&self) -> PlatformLimits;
}

#[derive(Default)]
struct SimulatedPlatform {
    entities: HashMap<String, EntityState>,
    snapshots: HashMap<String, MetricsSnapshot>,
    mutations: Vec<(String, EntityMutation)>,
    failures: VecDeque<ConnectorError>,
    locked: HashMap<String, String>,
}

/// Deterministic in-process platform used by tests and `serve --simulate`.
#[derive(Default)]
pub struct InMemoryConnector {
    limits: PlatformLimits,
    platform: RwLock<SimulatedPlatform>,
}

impl InMemoryConnector {
    pub fn new(limits: PlatformLimits) -> Self {
        Self {
            limits,
            platform: RwLock::default(),
        }
    }

    pub fn put_entity(&self, state: EntityState) {
        self.platform
            .write()
            .entities
            .insert(state.entity_id.clone(), state);
    }

    pub fn put_snapshot(&self, snapshot: MetricsSnapshot) {
        self.platform
            .write()
            .snapshots
            .insert(snapshot.entity_id.clone(), snapshot);
    }

    /// Makes the next connector calls fail with `error`, one call per entry.
    pub fn fail_next(&self, error: ConnectorError, times: usize) {
        let mut platform = self.platform.write();
        for _ in 0..times {
            platform.failures.push_back(error.clone());
        }
    }

    /// Makes every mutation of `entity_id` fail as rejected; reads still work.
    pub fn lock_entity(&self, entity_id: &str, reason: impl Into<String>) {
        self.platform
            .write()
            .locked
            .insert(entity_id.to_string(), reason.into());
    }

    pub fn entity(&self, entity_id: &str) -> Option<EntityState> {
        self.platform.read().entities.get(entity_id).cloned()
    }

    /// Every mutation applied so far, oldest first.
    pub fn mutations(&self) -> Vec<(String, EntityMutation)> {
        self.platform.read().mutations.clone()
    }

    fn take_failure(&self) -> Result<(), ConnectorError> {
        match self.platform.write().failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AdPlatformConnector for InMemoryConnector {
    async fn fetch_snapshot(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        time_preset: TimePreset,
    ) -> Result<MetricsSnapshot, ConnectorError> {
        self.take_failure()?;
        let platform = self.platform.read();
        let mut snapshot = platform
            .snapshots
            .get(entity_id)
            .cloned()
            .ok_or_else(|| ConnectorError::EntityNotFound(entity_id.to_string()))?;
        snapshot.entity_type = entity_type;
        snapshot.time_preset = time_preset;
        snapshot.captured_at = Utc::now();
        Ok(snapshot)
    }

    async fn entity_state(&self, entity_id: &str, _entity_type: EntityType) -> Result<EntityState, ConnectorError> {
        self.take_failure()?;
        self.entity(entity_id)
            .ok_or_else(|| ConnectorError::EntityNotFound(entity_id.to_string()))
    }

    async fn mutate_entity(
        &self,
        entity_id: &str,
        _entity_type: EntityType,
        mutation: EntityMutation,
    ) -> Result<(), ConnectorError> {
        self.take_failure()?;
        let mut platform = self.platform.write();
        if let Some(reason) = platform.locked.get(entity_id) {
            return Err(ConnectorError::Rejected(format!("{entity_id} is locked: {reason}")));
        }
        let state = platform
            .entities
            .get_mut(entity_id)
            .ok_or_else(|| ConnectorError::EntityNotFound(entity_id.to_string()))?;
        match mutation {
            EntityMutation::SetStatus(status) => state.status = status,
            EntityMutation::SetBudget(budget) if budget < self.limits.min_budget => {
                return Err(ConnectorError::Rejected(format!(
                    "budget {budget} below platform minimum {}",
                    self.limits.min_budget
                )));
            }
            EntityMutation::SetBudget(budget) => state.budget = Some(budget),
            EntityMutation::SetBid(bid) if bid < self.limits.min_bid => {
                return Err(ConnectorError::Rejected(format!(
                    "bid {bid} below platform minimum {}",
                    self.limits.min_bid
                )));
            }
            EntityMutation::SetBid(bid) => state.bid = Some(bid),
        }
        platform.mutations.push((entity_id.to_string(), mutation));
        Ok(())
    }

    fn limits(&self) -> PlatformLimits {
        self.limits
    }
}
