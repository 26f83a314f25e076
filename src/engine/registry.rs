use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_text;
use super::{Engine, EngineError};

impl Engine {
    /// Register a room (capacity = seats), teacher or group (capacity =
    /// head-count). `None` capacity means unbounded.
    pub async fn register_resource(
        &self,
        key: ResourceKey,
        name: Option<String>,
        capacity: Option<u32>,
    ) -> Result<(), EngineError> {
        validate_text(name.as_deref(), MAX_NAME_LEN, "resource name too long")?;
        let _registry = self.registry_lock.lock().await;
        if self.resources.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.resources.contains_key(&key) {
            return Err(EngineError::AlreadyExists(key));
        }

        let mut locks = self.lock_keys([]).await?;
        let event = Event::ResourceRegistered {
            key,
            name,
            capacity,
        };
        self.persist_and_apply(&event, &mut locks).await?;
        debug!("registered {key}");
        Ok(())
    }

    pub async fn update_resource(
        &self,
        key: ResourceKey,
        name: Option<String>,
        capacity: Option<u32>,
    ) -> Result<(), EngineError> {
        validate_text(name.as_deref(), MAX_NAME_LEN, "resource name too long")?;
        let mut locks = self.lock_keys([key]).await?;
        let event = Event::ResourceUpdated {
            key,
            name,
            capacity,
        };
        self.persist_and_apply(&event, &mut locks).await
    }

    /// Remove a resource that no scheduled booking uses anymore. Cancelled and
    /// superseded bookings keep pointing at it for history.
    pub async fn retire_resource(&self, key: ResourceKey) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let mut locks = self.lock_keys([key]).await?;
        if locks.get(&key).is_some_and(|rs| !rs.entries.is_empty()) {
            return Err(EngineError::InUse(key));
        }

        self.persist_and_apply(&Event::ResourceRetired { key }, &mut locks)
            .await?;
        info!("retired {key}");
        Ok(())
    }

    pub fn exists(&self, kind: ResourceKind, id: i64) -> bool {
        self.resources.contains_key(&ResourceKey::new(kind, id))
    }

    /// Seats in a room. Rooms registered without a capacity are unlimited.
    pub async fn capacity(&self, room_id: i64) -> Result<u32, EngineError> {
        let key = ResourceKey::room(room_id);
        let guards = self.read_keys([key]).await?;
        Ok(guards
            .first()
            .and_then(|rs| rs.capacity)
            .unwrap_or(u32::MAX))
    }

    pub async fn resource(&self, key: ResourceKey) -> Result<ResourceInfo, EngineError> {
        let guards = self.read_keys([key]).await?;
        let rs = guards.first().ok_or(EngineError::UnknownResource(key))?;
        Ok(ResourceInfo {
            key: rs.key,
            name: rs.name.clone(),
            capacity: rs.capacity,
            scheduled: rs.entries.len(),
        })
    }

    /// Registered resources, optionally of one kind, in key order.
    pub async fn list_resources(&self, kind: Option<ResourceKind>) -> Vec<ResourceInfo> {
        let handles: Vec<_> = self
            .resources
            .iter()
            .filter(|e| kind.is_none_or(|k| e.key().kind == k))
            .map(|e| e.value().clone())
            .collect();

        let mut infos = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            infos.push(ResourceInfo {
                key: guard.key,
                name: guard.name.clone(),
                capacity: guard.capacity,
                scheduled: guard.entries.len(),
            });
        }
        infos.sort_by_key(|info| info.key);
        infos
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
