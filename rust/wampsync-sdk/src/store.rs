use crate::entity::{
    AggregatorRecord, AggregatorResponse, ChangeRecord, ChangeType, Entity, EntityRecord,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

const UPDATE_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Upsert,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreUpdate {
    pub raw_type: &'static str,
    pub id: String,
    pub operation: StoreOperation,
    /// Changed properties for `Patch`, as received.
    pub patch: Option<Value>,
}

/// Entities of one type, remembering first-insertion order.
#[derive(Default)]
struct TypeTable {
    entities: HashMap<String, EntityRecord>,
    order: Vec<String>,
}

impl TypeTable {
    fn insert(&mut self, record: EntityRecord) {
        let id = record.id().to_string();
        if !self.entities.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entities.insert(id, record);
    }

    fn remove(&mut self, id: &str) -> Option<EntityRecord> {
        let removed = self.entities.remove(id)?;
        self.order.retain(|k| k != id);
        Some(removed)
    }
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(target_value) => deep_merge(target_value, patch_value),
                    None => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => {
            *target = patch.clone();
        }
    }
}

/// Flat entities keyed by `(type, id)`.
///
/// The store is owned by whoever feeds it; consumers read built views
/// and can follow `updates()` to learn what changed.
pub struct EntityStore {
    tables: HashMap<&'static str, TypeTable>,
    updates_tx: broadcast::Sender<StoreUpdate>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            tables: HashMap::new(),
            updates_tx,
        }
    }

    pub fn updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates_tx.subscribe()
    }

    fn notify(&self, update: StoreUpdate) -> StoreUpdate {
        let _ = self.updates_tx.send(update.clone());
        update
    }

    /// Inserts or fully replaces an entity.
    pub fn upsert(&mut self, record: impl Into<EntityRecord>) -> StoreUpdate {
        let record = record.into();
        let raw_type = record.raw_type();
        let id = record.id().to_string();
        self.tables.entry(raw_type).or_default().insert(record);
        self.notify(StoreUpdate {
            raw_type,
            id,
            operation: StoreOperation::Upsert,
            patch: None,
        })
    }

    pub fn get<T: Entity>(&self, id: &str) -> Option<&T> {
        self.get_raw(T::RAW_TYPE, id).and_then(T::from_record)
    }

    pub fn get_raw(&self, raw_type: &str, id: &str) -> Option<&EntityRecord> {
        self.tables.get(raw_type)?.entities.get(id)
    }

    /// Every entity of type `T`, in the order they were first inserted.
    pub fn all<T: Entity>(&self) -> Vec<&T> {
        let Some(table) = self.tables.get(T::RAW_TYPE) else {
            return Vec::new();
        };
        table
            .order
            .iter()
            .filter_map(|id| table.entities.get(id))
            .filter_map(T::from_record)
            .collect()
    }

    pub fn remove(&mut self, raw_type: &str, id: &str) -> Option<EntityRecord> {
        let removed = self.tables.get_mut(raw_type)?.remove(id)?;
        self.notify(StoreUpdate {
            raw_type: removed.raw_type(),
            id: id.to_string(),
            operation: StoreOperation::Delete,
            patch: None,
        });
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.entities.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies one change record. Returns `None` when it changed nothing.
    pub fn apply_change(&mut self, change: &ChangeRecord) -> Option<StoreUpdate> {
        let Some(raw_type) = EntityRecord::known_type(&change.entity_type) else {
            tracing::debug!("ignoring change for unknown type {}", change.entity_type);
            return None;
        };

        match change.change_type {
            ChangeType::Delete => {
                self.remove(raw_type, &change.id)?;
                Some(StoreUpdate {
                    raw_type,
                    id: change.id.clone(),
                    operation: StoreOperation::Delete,
                    patch: None,
                })
            }
            ChangeType::Create => {
                let Some(entity) = change.entity.as_ref() else {
                    tracing::debug!("create for {}/{} carries no entity", raw_type, change.id);
                    return None;
                };
                let mut value = entity.clone();
                if let Value::Object(map) = &mut value {
                    map.entry("_type")
                        .or_insert_with(|| Value::String(raw_type.to_string()));
                    map.entry("id")
                        .or_insert_with(|| Value::String(change.id.clone()));
                }
                match serde_json::from_value::<EntityRecord>(value) {
                    Ok(record) => Some(self.upsert(record)),
                    Err(e) => {
                        tracing::warn!("dropping undecodable {}/{}: {}", raw_type, change.id, e);
                        None
                    }
                }
            }
            ChangeType::Update => {
                let patch = Value::Object(change.changed_properties.clone()?);
                let Some(existing) = self.get_raw(raw_type, &change.id) else {
                    tracing::debug!("update for unknown {}/{}", raw_type, change.id);
                    return None;
                };
                let mut value = match serde_json::to_value(existing) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("cannot encode {}/{}: {}", raw_type, change.id, e);
                        return None;
                    }
                };
                deep_merge(&mut value, &patch);
                let record = match serde_json::from_value::<EntityRecord>(value) {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::warn!("patch for {}/{} rejected: {}", raw_type, change.id, e);
                        return None;
                    }
                };
                self.tables.entry(raw_type).or_default().insert(record);
                Some(self.notify(StoreUpdate {
                    raw_type,
                    id: change.id.clone(),
                    operation: StoreOperation::Patch,
                    patch: Some(patch),
                }))
            }
        }
    }

    /// Applies every record of an aggregator message, in order.
    pub fn apply_response(&mut self, response: &AggregatorResponse) -> Vec<StoreUpdate> {
        let mut applied = Vec::new();
        for record in response.decode_records() {
            match record {
                AggregatorRecord::Entity(entity) => applied.push(self.upsert(entity)),
                AggregatorRecord::Change(change) => applied.extend(self.apply_change(&change)),
            }
        }
        tracing::debug!(
            "applied {} of {} records at version {}",
            applied.len(),
            response.records.len(),
            response.version
        );
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{LocationEntity, SportEntity};
    use serde_json::json;

    fn sport(id: &str, name: &str) -> SportEntity {
        SportEntity {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_get_and_order() {
        let mut store = EntityStore::new();
        store.upsert(sport("2", "Tennis"));
        store.upsert(sport("1", "Football"));
        store.upsert(LocationEntity {
            id: "1".into(),
            name: "Lisbon".into(),
            ..Default::default()
        });
        store.upsert(sport("2", "Tennis (ATP)"));

        assert_eq!(store.len(), 3);
        assert_eq!(store.get::<SportEntity>("2").unwrap().name, "Tennis (ATP)");
        assert_eq!(store.get::<LocationEntity>("1").unwrap().name, "Lisbon");
        assert!(store.get::<SportEntity>("3").is_none());

        let ids: Vec<_> = store.all::<SportEntity>().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn test_change_records() {
        let mut store = EntityStore::new();
        let mut updates = store.updates();
        store.upsert(sport("1", "Football"));

        let update: ChangeRecord = serde_json::from_value(json!({
            "changeType": "UPDATE",
            "entityType": "SPORT",
            "id": "1",
            "changedProperties": {"numberOfLiveEvents": 9}
        }))
        .unwrap();
        let applied = store.apply_change(&update).unwrap();
        assert_eq!(applied.operation, StoreOperation::Patch);
        let football = store.get::<SportEntity>("1").unwrap();
        assert_eq!(football.number_of_live_events, 9);
        assert_eq!(football.name, "Football");

        let create: ChangeRecord = serde_json::from_value(json!({
            "changeType": "CREATE",
            "entityType": "SPORT",
            "id": "5",
            "entity": {"name": "Handball"}
        }))
        .unwrap();
        store.apply_change(&create).unwrap();
        assert_eq!(store.get::<SportEntity>("5").unwrap().name, "Handball");

        let delete: ChangeRecord = serde_json::from_value(json!({
            "changeType": "DELETE", "entityType": "SPORT", "id": "1"
        }))
        .unwrap();
        store.apply_change(&delete).unwrap();
        assert!(store.get::<SportEntity>("1").is_none());
        assert!(store.apply_change(&delete).is_none());

        assert_eq!(updates.try_recv().unwrap().operation, StoreOperation::Upsert);
        assert_eq!(updates.try_recv().unwrap().operation, StoreOperation::Patch);
    }

    #[test]
    fn test_update_for_missing_entity_is_ignored() {
        let mut store = EntityStore::new();
        let update: ChangeRecord = serde_json::from_value(json!({
            "changeType": "UPDATE",
            "entityType": "MATCH",
            "id": "m1",
            "changedProperties": {"name": "A v B"}
        }))
        .unwrap();
        assert!(store.apply_change(&update).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_apply_response() {
        let mut store = EntityStore::new();
        let response: AggregatorResponse = serde_json::from_value(json!({
            "version": 3,
            "records": [
                {"_type": "SPORT", "id": "1", "name": "Football"},
                {"_type": "SPORT", "id": "2", "name": "Tennis"},
                {"_type": "CHANGE_RECORD", "changeType": "UPDATE", "entityType": "SPORT",
                 "id": "2", "changedProperties": {"numberOfLiveMarkets": 4}},
                {"_type": "SOMETHING_NEW", "id": "z"}
            ]
        }))
        .unwrap();

        let applied = store.apply_response(&response);
        assert_eq!(applied.len(), 3);
        assert_eq!(store.get::<SportEntity>("2").unwrap().number_of_live_markets, 4);

        store.clear();
        assert!(store.is_empty());
    }
}
