use crate::{Client, ClientError, EventBusConfig, ListParams, ResourceEvent, Result};
use async_trait::async_trait;
use capv_core::{CapvError, GroupVersionKind, ObjectKey, Resource, ResourceKey, Scheme, Time};
use capv_storage::{KVStore, KeyEncoder, Transaction};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// redb-backed resource store
///
/// Objects are stored as JSON under their storage key. Every write assigns a
/// fresh resourceVersion and publishes an event on the bus after commit.
#[derive(Clone)]
pub struct ResourceStore {
    storage: Arc<dyn KVStore>,
    scheme: Arc<Scheme>,
    event_tx: broadcast::Sender<ResourceEvent>,
}

impl ResourceStore {
    /// Create a store with the default kinds registered and default event bus config
    pub fn new(storage: Arc<dyn KVStore>) -> Self {
        Self::with_event_bus_config(storage, EventBusConfig::default())
    }

    /// Create a store with a custom event bus config
    pub fn with_event_bus_config(storage: Arc<dyn KVStore>, config: EventBusConfig) -> Self {
        let mut scheme = Scheme::new();
        scheme.register_defaults();
        let (event_tx, _) = broadcast::channel(config.capacity);
        Self {
            storage,
            scheme: Arc::new(scheme),
            event_tx,
        }
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Subscribe to resource events
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.event_tx.subscribe()
    }

    /// Get an object of any registered kind as JSON
    pub async fn get_value(&self, key: &ResourceKey) -> Result<Value> {
        self.ensure_registered(&key.gvk)?;
        debug!("Getting resource: {}", key);

        let storage_key = KeyEncoder::encode_resource_key(key);
        let data = self
            .storage
            .get(storage_key.as_bytes())?
            .ok_or_else(|| ClientError::not_found(key))?;
        decode_value(key, &data)
    }

    /// Delete an object of any registered kind.
    ///
    /// An object with finalizers only gets its deletionTimestamp set; it is
    /// removed once an update clears the finalizers. Removing an object
    /// deletes every object naming it in an ownerReference.
    pub async fn delete_key(&self, key: &ResourceKey) -> Result<()> {
        self.ensure_registered(&key.gvk)?;
        info!("Deleting resource: {}", key);

        let storage_key = KeyEncoder::encode_resource_key(key);
        let mut txn = self.storage.transaction()?;
        let mut stored = read_in_txn(txn.as_ref(), key)?;
        let version = new_version();
        let mut events = Vec::new();

        if has_finalizers(&stored) {
            if is_marked_deleting(&stored) {
                debug!("Resource {} already marked for deletion", key);
                return Ok(());
            }
            mark_deleting(key, &mut stored, &version)?;
            txn.put(storage_key.as_bytes(), &serde_json::to_vec(&stored)?)?;
            info!("Resource {} has finalizers, marked for deletion", key);
            events.push(ResourceEvent::modified(key.clone(), stored, version));
        } else {
            remove_cascading(txn.as_mut(), key.clone(), stored, &version, &mut events)?;
        }

        txn.commit()?;
        self.publish(events);
        Ok(())
    }

    /// Create the object, or update it when it exists. A non-empty status on
    /// an existing object is written through the status path.
    pub async fn apply<R: Resource>(&self, mut resource: R) -> Result<R> {
        resource.metadata_mut().resource_version = None;
        let key = resource.object_key();

        if self.get_opt::<R>(&key).await?.is_none() {
            return self.create(resource).await;
        }

        let has_status = serde_json::to_value(&resource)?
            .get("status")
            .is_some_and(|status| !status.is_null());
        let updated = self.update(resource.clone()).await?;
        if has_status {
            return self.update_status(resource).await;
        }
        Ok(updated)
    }

    fn ensure_registered(&self, gvk: &GroupVersionKind) -> Result<()> {
        if self.scheme.is_registered(gvk) {
            Ok(())
        } else {
            Err(CapvError::invalid_kind(gvk.to_string()).into())
        }
    }

    fn key_of<R: Resource>(&self, resource: &R) -> Result<ResourceKey> {
        let key = resource.resource_key()?;
        self.ensure_registered(&key.gvk)?;
        Ok(key)
    }

    fn publish(&self, events: Vec<ResourceEvent>) {
        // Best-effort: no subscribers is not an error
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }
}

#[async_trait]
impl Client for ResourceStore {
    async fn get<R: Resource>(&self, key: &ObjectKey) -> Result<R> {
        let key = ResourceKey::from_object_key(R::type_gvk(), key);
        let value = self.get_value(&key).await?;
        decode(&key, value)
    }

    async fn list<R: Resource>(&self, params: &ListParams) -> Result<Vec<R>> {
        let gvk = R::type_gvk();
        self.ensure_registered(&gvk)?;

        let prefix = KeyEncoder::encode_prefix(&gvk, params.namespace.as_deref());
        let mut items = Vec::new();
        for (raw_key, data) in self.storage.scan(prefix.as_bytes())? {
            let key = KeyEncoder::parse_key(&String::from_utf8_lossy(&raw_key))?;
            let resource: R = decode(&key, decode_value(&key, &data)?)?;
            if params.matches(resource.metadata().labels.as_ref()) {
                items.push(resource);
            }
        }

        debug!("Listed {} {} objects", items.len(), gvk.kind);
        Ok(items)
    }

    async fn create<R: Resource>(&self, mut resource: R) -> Result<R> {
        resource.validate()?;
        let key = self.key_of(&resource)?;
        info!("Creating resource: {}", key);

        let version = new_version();
        {
            let metadata = resource.metadata_mut();
            metadata.uid = Some(Uuid::new_v4().to_string());
            metadata.resource_version = Some(version.clone());
            metadata.creation_timestamp = Some(Time(Utc::now()));
            metadata.deletion_timestamp = None;
        }
        let object = serde_json::to_value(&resource)?;

        let storage_key = KeyEncoder::encode_resource_key(&key);
        let mut txn = self.storage.transaction()?;
        if txn.get(storage_key.as_bytes())?.is_some() {
            return Err(ClientError::already_exists(&key));
        }
        txn.put(storage_key.as_bytes(), &serde_json::to_vec(&object)?)?;
        txn.commit()?;

        info!("Created resource: {} with version {}", key, version);
        let created = decode(&key, object.clone())?;
        self.publish(vec![ResourceEvent::added(key, object, version)]);

        Ok(created)
    }

    async fn update<R: Resource>(&self, resource: R) -> Result<R> {
        resource.validate()?;
        let key = self.key_of(&resource)?;
        info!("Updating resource: {}", key);

        let storage_key = KeyEncoder::encode_resource_key(&key);
        let mut txn = self.storage.transaction()?;
        let stored = read_in_txn(txn.as_ref(), &key)?;
        check_version(&key, &resource, &stored)?;

        let version = new_version();
        let mut object = serde_json::to_value(&resource)?;
        {
            let metadata = metadata_mut(&key, &mut object)?;
            for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
                copy_field(metadata, stored.get("metadata"), field);
            }
            metadata.insert("resourceVersion".to_string(), Value::String(version.clone()));
        }
        if let Some(object_map) = object.as_object_mut() {
            match stored.get("status") {
                Some(status) => object_map.insert("status".to_string(), status.clone()),
                None => object_map.remove("status"),
            };
        }

        let mut events = Vec::new();
        if is_marked_deleting(&object) && !has_finalizers(&object) {
            info!("Finalizers removed from {}, completing deletion", key);
            remove_cascading(txn.as_mut(), key.clone(), object.clone(), &version, &mut events)?;
        } else {
            txn.put(storage_key.as_bytes(), &serde_json::to_vec(&object)?)?;
            events.push(ResourceEvent::modified(key.clone(), object.clone(), version.clone()));
        }
        txn.commit()?;

        info!("Updated resource: {} with version {}", key, version);
        self.publish(events);

        decode(&key, object)
    }

    async fn update_status<R: Resource>(&self, resource: R) -> Result<R> {
        let key = self.key_of(&resource)?;
        info!("Updating status for resource: {}", key);

        let storage_key = KeyEncoder::encode_resource_key(&key);
        let mut txn = self.storage.transaction()?;
        let mut object = read_in_txn(txn.as_ref(), &key)?;
        check_version(&key, &resource, &object)?;

        let incoming = serde_json::to_value(&resource)?;
        let version = new_version();
        if let Some(object_map) = object.as_object_mut() {
            match incoming.get("status").filter(|s| !s.is_null()) {
                Some(status) => object_map.insert("status".to_string(), status.clone()),
                None => object_map.remove("status"),
            };
        }
        metadata_mut(&key, &mut object)?
            .insert("resourceVersion".to_string(), Value::String(version.clone()));

        txn.put(storage_key.as_bytes(), &serde_json::to_vec(&object)?)?;
        txn.commit()?;

        info!("Updated status for resource: {} with version {}", key, version);
        self.publish(vec![ResourceEvent::modified(
            key.clone(),
            object.clone(),
            version,
        )]);

        decode(&key, object)
    }

    async fn delete<R: Resource>(&self, key: &ObjectKey) -> Result<()> {
        self.delete_key(&ResourceKey::from_object_key(R::type_gvk(), key))
            .await
    }
}

fn new_version() -> String {
    Uuid::new_v4().to_string()
}

fn decode_value(key: &ResourceKey, data: &[u8]) -> Result<Value> {
    serde_json::from_slice(data).map_err(|e| ClientError::corrupt_object(key, e.to_string()))
}

fn decode<R: Resource>(key: &ResourceKey, value: Value) -> Result<R> {
    serde_json::from_value(value).map_err(|e| ClientError::corrupt_object(key, e.to_string()))
}

fn read_in_txn(txn: &dyn Transaction, key: &ResourceKey) -> Result<Value> {
    let storage_key = KeyEncoder::encode_resource_key(key);
    let data = txn
        .get(storage_key.as_bytes())?
        .ok_or_else(|| ClientError::not_found(key))?;
    decode_value(key, &data)
}

fn metadata_str<'a>(object: &'a Value, field: &str) -> Option<&'a str> {
    object.get("metadata")?.get(field)?.as_str()
}

fn metadata_mut<'a>(key: &ResourceKey, object: &'a mut Value) -> Result<&'a mut Map<String, Value>> {
    object
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| ClientError::corrupt_object(key, "object has no metadata"))
}

fn copy_field(target: &mut Map<String, Value>, source: Option<&Value>, field: &str) {
    match source.and_then(|s| s.get(field)) {
        Some(value) => target.insert(field.to_string(), value.clone()),
        None => target.remove(field),
    };
}

fn check_version<R: Resource>(key: &ResourceKey, resource: &R, stored: &Value) -> Result<()> {
    if let Some(expected) = resource.resource_version() {
        let actual = metadata_str(stored, "resourceVersion").unwrap_or_default();
        if expected.as_str() != actual {
            return Err(ClientError::conflict(key, expected.0, actual));
        }
    }
    Ok(())
}

fn has_finalizers(object: &Value) -> bool {
    object
        .get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn is_marked_deleting(object: &Value) -> bool {
    metadata_str(object, "deletionTimestamp").is_some()
}

fn mark_deleting(key: &ResourceKey, object: &mut Value, version: &str) -> Result<()> {
    let now = serde_json::to_value(Time(Utc::now()))?;
    let metadata = metadata_mut(key, object)?;
    metadata.entry("deletionTimestamp").or_insert(now);
    metadata.insert("resourceVersion".to_string(), Value::String(version.to_string()));
    Ok(())
}

fn is_owned_by(object: &Value, owner_uid: &str) -> bool {
    object
        .get("metadata")
        .and_then(|m| m.get("ownerReferences"))
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(owner_uid))
        })
}

/// Remove `object` and, transitively, everything it owns. Dependents with
/// finalizers are marked for deletion instead.
fn remove_cascading(
    txn: &mut dyn Transaction,
    key: ResourceKey,
    object: Value,
    version: &str,
    events: &mut Vec<ResourceEvent>,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut pending = VecDeque::new();
    seen.insert(KeyEncoder::encode_resource_key(&key));
    pending.push_back((key, object));

    while let Some((key, object)) = pending.pop_front() {
        txn.delete(KeyEncoder::encode_resource_key(&key).as_bytes())?;
        info!("Deleted resource: {}", key);

        let owner_uid = metadata_str(&object, "uid").map(str::to_string);
        events.push(ResourceEvent::deleted(key, object, version.to_string()));

        let Some(owner_uid) = owner_uid else {
            continue;
        };

        for (raw_key, data) in txn.scan(b"")? {
            let storage_key = String::from_utf8_lossy(&raw_key).to_string();
            if seen.contains(&storage_key) {
                continue;
            }
            let dependent_key = KeyEncoder::parse_key(&storage_key)?;
            let mut dependent = decode_value(&dependent_key, &data)?;
            if !is_owned_by(&dependent, &owner_uid) {
                continue;
            }

            debug!("Garbage collecting {} owned by {}", dependent_key, owner_uid);
            seen.insert(storage_key.clone());
            if has_finalizers(&dependent) {
                if !is_marked_deleting(&dependent) {
                    mark_deleting(&dependent_key, &mut dependent, version)?;
                    txn.put(storage_key.as_bytes(), &serde_json::to_vec(&dependent)?)?;
                    events.push(ResourceEvent::modified(
                        dependent_key,
                        dependent,
                        version.to_string(),
                    ));
                }
            } else {
                pending.push_back((dependent_key, dependent));
            }
        }
    }

    Ok(())
}
