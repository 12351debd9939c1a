use std::marker::PhantomData;

use meshmon_types::ReplacementType;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;
use crate::shared_store::SharedStore;

/// A typed, read-only window onto one node's named `Context`. Values are
/// deserialized into `T` on access rather than stored typed, mirroring the
/// model layer's opaque-JSON-payload design (spec §3's design note).
pub struct CtxView<'a, T> {
    pub(crate) store: &'a SharedStore,
    pub(crate) node_id: String,
    pub(crate) context_name: String,
    pub(crate) _marker: PhantomData<T>,
}

impl<'a, T: DeserializeOwned> CtxView<'a, T> {
    pub fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        let store = self.store.lock();
        let Some(node) = store.get(&self.node_id) else {
            return Ok(None);
        };
        let Some(ctx) = node.contexts.get(&self.context_name) else {
            return Ok(None);
        };
        let Some(block) = ctx.get(key) else {
            return Ok(None);
        };
        serde_json::from_value(block.data.clone())
            .map(Some)
            .map_err(|_| StoreError::ValueSchemaMismatch(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        let store = self.store.lock();
        store
            .get(&self.node_id)
            .and_then(|node| node.contexts.get(&self.context_name))
            .is_some_and(|ctx| ctx.get(key).is_some())
    }

    pub fn len(&self) -> usize {
        let store = self.store.lock();
        store
            .get(&self.node_id)
            .and_then(|node| node.contexts.get(&self.context_name))
            .map(|ctx| ctx.allowed_keys().len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deserializes every entry currently permitted by `allowed_keys`,
    /// silently skipping keys that fail to deserialize as `T`.
    pub fn entries(&self) -> Vec<(String, T)> {
        let store = self.store.lock();
        let Some(ctx) = store
            .get(&self.node_id)
            .and_then(|node| node.contexts.get(&self.context_name))
        else {
            return Vec::new();
        };
        ctx.allowed_keys()
            .iter()
            .filter_map(|key| {
                let block = ctx.get(key)?;
                serde_json::from_value::<T>(block.data.clone())
                    .ok()
                    .map(|value| (key.clone(), value))
            })
            .collect()
    }
}

/// The same window as `CtxView`, but over the local node's own partition,
/// where writes are permitted (spec §3: a node exclusively owns its own
/// `NodeData`).
pub struct MutableCtxView<'a, T> {
    pub(crate) inner: CtxView<'a, T>,
}

impl<'a, T: DeserializeOwned> MutableCtxView<'a, T> {
    pub fn get(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn entries(&self) -> Vec<(String, T)> {
        self.inner.entries()
    }
}

impl<'a, T: Serialize + DeserializeOwned> MutableCtxView<'a, T> {
    /// Signs and writes `value` under `key`, extending `allowed_keys` (and
    /// re-signing the context header) the first time `key` is used.
    pub fn set(&self, key: &str, value: T, replacement_type: ReplacementType) {
        let payload = serde_json::to_value(&value).unwrap_or(serde_json::Value::Null);
        let mut store = self.inner.store.lock();
        let node = store.get_mut_or_insert(&self.inner.node_id);
        let signer = self.inner.store.signer();
        let ctx = node
            .contexts
            .entry(self.inner.context_name.clone())
            .or_insert_with(|| {
                meshmon_model::Context::new(
                    signer,
                    self.inner.context_name.clone(),
                    Default::default(),
                )
            });
        if !ctx.allowed_keys().contains(key) {
            let mut allowed = ctx.allowed_keys().clone();
            allowed.insert(key.to_string());
            ctx.resign_allowed_keys(signer, allowed);
        }
        if let Err(e) = ctx.set(signer, key, payload, replacement_type) {
            tracing::warn!(key = %key, error = %e, "failed to write context entry");
        }
    }
}
