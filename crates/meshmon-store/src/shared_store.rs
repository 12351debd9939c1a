use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use meshmon_crypto::{KeyMapping, Signer};
use meshmon_model::{Consistency, Store};
use meshmon_types::{NodeId, ReplacementType};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;
use crate::views::{CtxView, MutableCtxView};

/// The typed view API over one network's replicated `Store` (spec §3/§6):
/// loose key/value entries, named contexts, and the consistency envelope,
/// scoped to the local node's own partition for writes and any known peer's
/// for reads. The underlying store is held behind a single coarse lock —
/// merges and local writes are cheap in-memory operations, so there is no
/// benefit to finer-grained locking here.
pub struct SharedStore {
    store: Mutex<Store>,
    key_mapping: KeyMapping,
}

impl SharedStore {
    pub fn new(key_mapping: KeyMapping) -> Self {
        let mut store = Store::new();
        store.get_mut_or_insert(key_mapping.signer().node_id());
        Self {
            store: Mutex::new(store),
            key_mapping,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Store> {
        #[allow(clippy::unwrap_used)]
        self.store.lock().unwrap()
    }

    pub(crate) fn signer(&self) -> &Signer {
        self.key_mapping.signer()
    }

    pub fn node_id(&self) -> &NodeId {
        self.key_mapping.signer().node_id()
    }

    pub fn key_mapping(&self) -> &KeyMapping {
        &self.key_mapping
    }

    /// Every node id this store knows a verifying key for (spec: peers
    /// absent here are dropped during merge).
    pub fn nodes(&self) -> Vec<NodeId> {
        self.key_mapping.node_ids().cloned().collect()
    }

    pub fn value_ids(&self, node_id: Option<&str>) -> Vec<String> {
        let store = self.lock();
        let node_id = node_id.unwrap_or_else(|| self.node_id());
        store
            .get(node_id)
            .map(|n| n.values.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn context_names(&self, node_id: Option<&str>) -> Vec<String> {
        let store = self.lock();
        let node_id = node_id.unwrap_or_else(|| self.node_id());
        store
            .get(node_id)
            .map(|n| n.contexts.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_value<T: DeserializeOwned>(
        &self,
        value_id: &str,
        node_id: Option<&str>,
    ) -> Result<Option<T>, StoreError> {
        let store = self.lock();
        let node_id = node_id.unwrap_or_else(|| self.node_id());
        let Some(block) = store.get(node_id).and_then(|n| n.values.get(value_id)) else {
            return Ok(None);
        };
        serde_json::from_value(block.data.clone())
            .map(Some)
            .map_err(|_| StoreError::ValueSchemaMismatch(value_id.to_string()))
    }

    /// Signs and writes a value into the local node's own partition.
    pub fn set_value<T: Serialize>(
        &self,
        value_id: &str,
        data: &T,
        replacement_type: ReplacementType,
    ) {
        let value = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        let node_id = self.node_id().clone();
        let signer = self.signer();
        let block =
            meshmon_model::SignedBlock::new(signer, value, value_id, replacement_type);
        let mut store = self.lock();
        let node = store.get_mut_or_insert(&node_id);
        node.values.insert(value_id.to_string(), block);
    }

    /// A read-only typed window onto `node_id`'s named context, or `None`
    /// if that node has never created it.
    pub fn get_context<T>(&self, context_name: &str, node_id: &str) -> Option<CtxView<'_, T>> {
        let exists = self
            .lock()
            .get(node_id)
            .is_some_and(|n| n.contexts.contains_key(context_name));
        if !exists {
            return None;
        }
        Some(CtxView {
            store: self,
            node_id: node_id.to_string(),
            context_name: context_name.to_string(),
            _marker: PhantomData,
        })
    }

    /// The mutable window onto the local node's own named context, creating
    /// it (empty, no allowed keys yet) on first use.
    pub fn own_context<T>(&self, context_name: &str) -> MutableCtxView<'_, T> {
        let node_id = self.node_id().clone();
        {
            let mut store = self.lock();
            let signer = self.signer();
            let node = store.get_mut_or_insert(&node_id);
            node.contexts.entry(context_name.to_string()).or_insert_with(|| {
                meshmon_model::Context::new(signer, context_name, Default::default())
            });
        }
        MutableCtxView {
            inner: CtxView {
                store: self,
                node_id,
                context_name: context_name.to_string(),
                _marker: PhantomData,
            },
        }
    }

    /// Ensures the local node carries a `Consistency` envelope, initializing
    /// it against `member_ids` if absent.
    pub fn ensure_consistency(&self, member_ids: impl IntoIterator<Item = NodeId>) {
        let node_id = self.node_id().clone();
        let mut store = self.lock();
        let signer = self.signer();
        let node = store.get_mut_or_insert(&node_id);
        if node.consistency.is_none() {
            node.consistency = Some(Consistency::new(signer, member_ids.into_iter().collect()));
        }
    }

    /// Read-only access to any known node's `Consistency` envelope (`None`
    /// if that node has none yet) — what the pulse/clock/node-status/leader
    /// handlers use to inspect peers (spec §4.4/§4.5).
    pub fn with_node_consistency<R>(
        &self,
        node_id: &str,
        f: impl FnOnce(&Consistency) -> R,
    ) -> Option<R> {
        let store = self.lock();
        store.get(node_id).and_then(|n| n.consistency.as_ref()).map(f)
    }

    /// Runs `f` against the local node's `Consistency` envelope, signing any
    /// writes it makes with this store's signer.
    pub fn with_consistency_mut<R>(&self, f: impl FnOnce(&Signer, &mut Consistency) -> R) -> Result<R, StoreError> {
        let node_id = self.node_id().clone();
        let mut store = self.lock();
        let signer = self.signer().clone();
        let node = store.get_mut_or_insert(&node_id);
        match &mut node.consistency {
            Some(consistency) => Ok(f(&signer, consistency)),
            None => Err(StoreError::NoConsistency(node_id)),
        }
    }

    pub fn dump(&self) -> serde_json::Value {
        serde_json::to_value(&*self.lock()).unwrap_or(serde_json::Value::Null)
    }

    /// Merges a whole foreign `Store` snapshot (e.g. received over
    /// transport, or restored from a dump) into the local one.
    pub fn update(&self, other: &Store) -> Vec<meshmon_types::Path> {
        let secrets = std::collections::BTreeMap::new();
        let mut store = self.lock();
        store.update(other, &self.key_mapping, &secrets)
    }

    /// As `update`, but with consistent-context secrets supplied so those
    /// envelopes can also verify and merge.
    pub fn update_with_secrets(
        &self,
        other: &Store,
        secrets: &std::collections::BTreeMap<String, String>,
    ) -> Vec<meshmon_types::Path> {
        let mut store = self.lock();
        store.update(other, &self.key_mapping, secrets)
    }

    pub fn snapshot(&self) -> Store {
        self.lock().clone()
    }

    /// Parses a previously `dump`ped snapshot and merges it in — used when
    /// hot-reloading a network's membership without losing what was already
    /// replicated (mirrors `StoreManager.load_stores`' existing-store carry-over).
    pub fn update_from_dump(&self, dump: serde_json::Value) -> Result<Vec<meshmon_types::Path>, StoreError> {
        let other: Store = serde_json::from_value(dump)
            .map_err(|_| StoreError::ValueSchemaMismatch("store dump".to_string()))?;
        Ok(self.update(&other))
    }

    /// As `update_from_dump`, but with consistent-context secrets supplied
    /// so incoming leader-election envelopes also verify and merge.
    pub fn update_from_dump_with_secrets(
        &self,
        dump: serde_json::Value,
        secrets: &std::collections::BTreeMap<String, String>,
    ) -> Result<Vec<meshmon_types::Path>, StoreError> {
        let other: Store = serde_json::from_value(dump)
            .map_err(|_| StoreError::ValueSchemaMismatch("store dump".to_string()))?;
        Ok(self.update_with_secrets(&other, secrets))
    }
}
