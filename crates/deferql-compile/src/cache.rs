//! Session-wide materialization cache
//!
//! Named, backend-native intermediate results. Every operation runs under
//! one lock, and the host callbacks that acquire or release backend
//! resources run while it is held, so a lookup racing an eviction sees
//! either the whole entry or nothing.

use crate::backend::NativeProgram;
use deferql_ir::{Error, Result, Schema};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Addressable materialized result.
#[derive(Debug, Clone, PartialEq)]
pub struct Handle<F> {
    pub name: String,
    pub id: Uuid,
    pub schema: Schema,
    pub program: Arc<NativeProgram<F>>,
}

/// Owner of the backend-side resources behind cache entries: temp views,
/// persisted dataframes, staging tables.
pub trait MaterializationHost<F>: Send + Sync {
    /// Make the result addressable under `handle.name`.
    fn persist(&self, handle: &Handle<F>) -> Result<()>;

    /// Drop the backend object and free its memory.
    fn release(&self, handle: &Handle<F>) -> Result<()>;
}

/// Host for backends whose fragments are referenced lazily and hold no
/// resources of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl<F> MaterializationHost<F> for NoopHost {
    fn persist(&self, _: &Handle<F>) -> Result<()> {
        Ok(())
    }

    fn release(&self, _: &Handle<F>) -> Result<()> {
        Ok(())
    }
}

pub struct MaterializationCache<F> {
    entries: Mutex<BTreeMap<String, Handle<F>>>,
    host: Box<dyn MaterializationHost<F>>,
}

impl<F: Clone + Send + Sync + 'static> MaterializationCache<F> {
    pub fn new() -> Self {
        Self::with_host(NoopHost)
    }

    pub fn with_host(host: impl MaterializationHost<F> + 'static) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            host: Box::new(host),
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, Handle<F>>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Invariant("materialization cache lock poisoned".to_string()))
    }

    /// Register a table-shaped program under `name`.
    ///
    /// Fails if the name is taken; the caller must evict first.
    pub fn register(&self, name: &str, program: NativeProgram<F>) -> Result<Handle<F>> {
        let schema = program
            .schema()
            .cloned()
            .ok_or_else(|| Error::Type(format!("cannot materialize scalar result as '{name}'")))?;
        let mut entries = self.entries()?;
        if entries.contains_key(name) {
            return Err(Error::Invariant(format!(
                "'{name}' is already materialized; evict it first"
            )));
        }
        let handle = Handle {
            name: name.to_string(),
            id: Uuid::new_v4(),
            schema,
            program: Arc::new(program),
        };
        self.host.persist(&handle)?;
        entries.insert(name.to_string(), handle.clone());
        tracing::info!(name, id = %handle.id, "Registered materialization");
        Ok(handle)
    }

    /// Release the backend resource behind `name` and forget it.
    pub fn evict(&self, name: &str) -> Result<()> {
        let mut entries = self.entries()?;
        let handle = entries
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("materialization '{name}'")))?;
        self.host.release(handle)?;
        let id = handle.id;
        entries.remove(name);
        tracing::info!(name, %id, "Evicted materialization");
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Handle<F>> {
        self.entries().ok()?.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<F: Clone + Send + Sync + 'static> Default for MaterializationCache<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deferql_ir::{DataType, Output};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn program() -> NativeProgram<String> {
        NativeProgram {
            root: "scan".to_string(),
            shared: vec![],
            memtables: vec![],
            output: Output::Table(Schema::from_pairs([("a", DataType::int32())]).unwrap()),
        }
    }

    #[test]
    fn test_register_evict_lookup() {
        let cache = MaterializationCache::new();
        let handle = cache.register("t", program()).unwrap();
        assert_eq!(cache.lookup("t").unwrap().id, handle.id);

        cache.evict("t").unwrap();
        assert!(cache.lookup("t").is_none());
        assert!(matches!(cache.evict("t"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_duplicate_register_is_invariant_violation() {
        let cache = MaterializationCache::new();
        cache.register("t", program()).unwrap();
        assert!(matches!(cache.register("t", program()), Err(Error::Invariant(_))));
    }

    #[test]
    fn test_scalar_program_rejected() {
        let cache = MaterializationCache::new();
        let mut p = program();
        p.output = Output::Value(DataType::int64());
        assert!(matches!(cache.register("s", p), Err(Error::Type(_))));
    }

    struct FailingRelease(AtomicBool);

    impl MaterializationHost<String> for FailingRelease {
        fn persist(&self, _: &Handle<String>) -> Result<()> {
            Ok(())
        }

        fn release(&self, handle: &Handle<String>) -> Result<()> {
            if self.0.swap(false, Ordering::SeqCst) {
                Err(Error::Host(format!("could not drop {}", handle.name)))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failed_release_keeps_entry() {
        let cache = MaterializationCache::with_host(FailingRelease(AtomicBool::new(true)));
        cache.register("t", program()).unwrap();
        assert!(matches!(cache.evict("t"), Err(Error::Host(_))));
        assert!(cache.lookup("t").is_some());
        cache.evict("t").unwrap();
        assert!(cache.is_empty());
    }
}
