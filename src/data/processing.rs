use super::models::{RawFeedRecord, SecurityId};
use crate::error::StoreError;
use crate::storage::{Registration, SecurityRegistry};
use std::collections::HashMap;
use tracing::info;

/// Resolves feed symbols to registered securities during one ingestion pass.
///
/// Starts from a snapshot of the registry and remembers every security it
/// registers, so a symbol repeated later in the same feed is not registered
/// twice.
pub struct SymbolResolver {
    known: HashMap<String, SecurityId>,
    created: usize,
}

impl SymbolResolver {
    /// Creates a resolver seeded with a registry snapshot.
    ///
    /// # Arguments
    /// * `snapshot`: Symbol to security id mapping loaded at the start of the pass
    pub fn new(snapshot: HashMap<String, SecurityId>) -> Self {
        Self {
            known: snapshot,
            created: 0,
        }
    }

    /// Returns the security for `record`, registering it first if unseen.
    ///
    /// # Errors
    /// Returns a `StoreError` if registering a new security fails
    pub async fn resolve(
        &mut self,
        registry: &dyn SecurityRegistry,
        record: &RawFeedRecord,
    ) -> Result<SecurityId, StoreError> {
        if let Some(id) = self.known.get(&record.symbol) {
            return Ok(*id);
        }

        let registration = registry
            .create_security(&record.symbol, &record.isin)
            .await?;
        if let Registration::Created(id) = registration {
            self.created += 1;
            info!(symbol = %record.symbol, isin = %record.isin, %id, "new security");
        }

        let id = registration.id();
        self.known.insert(record.symbol.clone(), id);
        Ok(id)
    }

    /// Number of securities this resolver registered.
    pub fn created(&self) -> usize {
        self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{acme, newco};
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn test_known_symbol_needs_no_write() {
        let store = MemoryStore::with_securities(&[("ACME", "INE000A01")]);
        let mut resolver = SymbolResolver::new(store.symbol_map().await.unwrap());

        let id = resolver.resolve(&store, &acme()).await.unwrap();

        assert_eq!(id, SecurityId(1));
        assert_eq!(resolver.created(), 0);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_new_symbol_registered_once() {
        let store = MemoryStore::new();
        let mut resolver = SymbolResolver::new(HashMap::new());

        let first = resolver.resolve(&store, &newco()).await.unwrap();
        let second = resolver.resolve(&store, &newco()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(resolver.created(), 1);
        assert_eq!(store.writes(), 1);
        assert_eq!(store.securities().len(), 1);
    }

    #[tokio::test]
    async fn test_symbol_registered_elsewhere_is_not_counted() {
        let store = MemoryStore::with_securities(&[("NEWCO", "INE999Z99")]);
        // Stale snapshot taken before the other run registered NEWCO.
        let mut resolver = SymbolResolver::new(HashMap::new());

        let id = resolver.resolve(&store, &newco()).await.unwrap();

        assert_eq!(id, SecurityId(1));
        assert_eq!(resolver.created(), 0);
        assert_eq!(store.securities().len(), 1);
    }
}
