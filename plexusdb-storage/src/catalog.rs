//! Index and constraint catalog.
//!
//! An explicit object owned by the store and passed by reference into
//! storage and executor construction; its lifecycle is tied to the open
//! database handle, never to process-wide globals. Declarations are
//! persisted through the WAL and become active only after backfill.

use crate::constraint::{ConstraintDecl, PredicateFn};
use crate::index::IndexDef;
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub(crate) struct CatalogInner {
    pub indexes: BTreeMap<String, IndexDef>,
    pub constraints: BTreeMap<String, ConstraintDecl>,
}

#[derive(Default)]
pub struct Catalog {
    pub(crate) inner: RwLock<CatalogInner>,
    predicates: RwLock<BTreeMap<String, PredicateFn>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap();
        f.debug_struct("Catalog")
            .field("indexes", &inner.indexes.keys().collect::<Vec<_>>())
            .field("constraints", &inner.constraints.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named predicate for custom constraints. Must happen
    /// before a `Predicate` constraint naming it is declared or replayed.
    pub fn register_predicate(
        &self,
        name: impl Into<String>,
        f: impl Fn(&plexusdb_api::PropertyValue) -> bool + Send + Sync + 'static,
    ) {
        self.predicates
            .write()
            .unwrap()
            .insert(name.into(), std::sync::Arc::new(f));
    }

    pub(crate) fn predicates(&self) -> BTreeMap<String, PredicateFn> {
        self.predicates.read().unwrap().clone()
    }

    pub fn index_defs(&self) -> Vec<IndexDef> {
        self.inner.read().unwrap().indexes.values().cloned().collect()
    }

    pub fn constraint_decls(&self) -> Vec<ConstraintDecl> {
        self.inner
            .read()
            .unwrap()
            .constraints
            .values()
            .cloned()
            .collect()
    }

    pub fn index(&self, name: &str) -> Option<IndexDef> {
        self.inner.read().unwrap().indexes.get(name).cloned()
    }

    /// The first equality-capable index covering (label, property), if any.
    pub fn index_covering(&self, label: &str, property: &str) -> Option<IndexDef> {
        let inner = self.inner.read().unwrap();
        inner
            .indexes
            .values()
            .find(|def| {
                def.label == label
                    && def.properties.first().is_some_and(|p| p == property)
                    && matches!(
                        def.kind,
                        crate::index::IndexKind::Range
                            | crate::index::IndexKind::Composite
                            | crate::index::IndexKind::Text
                    )
            })
            .cloned()
    }
}
