//! Last-known value per data category.
//!
//! Entries are retained until overwritten: a disconnect does not clear them,
//! so callers can still read the last reported state of a host that went away.

use ifconnect_types::{Category, DataEnvelope};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared cache keyed by the `Type` field. Written by the session, read by anyone.
#[derive(Debug, Clone, Default)]
pub struct LastKnownState {
    inner: Arc<RwLock<HashMap<String, DataEnvelope>>>,
}

impl LastKnownState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the envelope under its `Type`, replacing any previous one.
    ///
    /// Returns false for envelopes without a string `Type`, which are not cached.
    pub fn record(&self, envelope: &DataEnvelope) -> bool {
        let Some(type_name) = envelope.type_name() else {
            return false;
        };
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(type_name.to_string(), envelope.clone());
        true
    }

    #[must_use]
    pub fn get(&self, category: Category) -> Option<DataEnvelope> {
        self.get_type(category.type_name())
    }

    /// Lookup by raw `Type`, including types that are not known categories.
    #[must_use]
    pub fn get_type(&self, type_name: &str) -> Option<DataEnvelope> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, DataEnvelope> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
