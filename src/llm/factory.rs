// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Adapter registry and requester cache
//!
//! The registry maps a channel type to the factory that builds its
//! requesters. It is built once at startup and passed to whoever dispatches
//! requests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::channel::ChannelConfig;
use crate::config::HttpConfig;
use crate::error::{Result, TxingError};
use crate::llm::provider::{ChatRequester, ChatRequesterFactory, ToolCallingModel};
use crate::llm::providers::{eino_openai_factory, openai_factory, polo_factory, volcengine_factory};

/// Concurrent map of built requesters keyed by credential.
///
/// Lookups take the read lock; a miss re-checks under the write lock before
/// building so two racing callers end up sharing one instance.
pub struct RequesterCache<T: ?Sized> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Default for RequesterCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> RequesterCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "txing.llm.factory", "requester cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        entries.get(key).cloned()
    }

    /// Return the cached entry for `key`, building it with `build` on a miss.
    ///
    /// A failed build caches nothing.
    pub fn get_or_try_insert_with<F>(&self, key: &str, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<Arc<T>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }

        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(target: "txing.llm.factory", "requester cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if let Some(hit) = entries.get(key) {
            return Ok(Arc::clone(hit));
        }

        let built = build()?;
        entries.insert(key.to_string(), Arc::clone(&built));
        Ok(built)
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Channel type to factory lookup
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<String, Arc<dyn ChatRequesterFactory>>,
}

impl AdapterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in channel type
    pub fn with_defaults(http: &HttpConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(openai_factory(http.clone())));
        registry.register(Arc::new(eino_openai_factory(http.clone())));
        registry.register(Arc::new(polo_factory(http.clone())));
        registry.register(Arc::new(volcengine_factory(http.clone())));
        registry
    }

    /// Add or replace the factory for its channel type.
    pub fn register(&mut self, factory: Arc<dyn ChatRequesterFactory>) {
        let channel_type = factory.channel_type().to_string();
        if self.factories.insert(channel_type.clone(), factory).is_some() {
            tracing::debug!(target: "txing.llm.factory", %channel_type, "replaced adapter factory");
        }
    }

    pub fn contains(&self, channel_type: &str) -> bool {
        self.factories.contains_key(channel_type)
    }

    /// Registered channel types, sorted
    pub fn channel_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    fn factory_for(&self, channel: &dyn ChannelConfig) -> Result<&Arc<dyn ChatRequesterFactory>> {
        self.factories
            .get(channel.channel_type())
            .ok_or_else(|| TxingError::UnknownChannelType {
                channel_type: channel.channel_type().to_string(),
                channel_id: channel.id(),
            })
    }

    /// Requester for `channel`, built or reused by its type's factory.
    pub fn create_chat_requester(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ChatRequester>> {
        self.factory_for(channel)?.create_chat_requester(channel)
    }

    /// Tool-calling model for `channel`.
    pub fn create_tool_model(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ToolCallingModel>> {
        self.factory_for(channel)?.create_tool_model(channel)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("channel_types", &self.channel_types())
            .finish()
    }
}
