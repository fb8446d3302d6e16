// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tools the agent can offer to the model
//!
//! A tool is called with its name and a JSON argument string and answers
//! with text. Concrete tools (search, PDF export, maps) live outside this
//! crate and are registered at startup.

pub mod executor;
pub mod show_msg;

pub use executor::*;
pub use show_msg::{ShowMsgBuilder, ShowMsgRegistry};

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::provider::ToolDefinition;

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition offered to the model
    fn definition(&self) -> ToolDefinition;

    /// Run with raw JSON arguments and return the result text.
    async fn call(&self, arguments: &str) -> Result<String>;

    fn name(&self) -> &str;
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// Tool backed by a closure
pub struct FnTool {
    definition: ToolDefinition,
    handler: Box<dyn Fn(String) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            definition,
            handler: Box::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn call(&self, arguments: &str) -> Result<String> {
        (self.handler)(arguments.to_string()).await
    }

    fn name(&self) -> &str {
        &self.definition.name
    }
}

/// Registry of available tools
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(target: "txing.tools", tool = %name, "replaced tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Definitions sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.names()).finish()
    }
}
