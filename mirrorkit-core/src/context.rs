//! Scoped key/value context shared by a provider and its hooks.
//!
//! The context is a stack of frames. [`Context::enter`] pushes a child frame
//! for one attempt, [`Context::exit`] discards it. Lookups walk from the
//! innermost frame outwards, so an attempt can shadow a value bound at
//! construction time without touching it.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::error::ContextError;

/// Key for the directory the sync process runs in.
pub const WORKING_DIR_KEY: &str = "working_dir";
/// Key for the per-mirror log directory.
pub const LOG_DIR_KEY: &str = "log_dir";
/// Key for the file receiving the sync process output.
pub const LOG_FILE_KEY: &str = "log_file";
/// Key bound by the attempt driver to the 1-based attempt number.
pub const ATTEMPT_KEY: &str = "attempt";

#[derive(Debug, Clone)]
pub struct Context {
    frames: Vec<HashMap<String, Value>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A context holding only the (empty) root frame.
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    /// Push a child scope and return it.
    pub fn enter(&mut self) -> &mut Self {
        self.frames.push(HashMap::new());
        self
    }

    /// Discard the innermost scope, returning to its parent.
    pub fn exit(&mut self) -> Result<&mut Self, ContextError> {
        if self.frames.len() == 1 {
            return Err(ContextError::ExitRoot);
        }
        self.frames.pop();
        Ok(self)
    }

    /// Number of scopes, the root included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind `key` in the innermost scope.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(key.into(), value.into());
        }
    }

    /// Look `key` up from the innermost scope outwards.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(key))
    }

    /// Look up a string-valued path binding.
    ///
    /// Returns `None` when the key is unbound or bound to a non-string value;
    /// callers decide whether that is fatal.
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).and_then(Value::as_str).map(PathBuf::from)
    }
}
