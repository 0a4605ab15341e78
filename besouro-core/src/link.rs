//! Per-resource action linking
//!
//! Each file action is linked to the most recent file action on the same
//! path so that size and structure increases can be computed. The mapping
//! lives for the whole stream and is never cleared at episode boundaries.

use std::collections::HashMap;

use crate::error::Result;
use crate::types::{Action, FileSnapshot};

/// Remembers the last file action seen for every resource path.
#[derive(Debug, Default)]
pub struct ActionLinker {
    last_per_path: HashMap<String, FileSnapshot>,
}

impl ActionLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `action` to the previous action on its path and remember it.
    ///
    /// Test case and test session actions pass through untouched. Linking an
    /// action twice fails with [`Error::AlreadyLinked`](crate::Error::AlreadyLinked)
    /// and leaves the mapping unchanged.
    pub fn link(&mut self, action: &mut Action) -> Result<()> {
        let Some(file_action) = action.as_file_action_mut() else {
            return Ok(());
        };

        let previous = self.last_per_path.get(file_action.path()).cloned();
        tracing::trace!(
            path = file_action.path(),
            previous = ?previous.as_ref().map(|p| p.id),
            "Linking file action"
        );
        file_action.set_previous_action(previous)?;

        self.last_per_path
            .insert(file_action.path().to_string(), file_action.snapshot());
        Ok(())
    }

    /// Last linked action for a path.
    pub fn last_for(&self, path: &str) -> Option<&FileSnapshot> {
        self.last_per_path.get(path)
    }

    /// Number of distinct paths seen so far.
    pub fn tracked_paths(&self) -> usize {
        self.last_per_path.len()
    }
}
