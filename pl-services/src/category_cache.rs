//! Per-message memoized categories.
//!
//! The first lookup classifies the message and writes the bits to
//! `messages.cached_category`; every later lookup, from any context, reads
//! the stored integer. Rewriting is an idempotent overwrite, so two lookups
//! racing on the same message store the same value.

use std::sync::Arc;

use rusqlite::Connection;
use tracing::trace;

use pl_core::error::PlResult;
use pl_models::{Message, MessageCategory};

use crate::classifier::{ContentClassifier, DefaultClassifier};

/// Category lookup backed by the message row.
#[derive(Clone)]
pub struct CategoryCache {
    classifier: Arc<dyn ContentClassifier>,
}

impl Default for CategoryCache {
    fn default() -> Self {
        Self::new(Arc::new(DefaultClassifier))
    }
}

impl CategoryCache {
    pub fn new(classifier: Arc<dyn ContentClassifier>) -> Self {
        Self { classifier }
    }

    /// Stored category if present, else classify, store and return it.
    pub fn category(&self, conn: &Connection, message: &mut Message) -> PlResult<MessageCategory> {
        if let Some(cached) = message.cached_category.filter(|c| !c.is_empty()) {
            return Ok(cached);
        }

        let computed = self.classifier.classify(message);
        if message.id.is_some() {
            message.set_cached_category(conn, computed)?;
        } else {
            message.cached_category = Some(computed);
        }
        trace!(message_id = ?message.id, category = %computed, "category computed");
        Ok(computed)
    }

    /// Categorize every message up front. Returns how many were computed
    /// rather than read from the cache.
    pub fn prime(&self, conn: &Connection, messages: &mut [Message]) -> PlResult<usize> {
        let mut computed = 0;
        for message in messages.iter_mut() {
            if message.cached_category.is_none() {
                computed += 1;
            }
            self.category(conn, message)?;
        }
        Ok(computed)
    }
}
