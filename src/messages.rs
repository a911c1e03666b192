//! Localized string messages
//!
//! The engine treats message bundles as opaque lookups. They are only used to
//! render the result signifier of a query result.

use crate::error::{Error, Result};
use crate::management::ChangeTracker;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Language tag such as `en` or `de-DE`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale(String);

impl Locale {
    /// Parse a language tag
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        let valid = !tag.is_empty()
            && tag.split(['-', '_']).all(|part| {
                !part.is_empty() && part.len() <= 8 && part.chars().all(|c| c.is_ascii_alphanumeric())
            });
        if !valid {
            return Err(Error::Unresolved {
                component: "locale",
                identifier: tag,
            });
        }
        Ok(Self(tag))
    }

    /// English, the fallback locale
    pub fn english() -> Self {
        Self("en".to_string())
    }

    /// The language tag
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary language subtag (`de` for `de-DE`)
    pub fn language(&self) -> &str {
        self.0.split(['-', '_']).next().unwrap_or(&self.0)
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self::english()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Locale {
    type Error = Error;

    fn try_from(tag: String) -> Result<Self> {
        Self::new(tag)
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.0
    }
}

/// A bundle of localized messages
pub trait StringMessages: Send + Sync {
    /// Message for `key` in `locale`, if the bundle has one
    fn get(&self, locale: &Locale, key: &str) -> Option<String>;

    /// Message for `key`, or the key itself
    fn get_or_key(&self, locale: &Locale, key: &str) -> String {
        self.get(locale, key).unwrap_or_else(|| key.to_string())
    }
}

/// Messages held in memory
///
/// Lookups try the full locale, then its language, then English.
#[derive(Debug, Default, Clone)]
pub struct MapStringMessages {
    messages: HashMap<String, HashMap<String, String>>,
}

impl MapStringMessages {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message
    pub fn with_message(
        mut self,
        locale: &str,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.messages
            .entry(locale.to_string())
            .or_default()
            .insert(key.into(), message.into());
        self
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<String> {
        self.messages.get(locale).and_then(|m| m.get(key)).cloned()
    }
}

impl StringMessages for MapStringMessages {
    fn get(&self, locale: &Locale, key: &str) -> Option<String> {
        self.lookup(locale.as_str(), key)
            .or_else(|| self.lookup(locale.language(), key))
            .or_else(|| self.lookup(Locale::english().as_str(), key))
    }
}

/// Ordered collection of bundles; the first bundle knowing a key wins
#[derive(Default)]
pub struct CompoundStringMessages {
    bundles: RwLock<Vec<Arc<dyn StringMessages>>>,
    changes: ChangeTracker,
}

impl CompoundStringMessages {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bundle; returns whether the collection changed
    pub fn add(&self, bundle: Arc<dyn StringMessages>) -> bool {
        let mut bundles = self.bundles.write();
        if bundles.iter().any(|b| Arc::ptr_eq(b, &bundle)) {
            return false;
        }
        bundles.push(bundle);
        self.changes.touch_if(true)
    }

    /// Remove a bundle; returns whether the collection changed
    pub fn remove(&self, bundle: &Arc<dyn StringMessages>) -> bool {
        let mut bundles = self.bundles.write();
        let before = bundles.len();
        bundles.retain(|b| !Arc::ptr_eq(b, bundle));
        self.changes.touch_if(bundles.len() != before)
    }

    /// Timestamp of the last effective change
    pub fn components_changed_at(&self) -> DateTime<Utc> {
        self.changes.changed_at()
    }
}

impl StringMessages for CompoundStringMessages {
    fn get(&self, locale: &Locale, key: &str) -> Option<String> {
        self.bundles.read().iter().find_map(|b| b.get(locale, key))
    }
}

impl fmt::Debug for CompoundStringMessages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundStringMessages")
            .field("bundles", &self.bundles.read().len())
            .finish()
    }
}
