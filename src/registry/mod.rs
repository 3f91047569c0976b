//! Keyed capability registries for scrapers and validators.
//!
//! A [`CapabilityRegistry`] maps a string key to a factory that builds a
//! capability object (`Box<dyn Scraper>`, `Box<dyn Validator>`, ...). It is
//! filled once at startup through `&mut self`, either one entry at a time or
//! from a static plugin catalog via [`CapabilityRegistry::discover`], and is
//! then shared as `Arc<CapabilityRegistry<..>>`. Once shared nothing can
//! mutate it, so lookups need no locking.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use docsync_core::registry::CapabilityRegistry;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self) -> String { "hello".into() }
//! }
//!
//! let mut registry: CapabilityRegistry<dyn Greeter> = CapabilityRegistry::new("greeter");
//! registry.register("en", Arc::new(|_: &()| Ok(Box::new(English) as Box<dyn Greeter>)));
//! let registry = Arc::new(registry);
//!
//! let greeter = registry.resolve("en", &()).unwrap();
//! assert_eq!(greeter.greet(), "hello");
//! assert!(registry.resolve("fr", &()).is_err());
//! ```

mod error;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

pub use error::RegistryError;

/// Builds a capability instance from construction arguments `A`.
///
/// Returns a human-readable reason when construction fails.
pub type Factory<T, A> = Arc<dyn Fn(&A) -> Result<Box<T>, String> + Send + Sync>;

/// One entry in a compile-time plugin catalog.
pub struct PluginDescriptor<T: ?Sized, A = ()> {
    /// Registry key the plugin registers under.
    pub key: &'static str,
    /// File extensions the plugin claims (validators); empty for scrapers.
    pub extensions: &'static [&'static str],
    /// Loads the plugin's factory; an `Err` is logged and the plugin skipped.
    pub load: fn() -> Result<Factory<T, A>, String>,
}

impl<T: ?Sized, A> fmt::Debug for PluginDescriptor<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("key", &self.key)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

struct Registration<T: ?Sized, A> {
    factory: Factory<T, A>,
    extensions: Vec<String>,
    seq: u64,
}

/// Keyed registry of capability factories.
///
/// `T` is the capability trait object; `A` is what factories receive when an
/// instance is resolved (a scraper context, or `()` for validators).
pub struct CapabilityRegistry<T: ?Sized, A = ()> {
    kind: &'static str,
    entries: HashMap<String, Registration<T, A>>,
    by_extension: HashMap<String, String>,
    next_seq: u64,
}

impl<T: ?Sized, A> CapabilityRegistry<T, A> {
    /// Creates an empty registry; `kind` names the capability in logs and errors.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            by_extension: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Capability name used in logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Registers `factory` under `key`, replacing any earlier registration.
    pub fn register(&mut self, key: impl Into<String>, factory: Factory<T, A>) {
        self.register_with_extensions(key, &[], factory);
    }

    /// Registers `factory` under `key` and claims `extensions` for it.
    ///
    /// When two registrations claim the same extension, the later one wins.
    #[instrument(skip(self, key, extensions, factory), fields(kind = self.kind))]
    pub fn register_with_extensions(
        &mut self,
        key: impl Into<String>,
        extensions: &[&str],
        factory: Factory<T, A>,
    ) {
        let key = key.into();
        let seq = self.next_seq;
        self.next_seq += 1;

        let registration = Registration {
            factory,
            extensions: extensions.iter().map(|e| normalize_extension(e)).collect(),
            seq,
        };
        if self.entries.insert(key.clone(), registration).is_some() {
            warn!(kind = self.kind, key = %key, "replacing existing registration");
        } else {
            debug!(kind = self.kind, key = %key, "registered");
        }
        self.rebuild_extension_map();
    }

    /// Registers every loadable plugin in `catalog`, skipping keys in `disabled`.
    ///
    /// A plugin whose `load` fails is logged and skipped. Returns how many
    /// plugins were registered.
    #[instrument(skip(self, catalog, disabled), fields(kind = self.kind, candidates = catalog.len()))]
    pub fn discover(&mut self, catalog: &[PluginDescriptor<T, A>], disabled: &[String]) -> usize {
        let mut registered = 0;
        for plugin in catalog {
            if disabled.iter().any(|key| key == plugin.key) {
                info!(kind = self.kind, key = plugin.key, "plugin disabled by configuration");
                continue;
            }
            match (plugin.load)() {
                Ok(factory) => {
                    self.register_with_extensions(plugin.key, plugin.extensions, factory);
                    registered += 1;
                }
                Err(reason) => {
                    warn!(
                        kind = self.kind,
                        key = plugin.key,
                        reason = %reason,
                        "plugin failed to load; continuing"
                    );
                }
            }
        }
        debug!(kind = self.kind, registered, "discovery complete");
        registered
    }

    /// Builds the capability registered under `key`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when nothing is registered under `key`;
    /// [`RegistryError::Construction`] when the factory fails.
    pub fn resolve(&self, key: &str, args: &A) -> Result<Box<T>, RegistryError> {
        let registration = self
            .entries
            .get(key)
            .ok_or_else(|| RegistryError::not_found(self.kind, key))?;
        (registration.factory)(args)
            .map_err(|reason| RegistryError::construction(self.kind, key, reason))
    }

    /// Key of the implementation claiming `extension` (with or without leading dot).
    #[must_use]
    pub fn key_for_extension(&self, extension: &str) -> Option<&str> {
        self.by_extension
            .get(&normalize_extension(extension))
            .map(String::as_str)
    }

    /// Builds the implementation claiming `extension`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] when no implementation claims the extension.
    pub fn resolve_for_extension(&self, extension: &str, args: &A) -> Result<Box<T>, RegistryError> {
        let key = self
            .key_for_extension(extension)
            .ok_or_else(|| RegistryError::not_found(self.kind, normalize_extension(extension)))?;
        self.resolve(key, args)
    }

    /// Returns true if `key` is registered.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys in registration order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keyed: Vec<(&str, u64)> = self
            .entries
            .iter()
            .map(|(key, reg)| (key.as_str(), reg.seq))
            .collect();
        keyed.sort_by_key(|(_, seq)| *seq);
        keyed.into_iter().map(|(key, _)| key).collect()
    }

    /// All claimed extensions, sorted.
    #[must_use]
    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.by_extension.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rebuild_extension_map(&mut self) {
        let mut ordered: Vec<(&String, &Registration<T, A>)> = self.entries.iter().collect();
        ordered.sort_by_key(|(_, reg)| reg.seq);

        let mut by_extension = HashMap::new();
        for (key, registration) in ordered {
            for extension in &registration.extensions {
                if let Some(previous) = by_extension.insert(extension.clone(), key.clone())
                    && previous != *key
                {
                    debug!(
                        kind = self.kind,
                        extension = %extension,
                        previous = %previous,
                        key = %key,
                        "extension claimed by later registration"
                    );
                }
            }
        }
        self.by_extension = by_extension;
    }
}

impl<T: ?Sized, A> fmt::Debug for CapabilityRegistry<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("kind", &self.kind)
            .field("keys", &self.keys())
            .field("extensions", &self.extensions())
            .finish()
    }
}

/// Lowercases and ensures a leading dot (`PDF` → `.pdf`).
#[must_use]
pub fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim().to_lowercase();
    if trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{trimmed}")
    }
}
