//! Topic strings and the process-wide family registry.
//!
//! A *topic* is the stable, portable name of an event variant or aggregate
//! family: `<module-path>#<qualified-name>`. Topics go on the wire and into
//! storage, so they must never change once events exist; renames are handled
//! by registering an alias from the old string to the new one.
//!
//! The registry is a global, lazily initialised map guarded by a `RwLock`.
//! Domain crates register their aggregate families during their own init
//! routines (or implicitly through [`AggregateRoot::create`]); the engine
//! resolves family topics back to their definitions during rehydration.
//!
//! [`AggregateRoot::create`]: crate::aggregate::AggregateRoot::create

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::aggregate::AggregateRoot;
use crate::error::{Result, SourcingError};
use crate::event::DomainEvent;

//─────────────────────────────
//  Topic strings
//─────────────────────────────

/// Topic of the built-in creation event variant.
pub const CREATED_TOPIC: &str = "vellum_core::event#Created";

/// Topic of the built-in attribute-assignment event variant.
pub const ATTRIBUTE_CHANGED_TOPIC: &str = "vellum_core::event#AttributeChanged";

/// Topic of the built-in terminal discard event variant.
pub const DISCARDED_TOPIC: &str = "vellum_core::event#Discarded";

/// Maximum alias hops followed during resolution.
const MAX_ALIAS_HOPS: usize = 8;

/// Build a topic string from a module path and a qualified name.
pub fn topic_of(module: &str, qualified_name: &str) -> String {
    format!("{module}#{qualified_name}")
}

//─────────────────────────────
//  Aggregate families
//─────────────────────────────

/// Type alias for custom-event mutator functions.
///
/// A mutator folds one user-defined event into aggregate state. Chain
/// verification and version/head advancement are handled by the engine
/// before and after the call; the mutator only applies domain meaning.
pub type Mutator = Arc<dyn Fn(&DomainEvent, &mut AggregateRoot) -> Result<()> + Send + Sync>;

/// Definition of an aggregate family: its originator topic plus the dispatch
/// table mapping user-defined event topics to their mutators.
#[derive(Clone)]
pub struct AggregateFamily {
    topic: String,
    mutators: HashMap<String, Mutator>,
}

impl AggregateFamily {
    /// Define a family named `qualified_name` living in `module`.
    pub fn new(module: &str, qualified_name: &str) -> Self {
        Self {
            topic: topic_of(module, qualified_name),
            mutators: HashMap::new(),
        }
    }

    /// Register a mutator for a user-defined event topic of this family.
    pub fn with_mutator<F>(mut self, event_topic: impl Into<String>, mutator: F) -> Self
    where
        F: Fn(&DomainEvent, &mut AggregateRoot) -> Result<()> + Send + Sync + 'static,
    {
        self.mutators.insert(event_topic.into(), Arc::new(mutator));
        self
    }

    /// The family's originator topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Look up the mutator registered for `event_topic`.
    pub fn mutator(&self, event_topic: &str) -> Option<&Mutator> {
        self.mutators.get(event_topic)
    }

    /// Two definitions conflict when they carry different dispatch tables.
    /// Mutator bodies cannot be compared; the registered topic set stands in
    /// for the definition's identity.
    fn same_shape(&self, other: &AggregateFamily) -> bool {
        self.topic == other.topic
            && self.mutators.len() == other.mutators.len()
            && self.mutators.keys().all(|k| other.mutators.contains_key(k))
    }
}

impl std::fmt::Debug for AggregateFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut topics: Vec<&String> = self.mutators.keys().collect();
        topics.sort_unstable();
        f.debug_struct("AggregateFamily")
            .field("topic", &self.topic)
            .field("mutators", &topics)
            .finish()
    }
}

//─────────────────────────────
//  Process-wide registry
//─────────────────────────────

enum RegistryEntry {
    Family(Arc<AggregateFamily>),
    Alias(String),
}

/// Global registry of aggregate families and topic aliases.
static REGISTRY: Lazy<RwLock<HashMap<String, RegistryEntry>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an aggregate family under its topic.
///
/// Registration is idempotent: registering a definition with the same shape
/// as the existing one is a no-op. A definition with a different dispatch
/// table fails with [`SourcingError::TopicConflict`].
pub fn register_family(family: AggregateFamily) -> Result<Arc<AggregateFamily>> {
    let mut registry = REGISTRY
        .write()
        .map_err(|_| SourcingError::Backend(anyhow::anyhow!("topic registry lock poisoned")))?;

    match registry.get(family.topic()) {
        Some(RegistryEntry::Family(existing)) => {
            if existing.same_shape(&family) {
                Ok(Arc::clone(existing))
            } else {
                Err(SourcingError::TopicConflict(family.topic.clone()))
            }
        }
        Some(RegistryEntry::Alias(_)) => Err(SourcingError::TopicConflict(family.topic.clone())),
        None => {
            let family = Arc::new(family);
            registry.insert(family.topic.clone(), RegistryEntry::Family(Arc::clone(&family)));
            Ok(family)
        }
    }
}

/// Map a legacy topic string onto a canonical one (rename tolerance).
pub fn register_alias(alias: impl Into<String>, canonical: impl Into<String>) -> Result<()> {
    let alias = alias.into();
    let canonical = canonical.into();
    let mut registry = REGISTRY
        .write()
        .map_err(|_| SourcingError::Backend(anyhow::anyhow!("topic registry lock poisoned")))?;

    match registry.get(&alias) {
        Some(RegistryEntry::Alias(existing)) if *existing == canonical => Ok(()),
        Some(_) => Err(SourcingError::TopicConflict(alias)),
        None => {
            registry.insert(alias, RegistryEntry::Alias(canonical));
            Ok(())
        }
    }
}

/// Resolve a family topic (following aliases) to its registered definition.
///
/// Resolution failure is a fatal decode error: it means stored events name
/// an aggregate class this process does not know.
pub fn resolve_family(topic: &str) -> Result<Arc<AggregateFamily>> {
    let registry = REGISTRY
        .read()
        .map_err(|_| SourcingError::Backend(anyhow::anyhow!("topic registry lock poisoned")))?;

    let mut current = topic;
    for _ in 0..MAX_ALIAS_HOPS {
        match registry.get(current) {
            Some(RegistryEntry::Family(family)) => return Ok(Arc::clone(family)),
            Some(RegistryEntry::Alias(next)) => current = next,
            None => break,
        }
    }
    Err(SourcingError::TopicResolution(topic.to_string()))
}

/// Clear the registry. Test hook; production processes register once at
/// startup and never reset.
pub fn reset_topics() {
    if let Ok(mut registry) = REGISTRY.write() {
        registry.clear();
    }
}
