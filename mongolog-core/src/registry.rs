//! Explicit transport registration.
//!
//! Logging frameworks look transports up by name. Instead of registering as a side
//! effect of being linked in, a transport is added to a [`TransportRegistry`] by the
//! application's composition root:
//!
//! ```ignore
//! let mut registry = TransportRegistry::new();
//! MongoTransport::<MongoDbBackend>::register(&mut registry);
//!
//! let transport = registry.build("mongodb", TransportOptions::new("mongodb://localhost/app"))?;
//! ```

use std::{collections::HashMap, fmt, sync::Arc};
use tracing::debug;

use crate::{
    backend::LogBackend,
    error::{TransportError, TransportResult},
    options::TransportOptions,
    transport::{MongoTransport, Transport},
};

/// Builds a transport from its options.
pub type TransportFactory =
    Box<dyn Fn(TransportOptions) -> TransportResult<Arc<dyn Transport>> + Send + Sync>;


/// Maps transport names to factories.
#[derive(Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`, returning the factory it replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Option<TransportFactory>
    where
        F: Fn(TransportOptions) -> TransportResult<Arc<dyn Transport>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(transport = %name, "registering transport");

        self.factories.insert(name, Box::new(factory))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names = self.factories.keys().map(String::as_str).collect::<Vec<_>>();
        names.sort_unstable();
        names
    }

    /// Builds the transport registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Configuration`] for unknown names, and whatever the
    /// factory returns otherwise.
    pub fn build(&self, name: &str, options: TransportOptions) -> TransportResult<Arc<dyn Transport>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TransportError::Configuration(format!("Unknown transport: {name}")))?;

        factory(options)
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("transports", &self.names())
            .finish()
    }
}

impl<B: LogBackend> MongoTransport<B> {
    /// Registers this transport under [`MongoTransport::NAME`], building instances
    /// with [`MongoTransport::from_options`].
    pub fn register(registry: &mut TransportRegistry) {
        registry.register(Self::NAME, |options| {
            Ok(Arc::new(Self::from_options(options)?) as Arc<dyn Transport>)
        });
    }
}
