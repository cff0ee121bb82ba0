//! Service container.
//!
//! Binds one shared instance per type at startup. The container is frozen
//! once built and handed to every handler through its
//! [`RequestContext`](crate::handler::RequestContext).
//!
//! ```
//! use std::sync::Arc;
//! use aonbas_server::services::ServiceContainer;
//!
//! struct Greeter(&'static str);
//!
//! let services = ServiceContainer::builder()
//!     .provide(Greeter("hola"))
//!     .unwrap()
//!     .build();
//!
//! let greeter: Arc<Greeter> = services.require().unwrap();
//! assert_eq!(greeter.0, "hola");
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, ServerError};

type Instance = Arc<dyn Any + Send + Sync>;

/// Immutable type-to-instance table.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    instances: Arc<HashMap<TypeId, Instance>>,
}

impl ServiceContainer {
    /// Start binding services.
    pub fn builder() -> ServiceContainerBuilder {
        ServiceContainerBuilder::default()
    }

    /// Look up the instance bound for `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.instances
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|instance| instance.downcast::<T>().ok())
    }

    /// Like [`get`](Self::get), but a missing binding is an error.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get::<T>()
            .ok_or(ServerError::MissingService(type_name::<T>()))
    }

    /// Number of bound services.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// True if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.instances.len())
            .finish()
    }
}

/// Builder for [`ServiceContainer`].
#[derive(Default)]
pub struct ServiceContainerBuilder {
    instances: HashMap<TypeId, Instance>,
}

impl ServiceContainerBuilder {
    /// Bind `value` as the instance for its type.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::DuplicateService`] if the type is already bound.
    pub fn provide<T: Send + Sync + 'static>(self, value: T) -> Result<Self> {
        self.provide_arc(Arc::new(value))
    }

    /// Bind an already shared instance.
    pub fn provide_arc<T: Send + Sync + 'static>(mut self, value: Arc<T>) -> Result<Self> {
        let key = TypeId::of::<T>();
        if self.instances.contains_key(&key) {
            return Err(ServerError::DuplicateService(type_name::<T>()));
        }
        self.instances.insert(key, value);
        Ok(self)
    }

    /// Freeze the bindings.
    pub fn build(self) -> ServiceContainer {
        ServiceContainer {
            instances: Arc::new(self.instances),
        }
    }
}
