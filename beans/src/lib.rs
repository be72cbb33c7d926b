//! # Fibre Beans
//!
//! A thread-safe managed-object runtime for Rust.
//!
//! Fibre Beans builds named objects ("beans") from declarative definitions,
//! wires them together and tears them down in dependency order. It guarantees
//! at most one instance per singleton name under concurrent access, resolves
//! circular references between singletons through early references, and
//! rejects cycles that cannot be resolved that way.
//!
//! ## Core Concepts
//!
//! - **BeanDefinition**: a recipe for a bean (construction strategy, property
//!   values, scope, depends-on, lifecycle callbacks). Definitions may inherit
//!   from a parent definition.
//! - **BeanFactory**: owns the definitions, the singleton registry, aliases,
//!   custom scopes and post-processors, and runs the creation lifecycle.
//! - **SingletonRegistry**: the instance cache with creation tracking, early
//!   references, the dependency graph and the disposal callbacks.
//! - **BeanPostProcessor**: hooks into instantiation, initialization and destruction.
//!
//! ## Quick Start
//!
//! ```
//! use fibre_beans::{resolve, BeanDefinition, BeanFactory, Value};
//! use std::sync::{Arc, OnceLock};
//!
//! struct Repository {
//!   url: String,
//! }
//!
//! #[derive(Default)]
//! struct Service {
//!   repository: OnceLock<Arc<Repository>>,
//! }
//!
//! let factory = BeanFactory::new();
//! factory
//!   .register_definition(
//!     "repository",
//!     BeanDefinition::new().with_supplier(|| Ok(Repository { url: "mem://".into() })),
//!   )
//!   .unwrap();
//! factory
//!   .register_definition(
//!     "service",
//!     BeanDefinition::new()
//!       .with_supplier(|| Ok(Service::default()))
//!       .with_property("repository", Value::reference("repository"))
//!       .with_property_setter(|service: &Service, _name, value| {
//!         let repository = value.downcast::<Repository>().map_err(|_| "not a repository")?;
//!         let _ = service.repository.set(repository);
//!         Ok(())
//!       }),
//!   )
//!   .unwrap();
//!
//! let service = resolve!(factory, Service, "service");
//! assert_eq!(service.repository.get().unwrap().url, "mem://");
//!
//! factory.destroy_singletons();
//! ```

mod alias;
mod builder;
mod config;
mod core;
mod definition;
mod disposal;
mod error;
mod factory;
mod graph;
mod lifecycle;
mod macros;
mod processor;
mod scope;
mod singleton;
mod store;

pub use alias::AliasRegistry;
pub use builder::BeanFactoryBuilder;
pub use config::FactoryConfig;
pub use crate::core::{bean, downcast, same_instance, Arguments, Bean, CreationContext, CreationId, LockMode};
pub use definition::{
  BeanDefinition, ConstructionStrategy, Constructor, FactoryMethod, LifecycleMethod, MergedDefinition,
  PropertySetter, PropertyValue, Role, Scope, Supplier, Value,
};
pub use disposal::{DisposableBean, DisposableBeanAdapter, DisposalRegistry};
pub use error::{BeanError, BoxError, Result};
pub use factory::BeanFactory;
pub use graph::DependencyGraph;
pub use processor::BeanPostProcessor;
pub use scope::{CustomScope, MapScope};
pub use singleton::{Created, EarlyFactory, SingletonCallback, SingletonRegistry, SingletonState};
pub use store::DefinitionStore;
