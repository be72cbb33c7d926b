//! Declarative bean definitions and their merged, fully-resolved form.

use crate::core::{bean, same_instance, Arguments, Bean};
use crate::error::BoxError;

use std::any::{type_name, Any};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

pub type Supplier = Arc<dyn Fn() -> Result<Bean, BoxError> + Send + Sync>;
pub type Constructor = Arc<dyn Fn(Arguments) -> Result<Bean, BoxError> + Send + Sync>;
pub type FactoryMethod = Arc<dyn Fn(&Bean, Arguments) -> Result<Bean, BoxError> + Send + Sync>;
pub type PropertySetter = Arc<dyn Fn(&Bean, &str, Bean) -> Result<(), BoxError> + Send + Sync>;
pub type LifecycleMethod = Arc<dyn Fn(&Bean) -> Result<(), BoxError> + Send + Sync>;

/// The lifetime policy of a bean.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
  /// One shared instance per factory.
  Singleton,
  /// A fresh instance for every request.
  Prototype,
  /// Instances managed by a registered [`CustomScope`](crate::CustomScope).
  Custom(String),
}

impl Scope {
  pub const SINGLETON: &'static str = "singleton";
  pub const PROTOTYPE: &'static str = "prototype";

  pub fn parse(name: &str) -> Self {
    match name {
      Self::SINGLETON => Scope::Singleton,
      Self::PROTOTYPE => Scope::Prototype,
      other => Scope::Custom(other.to_owned()),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Scope::Singleton => Self::SINGLETON,
      Scope::Prototype => Self::PROTOTYPE,
      Scope::Custom(name) => name,
    }
  }
}

impl fmt::Display for Scope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// A hint about what part of the application a bean belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
  #[default]
  Application,
  Support,
  Infrastructure,
}

/// A property or constructor-argument value.
#[derive(Clone)]
pub enum Value {
  /// A ready-made object.
  Literal(Bean),
  /// A reference to another bean, resolved through the factory.
  Ref(String),
  /// A reference that is skipped when the target is missing or fails to build.
  OptionalRef(String),
  /// An anonymous bean owned by the bean it is injected into.
  Inner(Arc<BeanDefinition>),
}

impl Value {
  pub fn literal<T: Any + Send + Sync>(value: T) -> Self {
    Value::Literal(bean(value))
  }

  pub fn reference(name: impl Into<String>) -> Self {
    Value::Ref(name.into())
  }

  pub fn optional_reference(name: impl Into<String>) -> Self {
    Value::OptionalRef(name.into())
  }

  pub fn inner(definition: BeanDefinition) -> Self {
    Value::Inner(Arc::new(definition))
  }
}

impl PartialEq for Value {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Value::Literal(a), Value::Literal(b)) => same_instance(a, b),
      (Value::Ref(a), Value::Ref(b)) => a == b,
      (Value::OptionalRef(a), Value::OptionalRef(b)) => a == b,
      (Value::Inner(a), Value::Inner(b)) => Arc::ptr_eq(a, b) || a == b,
      _ => false,
    }
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Literal(_) => f.write_str("Literal(..)"),
      Value::Ref(name) => write!(f, "Ref({name})"),
      Value::OptionalRef(name) => write!(f, "OptionalRef({name})"),
      Value::Inner(def) => f.debug_tuple("Inner").field(def).finish(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
  pub name: String,
  pub value: Value,
}

/// How an instance is produced, resolved once per merged definition.
#[derive(Clone)]
pub enum ConstructionStrategy {
  Supplier(Supplier),
  FactoryMethod {
    factory_bean: String,
    method: FactoryMethod,
  },
  Constructor(Constructor),
}

impl fmt::Debug for ConstructionStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConstructionStrategy::Supplier(_) => f.write_str("Supplier"),
      ConstructionStrategy::FactoryMethod { factory_bean, .. } => f
        .debug_struct("FactoryMethod")
        .field("factory_bean", factory_bean)
        .finish_non_exhaustive(),
      ConstructionStrategy::Constructor(_) => f.write_str("Constructor"),
    }
  }
}

/// A recipe for building a named object.
///
/// Fields left unset inherit from the parent definition when one is named.
#[derive(Clone, Default)]
pub struct BeanDefinition {
  parent_name: Option<String>,
  type_name: Option<&'static str>,
  supplier: Option<Supplier>,
  factory_method: Option<(String, FactoryMethod)>,
  constructor: Option<Constructor>,
  scope: Option<Scope>,
  lazy_init: Option<bool>,
  abstract_flag: bool,
  depends_on: Vec<String>,
  role: Role,
  description: Option<String>,
  constructor_args: Vec<Value>,
  properties: Vec<PropertyValue>,
  property_setter: Option<PropertySetter>,
  init_method: Option<LifecycleMethod>,
  destroy_method: Option<LifecycleMethod>,
}

impl BeanDefinition {
  pub fn new() -> Self {
    Self::default()
  }

  /// A definition inheriting everything it does not set from `parent`.
  pub fn child_of(parent: impl Into<String>) -> Self {
    Self {
      parent_name: Some(parent.into()),
      ..Self::default()
    }
  }

  // --- Construction ---

  /// Builds instances with a no-argument supplier.
  pub fn with_supplier<T, F>(mut self, supplier: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
  {
    self.type_name = Some(type_name::<T>());
    self.supplier = Some(Arc::new(move || supplier().map(bean)));
    self
  }

  /// Builds instances from resolved constructor arguments.
  pub fn with_constructor<T, F>(mut self, constructor: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
  {
    self.type_name = Some(type_name::<T>());
    self.constructor = Some(Arc::new(move |args| constructor(args).map(bean)));
    self
  }

  /// Builds instances by calling `method` on the bean named `factory_bean`.
  pub fn with_factory_method<F, T, M>(mut self, factory_bean: impl Into<String>, method: M) -> Self
  where
    F: Any + Send + Sync,
    T: Any + Send + Sync,
    M: Fn(&F, Arguments) -> Result<T, BoxError> + Send + Sync + 'static,
  {
    self.type_name = Some(type_name::<T>());
    let method: FactoryMethod = Arc::new(move |factory: &Bean, args| {
      let factory = factory
        .downcast_ref::<F>()
        .ok_or_else(|| format!("factory bean is not a {}", type_name::<F>()))?;
      method(factory, args).map(bean)
    });
    self.factory_method = Some((factory_bean.into(), method));
    self
  }

  pub fn with_constructor_arg(mut self, value: Value) -> Self {
    self.constructor_args.push(value);
    self
  }

  // --- Wiring ---

  /// Adds or replaces a property value.
  pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
    let name = name.into();
    match self.properties.iter_mut().find(|p| p.name == name) {
      Some(existing) => existing.value = value,
      None => self.properties.push(PropertyValue { name, value }),
    }
    self
  }

  /// Sets the callback that injects resolved property values into an instance of `T`.
  pub fn with_property_setter<T, F>(mut self, setter: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&T, &str, Bean) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    self.property_setter = Some(Arc::new(move |target: &Bean, name: &str, value| {
      let target = target
        .downcast_ref::<T>()
        .ok_or_else(|| format!("cannot set property '{name}': bean is not a {}", type_name::<T>()))?;
      setter(target, name, value)
    }));
    self
  }

  pub fn with_init_method<T, F>(mut self, init: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    self.init_method = Some(typed_lifecycle(init));
    self
  }

  pub fn with_destroy_method<T, F>(mut self, destroy: F) -> Self
  where
    T: Any + Send + Sync,
    F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
  {
    self.destroy_method = Some(typed_lifecycle(destroy));
    self
  }

  // --- Metadata ---

  pub fn with_scope(mut self, scope: Scope) -> Self {
    self.scope = Some(scope);
    self
  }

  pub fn with_lazy_init(mut self, lazy: bool) -> Self {
    self.lazy_init = Some(lazy);
    self
  }

  pub fn with_abstract(mut self, abstract_flag: bool) -> Self {
    self.abstract_flag = abstract_flag;
    self
  }

  pub fn with_depends_on(mut self, name: impl Into<String>) -> Self {
    self.depends_on.push(name.into());
    self
  }

  pub fn with_role(mut self, role: Role) -> Self {
    self.role = role;
    self
  }

  pub fn with_description(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }

  // --- Accessors ---

  pub fn parent_name(&self) -> Option<&str> {
    self.parent_name.as_deref()
  }

  pub fn type_name(&self) -> Option<&'static str> {
    self.type_name
  }

  pub fn scope(&self) -> Option<&Scope> {
    self.scope.as_ref()
  }

  pub fn is_lazy_init(&self) -> bool {
    self.lazy_init.unwrap_or(false)
  }

  pub fn is_abstract(&self) -> bool {
    self.abstract_flag
  }

  pub fn depends_on(&self) -> &[String] {
    &self.depends_on
  }

  pub fn role(&self) -> Role {
    self.role
  }

  pub fn description(&self) -> Option<&str> {
    self.description.as_deref()
  }

  pub fn constructor_args(&self) -> &[Value] {
    &self.constructor_args
  }

  pub fn properties(&self) -> &[PropertyValue] {
    &self.properties
  }

  pub fn property(&self, name: &str) -> Option<&Value> {
    self.properties.iter().find(|p| p.name == name).map(|p| &p.value)
  }

  pub fn property_setter(&self) -> Option<&PropertySetter> {
    self.property_setter.as_ref()
  }

  pub fn init_method(&self) -> Option<&LifecycleMethod> {
    self.init_method.as_ref()
  }

  pub fn destroy_method(&self) -> Option<&LifecycleMethod> {
    self.destroy_method.as_ref()
  }

  /// Picks the construction strategy: supplier, then factory method, then constructor.
  pub fn construction_strategy(&self) -> Option<ConstructionStrategy> {
    if let Some(supplier) = &self.supplier {
      return Some(ConstructionStrategy::Supplier(supplier.clone()));
    }
    if let Some((factory_bean, method)) = &self.factory_method {
      return Some(ConstructionStrategy::FactoryMethod {
        factory_bean: factory_bean.clone(),
        method: method.clone(),
      });
    }
    self
      .constructor
      .as_ref()
      .map(|c| ConstructionStrategy::Constructor(c.clone()))
  }

  /// Applies every field that `child` specifies on top of `self`.
  pub(crate) fn override_from(&mut self, child: &BeanDefinition) {
    if child.type_name.is_some() {
      self.type_name = child.type_name;
    }
    if child.supplier.is_some() {
      self.supplier = child.supplier.clone();
    }
    if child.factory_method.is_some() {
      self.factory_method = child.factory_method.clone();
    }
    if child.constructor.is_some() {
      self.constructor = child.constructor.clone();
    }
    if child.scope.is_some() {
      self.scope = child.scope.clone();
    }
    if child.lazy_init.is_some() {
      self.lazy_init = child.lazy_init;
    }
    self.abstract_flag = child.abstract_flag;
    self.role = child.role;
    if !child.depends_on.is_empty() {
      self.depends_on = child.depends_on.clone();
    }
    if child.description.is_some() {
      self.description = child.description.clone();
    }
    for (index, value) in child.constructor_args.iter().enumerate() {
      match self.constructor_args.get_mut(index) {
        Some(slot) => *slot = value.clone(),
        None => self.constructor_args.push(value.clone()),
      }
    }
    for property in &child.properties {
      match self.properties.iter_mut().find(|p| p.name == property.name) {
        Some(existing) => existing.value = property.value.clone(),
        None => self.properties.push(property.clone()),
      }
    }
    if child.property_setter.is_some() {
      self.property_setter = child.property_setter.clone();
    }
    if child.init_method.is_some() {
      self.init_method = child.init_method.clone();
    }
    if child.destroy_method.is_some() {
      self.destroy_method = child.destroy_method.clone();
    }
  }

  pub(crate) fn detach_parent(&mut self) {
    self.parent_name = None;
  }

  pub(crate) fn set_scope(&mut self, scope: Scope) {
    self.scope = Some(scope);
  }
}

fn typed_lifecycle<T, F>(callback: F) -> LifecycleMethod
where
  T: Any + Send + Sync,
  F: Fn(&T) -> Result<(), BoxError> + Send + Sync + 'static,
{
  Arc::new(move |target: &Bean| {
    let target = target
      .downcast_ref::<T>()
      .ok_or_else(|| format!("bean is not a {}", type_name::<T>()))?;
    callback(target)
  })
}

fn same_callback<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
  match (a, b) {
    (Some(a), Some(b)) => std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ()),
    (None, None) => true,
    _ => false,
  }
}

impl PartialEq for BeanDefinition {
  fn eq(&self, other: &Self) -> bool {
    self.parent_name == other.parent_name
      && self.type_name == other.type_name
      && self.scope == other.scope
      && self.lazy_init == other.lazy_init
      && self.abstract_flag == other.abstract_flag
      && self.depends_on == other.depends_on
      && self.role == other.role
      && self.description == other.description
      && self.constructor_args == other.constructor_args
      && self.properties == other.properties
      && same_callback(&self.supplier, &other.supplier)
      && same_callback(
        &self.factory_method.as_ref().map(|(_, m)| m.clone()),
        &other.factory_method.as_ref().map(|(_, m)| m.clone()),
      )
      && self.factory_method.as_ref().map(|(n, _)| n) == other.factory_method.as_ref().map(|(n, _)| n)
      && same_callback(&self.constructor, &other.constructor)
      && same_callback(&self.property_setter, &other.property_setter)
      && same_callback(&self.init_method, &other.init_method)
      && same_callback(&self.destroy_method, &other.destroy_method)
  }
}

impl fmt::Debug for BeanDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BeanDefinition")
      .field("parent_name", &self.parent_name)
      .field("type_name", &self.type_name)
      .field("strategy", &self.construction_strategy())
      .field("scope", &self.scope)
      .field("lazy_init", &self.lazy_init)
      .field("abstract", &self.abstract_flag)
      .field("depends_on", &self.depends_on)
      .field("role", &self.role)
      .field("constructor_args", &self.constructor_args)
      .field("properties", &self.properties)
      .field("has_init_method", &self.init_method.is_some())
      .field("has_destroy_method", &self.destroy_method.is_some())
      .finish_non_exhaustive()
  }
}

/// A definition fully resolved against its parent chain, with a concrete scope.
///
/// Shared between concurrent creations of the same name. It can be marked
/// stale, which forces the store to re-merge it on next access while leaving
/// built instances alone.
pub struct MergedDefinition {
  definition: BeanDefinition,
  scope: Scope,
  stale: AtomicBool,
  strategy: OnceCell<Option<ConstructionStrategy>>,
  post_processed: Mutex<bool>,
}

impl MergedDefinition {
  pub(crate) fn new(mut definition: BeanDefinition, scope: Scope) -> Self {
    definition.detach_parent();
    definition.set_scope(scope.clone());
    Self {
      definition,
      scope,
      stale: AtomicBool::new(false),
      strategy: OnceCell::new(),
      post_processed: Mutex::new(false),
    }
  }

  pub fn definition(&self) -> &BeanDefinition {
    &self.definition
  }

  pub fn scope(&self) -> &Scope {
    &self.scope
  }

  pub fn is_singleton(&self) -> bool {
    self.scope == Scope::Singleton
  }

  pub fn is_prototype(&self) -> bool {
    self.scope == Scope::Prototype
  }

  pub fn is_stale(&self) -> bool {
    self.stale.load(Ordering::Acquire)
  }

  pub(crate) fn mark_stale(&self) {
    self.stale.store(true, Ordering::Release);
  }

  /// The resolved construction strategy, computed on first use.
  pub fn strategy(&self) -> Option<&ConstructionStrategy> {
    self
      .strategy
      .get_or_init(|| self.definition.construction_strategy())
      .as_ref()
  }

  pub fn is_post_processed(&self) -> bool {
    *self.post_processed.lock()
  }

  /// Runs `f` the first time this definition is post-processed; later calls
  /// are no-ops. A failing `f` leaves the definition unprocessed.
  pub(crate) fn post_process_once<E>(&self, f: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
    let mut processed = self.post_processed.lock();
    if !*processed {
      f()?;
      *processed = true;
    }
    Ok(())
  }
}

impl Deref for MergedDefinition {
  type Target = BeanDefinition;

  fn deref(&self) -> &BeanDefinition {
    &self.definition
  }
}

impl PartialEq for MergedDefinition {
  fn eq(&self, other: &Self) -> bool {
    self.scope == other.scope && self.definition == other.definition
  }
}

impl fmt::Debug for MergedDefinition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MergedDefinition")
      .field("scope", &self.scope)
      .field("stale", &self.is_stale())
      .field("definition", &self.definition)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn child_overrides_only_what_it_sets() {
    let parent = BeanDefinition::new()
      .with_supplier(|| Ok(1u32))
      .with_scope(Scope::Prototype)
      .with_depends_on("db")
      .with_property("a", Value::reference("x"))
      .with_property("b", Value::reference("y"));
    let child = BeanDefinition::child_of("parent")
      .with_lazy_init(true)
      .with_property("b", Value::reference("z"));

    let mut merged = parent.clone();
    merged.override_from(&child);

    assert_eq!(merged.scope(), Some(&Scope::Prototype));
    assert!(merged.is_lazy_init());
    assert_eq!(merged.depends_on(), ["db".to_owned()]);
    assert_eq!(merged.property("a"), Some(&Value::reference("x")));
    assert_eq!(merged.property("b"), Some(&Value::reference("z")));
    assert!(matches!(
      merged.construction_strategy(),
      Some(ConstructionStrategy::Supplier(_))
    ));
  }

  #[test]
  fn supplier_takes_precedence_over_constructor() {
    let def = BeanDefinition::new()
      .with_constructor(|_| Ok(1u8))
      .with_supplier(|| Ok(2u8));
    assert!(matches!(
      def.construction_strategy(),
      Some(ConstructionStrategy::Supplier(_))
    ));
  }

  #[test]
  fn scope_names_round_trip() {
    assert_eq!(Scope::parse("singleton"), Scope::Singleton);
    assert_eq!(Scope::parse("request"), Scope::Custom("request".into()));
    assert_eq!(Scope::Prototype.to_string(), "prototype");
  }
}
