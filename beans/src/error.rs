use std::error::Error as StdError;

use thiserror::Error;

/// A boxed error returned by user-supplied callbacks (suppliers, setters,
/// init and destroy methods, post-processors).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

const IN_CREATION_MESSAGE: &str = "Requested bean is currently in creation: \
  Is there an unresolvable circular reference or an asynchronous initialization dependency?";

/// The error type for every fallible operation of the bean runtime.
#[derive(Debug, Error)]
pub enum BeanError {
  /// A true circularity that early exposure cannot break, e.g. a constructor
  /// argument cycle or a declared depends-on cycle.
  #[error("Error creating bean with name '{name}': {message}")]
  CurrentlyInCreation { name: String, message: String },

  /// Any failure during instantiation, population or initialization.
  #[error("Error creating bean with name '{name}': {message}")]
  CreationFailed {
    name: String,
    message: String,
    #[source]
    source: Option<BoxError>,
    /// Errors that were tolerated while this bean was being created.
    related: Vec<BeanError>,
  },

  #[error("No bean named '{name}' available")]
  NoSuchDefinition { name: String },

  #[error("Could not register object under bean name '{name}': there is already an object bound")]
  AlreadyRegistered { name: String },

  #[error(
    "Singleton bean creation of '{name}' not allowed while singletons of this factory are in destruction"
  )]
  DestructionInProgress { name: String },

  #[error(
    "Cannot register alias '{alias}' for name '{name}': Circular reference - '{name}' is a direct or indirect alias for '{alias}' already"
  )]
  AliasCircularity { alias: String, name: String },

  #[error("Cannot define alias '{alias}' for name '{name}': It is already registered for name '{existing}'")]
  AliasOverride {
    alias: String,
    name: String,
    existing: String,
  },

  #[error("No alias '{alias}' registered")]
  NoSuchAlias { alias: String },

  #[error("Invalid bean definition with name '{name}': {message}")]
  DefinitionStore { name: String, message: String },

  #[error("Bean definition '{name}' is abstract and cannot be instantiated")]
  IsAbstract { name: String },

  #[error("Bean named '{name}' is expected to be of type '{expected}'")]
  NotOfRequiredType { name: String, expected: &'static str },

  #[error("Scope '{scope}' for bean '{name}': {message}")]
  Scope {
    name: String,
    scope: String,
    message: String,
  },
}

/// A specialized `Result` type for bean runtime operations.
pub type Result<T, E = BeanError> = std::result::Result<T, E>;

impl BeanError {
  pub fn in_creation(name: impl Into<String>) -> Self {
    BeanError::CurrentlyInCreation {
      name: name.into(),
      message: IN_CREATION_MESSAGE.to_owned(),
    }
  }

  pub fn creation(name: impl Into<String>, message: impl Into<String>) -> Self {
    BeanError::CreationFailed {
      name: name.into(),
      message: message.into(),
      source: None,
      related: Vec::new(),
    }
  }

  pub fn creation_caused_by(
    name: impl Into<String>,
    message: impl Into<String>,
    source: impl Into<BoxError>,
  ) -> Self {
    BeanError::CreationFailed {
      name: name.into(),
      message: message.into(),
      source: Some(source.into()),
      related: Vec::new(),
    }
  }

  /// Wraps `err` with the context of `name`, unless it already describes a
  /// creation failure of that very bean.
  pub fn wrap(name: &str, err: BeanError) -> Self {
    if err.is_creation_failure_of(name) {
      return err;
    }
    let message = err.to_string();
    BeanError::creation_caused_by(name, message, err)
  }

  /// The bean name this error is about, if any.
  pub fn bean_name(&self) -> Option<&str> {
    match self {
      BeanError::CurrentlyInCreation { name, .. }
      | BeanError::CreationFailed { name, .. }
      | BeanError::NoSuchDefinition { name }
      | BeanError::AlreadyRegistered { name }
      | BeanError::DestructionInProgress { name }
      | BeanError::AliasCircularity { name, .. }
      | BeanError::AliasOverride { name, .. }
      | BeanError::DefinitionStore { name, .. }
      | BeanError::IsAbstract { name }
      | BeanError::NotOfRequiredType { name, .. }
      | BeanError::Scope { name, .. } => Some(name),
      BeanError::NoSuchAlias { .. } => None,
    }
  }

  /// Errors that were suppressed during the creation attempt this error ended.
  pub fn related_causes(&self) -> &[BeanError] {
    match self {
      BeanError::CreationFailed { related, .. } => related,
      _ => &[],
    }
  }

  pub(crate) fn add_related(&mut self, cause: BeanError) {
    if let BeanError::CreationFailed { related, .. } = self {
      related.push(cause);
    }
  }

  /// Returns `true` if this error, or any error in its source chain, is a
  /// [`BeanError::CurrentlyInCreation`].
  pub fn is_caused_by_circularity(&self) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(self);
    while let Some(err) = current {
      if let Some(BeanError::CurrentlyInCreation { .. }) = err.downcast_ref::<BeanError>() {
        return true;
      }
      current = err.source();
    }
    false
  }

  fn is_creation_failure_of(&self, bean: &str) -> bool {
    matches!(self, BeanError::CreationFailed { name, .. } if name == bean)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn wrap_keeps_errors_that_already_name_the_bean() {
    let err = BeanError::creation("a", "boom");
    let wrapped = BeanError::wrap("a", err);
    assert!(matches!(wrapped, BeanError::CreationFailed { ref message, .. } if message == "boom"));
  }

  #[test]
  fn circularity_is_found_through_the_source_chain() {
    let inner = BeanError::in_creation("a");
    let middle = BeanError::wrap("b", inner);
    let outer = BeanError::wrap("a", middle);
    assert_eq!(outer.bean_name(), Some("a"));
    assert!(outer.is_caused_by_circularity());
    assert!(!BeanError::creation("x", "plain").is_caused_by_circularity());
  }
}
