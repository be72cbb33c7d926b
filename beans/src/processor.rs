use crate::core::Bean;
use crate::definition::MergedDefinition;
use crate::error::BoxError;

/// Hooks into the creation and destruction of every bean of a factory.
///
/// Processors run in registration order. Every method has a no-op default, so
/// an implementation only overrides the phases it cares about.
pub trait BeanPostProcessor: Send + Sync {
  /// Called before instantiation. Returning `Some` skips the regular build;
  /// only [`after_initialization`](Self::after_initialization) is applied to the
  /// returned object.
  fn before_instantiation(&self, _definition: &MergedDefinition, _name: &str) -> Result<Option<Bean>, BoxError> {
    Ok(None)
  }

  /// Called once per merged definition, after the first instantiation.
  fn post_process_definition(&self, _definition: &MergedDefinition, _name: &str) -> Result<(), BoxError> {
    Ok(())
  }

  /// Produces the reference handed out to beans that resolve a circular
  /// reference to `bean` before it is fully initialized.
  fn early_reference(&self, bean: Bean, _name: &str) -> Result<Bean, BoxError> {
    Ok(bean)
  }

  /// Called after property population, before the init method.
  fn after_properties_set(&self, bean: Bean, _name: &str) -> Result<Bean, BoxError> {
    Ok(bean)
  }

  /// Called after the init method. May return a wrapper around `bean`.
  fn after_initialization(&self, bean: Bean, _name: &str) -> Result<Bean, BoxError> {
    Ok(bean)
  }

  /// Whether [`before_destruction`](Self::before_destruction) must run for `bean`.
  fn requires_destruction(&self, _bean: &Bean) -> bool {
    false
  }

  fn before_destruction(&self, _bean: &Bean, _name: &str) -> Result<(), BoxError> {
    Ok(())
  }
}
