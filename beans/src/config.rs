use crate::core::LockMode;

const DEFAULT_SUPPRESSED_ERROR_LIMIT: usize = 100;

/// Behavioural switches of a [`BeanFactory`](crate::BeanFactory).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
  feature = "serde",
  derive(serde::Serialize, serde::Deserialize),
  serde(default)
)]
pub struct FactoryConfig {
  /// Expose early references of singletons so that circular property
  /// references can be resolved.
  pub allow_circular_references: bool,
  /// Accept that beans captured the raw version of a bean that was wrapped
  /// afterwards, instead of failing its creation.
  pub allow_raw_injection_despite_wrapping: bool,
  pub allow_definition_overriding: bool,
  pub allow_alias_overriding: bool,
  /// Cache merged definitions before their bean is first created.
  pub cache_bean_metadata: bool,
  /// Lock policy for ordinary bean requests.
  pub lock_mode: LockMode,
  /// Lock policy for [`preinstantiate_singletons`](crate::BeanFactory::preinstantiate_singletons).
  pub bootstrap_lock_mode: LockMode,
  pub suppressed_error_limit: usize,
}

impl Default for FactoryConfig {
  fn default() -> Self {
    Self {
      allow_circular_references: true,
      allow_raw_injection_despite_wrapping: false,
      allow_definition_overriding: true,
      allow_alias_overriding: true,
      cache_bean_metadata: true,
      lock_mode: LockMode::Blocking,
      bootstrap_lock_mode: LockMode::Blocking,
      suppressed_error_limit: DEFAULT_SUPPRESSED_ERROR_LIMIT,
    }
  }
}
