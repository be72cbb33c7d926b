use fibre_beans::{BeanDefinition, BeanFactoryBuilder, FactoryConfig, LockMode};
use pretty_assertions::assert_eq;

#[test]
fn test_partial_config_falls_back_to_defaults() {
  // Arrange
  let json = r#"{ "allow_circular_references": false, "lock_mode": "lenient" }"#;

  // Act
  let config: FactoryConfig = serde_json::from_str(json).unwrap();

  // Assert
  assert_eq!(
    config,
    FactoryConfig {
      allow_circular_references: false,
      lock_mode: LockMode::Lenient,
      ..FactoryConfig::default()
    }
  );
}

#[test]
fn test_lock_modes_use_snake_case_names() {
  let config = FactoryConfig {
    bootstrap_lock_mode: LockMode::Unlocked,
    ..FactoryConfig::default()
  };

  let json = serde_json::to_value(&config).unwrap();

  assert_eq!(json["bootstrap_lock_mode"], "unlocked");
  assert_eq!(json["lock_mode"], "blocking");
  assert_eq!(json["suppressed_error_limit"], 100);
}

#[test]
fn test_unknown_lock_mode_is_rejected() {
  let result = serde_json::from_str::<FactoryConfig>(r#"{ "lock_mode": "optimistic" }"#);

  assert!(result.is_err());
}

#[test]
fn test_factory_built_from_deserialized_config() {
  // Arrange
  let config: FactoryConfig =
    serde_json::from_str(r#"{ "allow_definition_overriding": false, "suppressed_error_limit": 5 }"#).unwrap();

  // Act
  let factory = BeanFactoryBuilder::from_config(config.clone())
    .definition("answer", BeanDefinition::new().with_supplier(|| Ok(42u32)))
    .build()
    .unwrap();

  // Assert
  assert_eq!(factory.config(), &config);
  assert!(factory
    .register_definition("answer", BeanDefinition::new().with_supplier(|| Ok(0u32)))
    .is_err());
  assert_eq!(*factory.get_typed::<u32>("answer").unwrap(), 42);
}
