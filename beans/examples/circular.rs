use fibre_beans::{resolve, Bean, BeanDefinition, BeanFactory, Value};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

// Two services that need each other. Neither can be built first through a
// constructor, but property injection lets the factory hand out an early
// reference to whichever one is still being built.
#[derive(Default)]
struct OrderService {
  billing: OnceLock<Bean>,
}

#[derive(Default)]
struct BillingService {
  orders: OnceLock<Bean>,
}

fn main() {
  // Run with RUST_LOG=fibre_beans=trace to watch the early reference being handed out.
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let factory = BeanFactory::builder()
    .definition(
      "orders",
      BeanDefinition::new()
        .with_supplier(|| Ok(OrderService::default()))
        .with_property("billing", Value::reference("billing"))
        .with_property_setter(|service: &OrderService, _name, value| {
          service.billing.set(value).map_err(|_| "billing already set")?;
          Ok(())
        })
        .with_destroy_method(|_: &OrderService| {
          println!("Shutting down OrderService");
          Ok(())
        }),
    )
    .definition(
      "billing",
      BeanDefinition::new()
        .with_supplier(|| Ok(BillingService::default()))
        .with_property("orders", Value::reference("orders"))
        .with_property_setter(|service: &BillingService, _name, value| {
          service.orders.set(value).map_err(|_| "orders already set")?;
          Ok(())
        })
        .with_destroy_method(|_: &BillingService| {
          println!("Shutting down BillingService");
          Ok(())
        }),
    )
    .build()
    .unwrap();

  factory.preinstantiate_singletons().unwrap();

  let orders = resolve!(factory, OrderService, "orders");
  let billing = resolve!(factory, BillingService, "billing");
  let billing_seen_by_orders = orders.billing.get().unwrap().clone();
  let orders_seen_by_billing = billing.orders.get().unwrap().clone();
  assert!(fibre_beans::same_instance(&billing_seen_by_orders, &factory.get_bean("billing").unwrap()));
  assert!(fibre_beans::same_instance(&orders_seen_by_billing, &factory.get_bean("orders").unwrap()));
  println!("Both services hold the final instance of each other.");

  // "billing" captured "orders", so it is shut down first.
  factory.destroy_singletons();
}
