use fibre_beans::{resolve, BeanDefinition, BeanFactory, Scope};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};

// A simple service that gets a unique ID upon creation.
struct RequestTracker {
  id: usize,
}

// A global, thread-safe counter to generate unique IDs.
static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn tracker() -> Result<RequestTracker, fibre_beans::BoxError> {
  Ok(RequestTracker {
    id: ID_COUNTER.fetch_add(1, Ordering::SeqCst),
  })
}

fn main() {
  let factory = BeanFactory::new();

  // --- Singleton Registration ---
  // This supplier will only be called ONCE.
  factory
    .register_definition(
      "singleton_tracker",
      BeanDefinition::new().with_supplier(|| {
        println!("Creating SINGLETON RequestTracker...");
        tracker()
      }),
    )
    .unwrap();

  // --- Prototype Registration ---
  // This supplier will be called EVERY time the bean is requested.
  factory
    .register_definition(
      "prototype_tracker",
      BeanDefinition::new()
        .with_supplier(|| {
          println!("Creating PROTOTYPE RequestTracker...");
          tracker()
        })
        .with_scope(Scope::Prototype),
    )
    .unwrap();

  println!("--- Resolving Singletons ---");
  let s1 = resolve!(factory, RequestTracker, "singleton_tracker");
  let s2 = resolve!(factory, RequestTracker, "singleton_tracker");
  println!("Singleton 1 ID: {}, Singleton 2 ID: {}", s1.id, s2.id);
  assert_eq!(s1.id, 0);
  assert!(Arc::ptr_eq(&s1, &s2), "Singleton instances should be identical");
  println!("Singleton instances are the same pointer, as expected.\n");

  println!("--- Resolving Prototypes ---");
  let p1 = resolve!(factory, RequestTracker, "prototype_tracker");
  let p2 = resolve!(factory, RequestTracker, "prototype_tracker");
  println!("Prototype 1 ID: {}, Prototype 2 ID: {}", p1.id, p2.id);
  assert_eq!(p1.id, 1);
  assert_eq!(p2.id, 2);
  assert!(!Arc::ptr_eq(&p1, &p2), "Prototype instances should be different");
  println!("Prototype instances are different pointers, as expected.");

  factory.destroy_singletons();
}
