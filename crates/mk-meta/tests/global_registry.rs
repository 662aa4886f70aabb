//! Lifecycle of the process-wide registry.

use std::sync::Arc;

use mk_meta::{init, install, registry, shutdown, TypeRegistry, Value};

#[test]
fn init_shutdown_cycle() {
    let first = init();
    assert!(Arc::ptr_eq(&first, &registry()));
    assert_eq!(first.convert_to::<i64>(&Value::new(3_i32)), Ok(3));

    shutdown();
    let second = registry();
    assert!(!Arc::ptr_eq(&first, &second));

    let custom = Arc::new(TypeRegistry::new());
    install(Arc::clone(&custom));
    assert!(Arc::ptr_eq(&custom, &registry()));
    assert!(registry().convert_to::<i64>(&Value::new(3_i32)).is_err());

    shutdown();
    assert!(registry().convert_to::<i64>(&Value::new(3_i32)).is_ok());
}
