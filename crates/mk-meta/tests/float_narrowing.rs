//! Float to integer conversions never clamp.

use mk_meta::{MetaError, TypeRegistry, Value};
use proptest::prelude::*;

#[test]
fn huge_floats_do_not_saturate() {
    let registry = TypeRegistry::with_builtins();
    for value in [1e30_f64, -1e30, 9_223_372_036_854_775_808.0, f64::INFINITY, f64::NAN] {
        assert!(matches!(
            registry.convert_to::<i64>(&Value::new(value)),
            Err(MetaError::BadTypeConversion { .. })
        ));
    }
    assert_eq!(registry.convert_to::<i64>(&Value::new(-9_223_372_036_854_775_808.0_f64)), Ok(i64::MIN));
}

proptest! {
    #[test]
    fn whole_floats_in_range_convert_exactly(value in -(1i64 << 53)..(1i64 << 53)) {
        let registry = TypeRegistry::with_builtins();
        prop_assert_eq!(registry.convert_to::<i64>(&Value::new(value as f64)), Ok(value));
    }

    #[test]
    fn converted_floats_round_trip_or_fail(value in any::<f64>()) {
        let registry = TypeRegistry::with_builtins();
        match registry.convert_to::<i64>(&Value::new(value)) {
            Ok(converted) => prop_assert_eq!(converted as f64, value),
            Err(err) => {
                let rejected = matches!(err, MetaError::BadTypeConversion { .. });
                prop_assert!(rejected);
            }
        }
    }
}
