#![no_main]

use libfuzzer_sys::fuzz_target;
use subapp_expr::{AssignError, Expression, Value, Vars};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let expr = match Expression::parse(text) {
        Ok(expr) => expr,
        Err(err) => {
            assert!(err.offset <= err.source.len());
            return;
        }
    };

    let ctx = Vars::new()
        .with("a", 1)
        .with("s", "text")
        .with("list", Value::array([Value::from(1), Value::from("two")]))
        .with("obj", Value::object([("k", Value::Null)]));
    let _ = expr.evaluate(&ctx);

    let assigned = expr.assign(&ctx, Value::from(true));
    if expr.is_assignable() {
        assert!(!matches!(assigned, Err(AssignError::NotAssignable(_))));
    } else {
        assert!(matches!(assigned, Err(AssignError::NotAssignable(_))));
    }

    let reparsed = Expression::parse(expr.source());
    assert!(reparsed.is_ok());
});
