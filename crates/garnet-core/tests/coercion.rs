//! Numeric and string coercion across the boundary

use garnet_core::{IntoRuby, RbError, RbValue};

fn eval(source: &str) -> RbValue {
    RbValue::eval(source).unwrap()
}

fn assert_raises(result: Result<impl std::fmt::Debug, RbError>, class_name: &str) {
    match result {
        Err(err) => {
            assert!(err.is_exception(), "expected {class_name}, got {err:?}");
            assert_eq!(err.class_name(), class_name);
        }
        Ok(value) => panic!("expected {class_name}, got {value:?}"),
    }
}

#[test]
fn test_coercion() {
    garnet_core::setup().unwrap();

    unsigned_conversions();
    signed_conversions();
    float_conversions();
    string_conversions();
    host_values_into_ruby();

    garnet_core::teardown().unwrap();
}

fn unsigned_conversions() {
    assert_eq!(eval("0").to_u64().unwrap(), 0);
    assert_eq!(eval("'3'").to_u64().unwrap(), 3);
    assert_eq!(eval("3.9").to_u64().unwrap(), 3);
    assert_eq!(eval("2**63").to_u64().unwrap(), 1 << 63);
    assert_eq!(eval("2**64 - 1").to_u64().unwrap(), u64::MAX);
    assert_eq!(
        eval("Class.new { def to_int; 7; end }.new").to_u64().unwrap(),
        7
    );

    assert_raises(eval("-1").to_u64(), "RangeError");
    assert_raises(eval("'-3'").to_u64(), "RangeError");
    assert_raises(eval("-0.5").to_u64(), "RangeError");
    assert_raises(eval("-(2**70)").to_u64(), "RangeError");
    assert_raises(eval("2**64").to_u64(), "RangeError");
    assert_raises(eval("nil").to_u64(), "TypeError");
    assert_raises(eval("'twelve'").to_u64(), "ArgumentError");

    assert_eq!(eval("4294967295").to_u32().unwrap(), u32::MAX);
    assert_raises(eval("2**32").to_u32(), "RangeError");
    assert_raises(eval("-1").to_u32(), "RangeError");

    // errors raised by user conversions come through unchanged
    let err = eval("Class.new { def to_int; raise 'conversion failed'; end }.new")
        .to_u64()
        .unwrap_err();
    assert_eq!(err.class_name(), "RuntimeError");
    assert_eq!(err.message(), Some("conversion failed"));
}

fn signed_conversions() {
    assert_eq!(eval("-5").to_i64().unwrap(), -5);
    assert_eq!(eval("'-12'").to_i64().unwrap(), -12);
    assert_eq!(eval("-(2**63)").to_i64().unwrap(), i64::MIN);
    assert_eq!(eval("2**63 - 1").to_i64().unwrap(), i64::MAX);
    assert_raises(eval("2**63").to_i64(), "RangeError");
    assert_raises(eval("-(2**63) - 1").to_i64(), "RangeError");

    assert_eq!(eval("-(2**31)").to_i32().unwrap(), i32::MIN);
    assert_eq!(eval("2**31 - 1").to_i32().unwrap(), i32::MAX);
    assert_raises(eval("2**31").to_i32(), "RangeError");
    assert_raises(eval("-(2**31) - 1").to_i32(), "RangeError");

    assert_eq!(i64::try_from(&eval("40 + 2")).unwrap(), 42);
    assert!(i32::try_from(&eval("2**40")).is_err());

    let user = eval("Class.new { def to_int; -9; end }.new");
    assert_eq!(user.to_i64().unwrap(), -9);
    assert_eq!(user.to_i32().unwrap(), -9);
    assert_raises(
        eval("Class.new { def to_int; 2**40; end }.new").to_i32(),
        "RangeError",
    );

    let err = eval("Class.new { def to_int; raise 'no integer'; end }.new")
        .to_i64()
        .unwrap_err();
    assert_eq!(err.class_name(), "RuntimeError");
    assert_eq!(err.message(), Some("no integer"));
}

fn float_conversions() {
    assert_eq!(eval("1.5").to_f64().unwrap(), 1.5);
    assert_eq!(eval("3").to_f64().unwrap(), 3.0);
    assert_eq!(eval("'2.25'").to_f64().unwrap(), 2.25);
    assert_eq!(eval("2**64").to_f64().unwrap(), 18446744073709551616.0);
    assert!(eval("Float::NAN").to_f64().unwrap().is_nan());
    assert_eq!(eval("-Float::INFINITY").to_f64().unwrap(), f64::NEG_INFINITY);

    assert_raises(eval("nil").to_f64(), "TypeError");
    assert_raises(eval("'abc'").to_f64(), "ArgumentError");

    let user = eval("Class.new { def to_f; 2.5; end }.new");
    assert_eq!(user.to_f64().unwrap(), 2.5);

    let err = eval("Class.new { def to_f; raise 'no float'; end }.new")
        .to_f64()
        .unwrap_err();
    assert_eq!(err.class_name(), "RuntimeError");
    assert_eq!(err.message(), Some("no float"));
}

fn string_conversions() {
    assert_eq!(eval("'plain'").to_rust_string().unwrap(), "plain");
    assert_eq!(eval("''").to_rust_string().unwrap(), "");
    assert_eq!(eval(":sym").to_rust_string().unwrap(), "sym");
    assert_eq!(eval("12").to_rust_string().unwrap(), "12");

    let both = eval(
        "Class.new do\n\
           def to_str; 'via to_str'; end\n\
           def to_s; 'via to_s'; end\n\
         end.new",
    );
    assert_eq!(both.to_rust_string().unwrap(), "via to_str");

    let to_s_only = eval("Class.new { def to_s; 'via to_s'; end }.new");
    assert_eq!(to_s_only.to_rust_string().unwrap(), "via to_s");

    assert_raises(eval("BasicObject.new").to_bytes(), "NoMethodError");

    let binary = RbValue::from_bytes(&[0xff, 0x00, 0x01]).unwrap();
    assert_eq!(binary.to_bytes().unwrap(), vec![0xff, 0x00, 0x01]);
    assert!(matches!(
        binary.to_rust_string(),
        Err(RbError::StringEncoding(_))
    ));
    assert_eq!(Vec::<u8>::try_from(&binary).unwrap(), vec![0xff, 0x00, 0x01]);
}

fn host_values_into_ruby() {
    let text = RbValue::from_rust_str("héllo wörld").unwrap();
    assert_eq!(text.to_rust_string().unwrap(), "héllo wörld");
    assert_eq!(text.send0("length").unwrap().to_i64().unwrap(), 11);
    assert_eq!(String::try_from(&text).unwrap(), "héllo wörld");

    let max = RbValue::from_u64(u64::MAX).unwrap();
    assert_eq!(max.inspect().unwrap(), "18446744073709551615");
    assert_eq!(max.to_u64().unwrap(), u64::MAX);

    let min = RbValue::from_i64(i64::MIN).unwrap();
    assert_eq!(min.inspect().unwrap(), "-9223372036854775808");

    let half = RbValue::from_f64(0.5).unwrap();
    assert_eq!(half.to_f64().unwrap(), 0.5);
    assert_eq!(half.class_name().unwrap(), "Float");

    assert!(RbValue::from_i64(2).unwrap().equals(&eval("2")).unwrap());
    assert!(RbValue::from_i64(2).unwrap().is_same_object(&eval("2")));
    assert!(!eval("'a'").equals(&eval("'b'")).unwrap());

    assert_eq!(42i32.into_ruby().unwrap().to_i64().unwrap(), 42);
    assert_eq!(7u32.into_ruby().unwrap().to_u32().unwrap(), 7);
    assert!(().into_ruby().unwrap().is_nil());
    assert!(true.into_ruby().unwrap().is_truthy());
    assert!(!false.into_ruby().unwrap().is_truthy());
    assert_eq!(
        "owned".to_string().into_ruby().unwrap().inspect().unwrap(),
        "\"owned\""
    );
}
