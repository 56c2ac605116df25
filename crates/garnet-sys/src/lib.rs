//! Raw FFI bindings to the CRuby C API
//!
//! This crate provides low-level unsafe bindings to `libruby`.
//! Use the safe wrappers in `garnet-core` for higher-level access.
//!
//! Functions declared here may exit non-locally (`longjmp`) when the runtime
//! raises. Only call raising functions from a thunk running under
//! [`rb_protect`], and keep such thunks free of values with destructors.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use std::os::raw::{c_char, c_double, c_int, c_long, c_longlong, c_ulonglong};

/// Handle to any Ruby object or immediate (`uintptr_t`).
pub type VALUE = usize;
/// Interned method/symbol identifier.
pub type ID = usize;

/// Signature accepted by [`rb_protect`].
pub type rb_protect_func = unsafe extern "C" fn(VALUE) -> VALUE;

/// Block body for [`rb_catch_obj`]: `(yielded, data, argc, argv, blockarg)`.
pub type rb_block_call_func =
    unsafe extern "C" fn(VALUE, VALUE, c_int, *const VALUE, VALUE) -> VALUE;

// Non-local exit tags (`enum ruby_tag_type`)
pub const TAG_NONE: c_int = 0x0;
pub const TAG_RETURN: c_int = 0x1;
pub const TAG_BREAK: c_int = 0x2;
pub const TAG_NEXT: c_int = 0x3;
pub const TAG_RETRY: c_int = 0x4;
pub const TAG_REDO: c_int = 0x5;
pub const TAG_RAISE: c_int = 0x6;
pub const TAG_THROW: c_int = 0x7;
pub const TAG_FATAL: c_int = 0x8;

// Linking is handled by build.rs
unsafe extern "C" {
    // VM lifecycle
    pub fn ruby_init_stack(addr: *mut VALUE);
    pub fn ruby_setup() -> c_int;
    pub fn ruby_cleanup(ex: c_int) -> c_int;
    pub fn ruby_init_loadpath();
    pub fn ruby_script(name: *const c_char);

    // Non-local exits
    pub fn rb_protect(func: rb_protect_func, arg: VALUE, state: *mut c_int) -> VALUE;
    pub fn rb_jump_tag(state: c_int) -> !;
    pub fn rb_errinfo() -> VALUE;
    pub fn rb_set_errinfo(err: VALUE);
    pub fn rb_exc_raise(exception: VALUE) -> !;
    pub fn rb_exc_new_cstr(klass: VALUE, message: *const c_char) -> VALUE;
    pub fn rb_catch_obj(tag: VALUE, func: rb_block_call_func, data: VALUE) -> VALUE;
    pub fn rb_throw_obj(tag: VALUE, value: VALUE) -> !;

    // Evaluation
    pub fn rb_eval_string(src: *const c_char) -> VALUE;
    pub fn rb_eval_string_protect(src: *const c_char, state: *mut c_int) -> VALUE;

    // Garbage collection
    pub fn rb_gc_register_address(addr: *mut VALUE);
    pub fn rb_gc_unregister_address(addr: *mut VALUE);
    pub fn rb_gc();
    pub fn rb_gc_count() -> usize;

    // Numeric coercion
    pub fn rb_Integer(value: VALUE) -> VALUE;
    pub fn rb_Float(value: VALUE) -> VALUE;
    pub fn rb_num2ll(value: VALUE) -> c_longlong;
    pub fn rb_num2ull(value: VALUE) -> c_ulonglong;
    pub fn rb_num2int(value: VALUE) -> c_long;
    pub fn rb_num2dbl(value: VALUE) -> c_double;

    // String coercion
    pub fn rb_check_string_type(value: VALUE) -> VALUE;
    pub fn rb_obj_as_string(value: VALUE) -> VALUE;

    // Value creation
    pub fn rb_ll2inum(n: c_longlong) -> VALUE;
    pub fn rb_ull2inum(n: c_ulonglong) -> VALUE;
    pub fn rb_float_new(d: c_double) -> VALUE;
    pub fn rb_str_new(ptr: *const c_char, len: c_long) -> VALUE;
    pub fn rb_utf8_str_new(ptr: *const c_char, len: c_long) -> VALUE;

    // Introspection and dispatch
    pub fn rb_obj_classname(value: VALUE) -> *const c_char;
    pub fn rb_inspect(value: VALUE) -> VALUE;
    pub fn rb_equal(a: VALUE, b: VALUE) -> VALUE;
    pub fn rb_intern(name: *const c_char) -> ID;
    pub fn rb_funcallv(recv: VALUE, mid: ID, argc: c_int, argv: *const VALUE) -> VALUE;

    // Exception classes
    pub static rb_eRangeError: VALUE;
    pub static rb_eTypeError: VALUE;
    pub static rb_eStandardError: VALUE;
}

// Header-only macros exported by src/shim.c. None of these raise.
unsafe extern "C" {
    pub fn garnet_qnil() -> VALUE;
    pub fn garnet_qtrue() -> VALUE;
    pub fn garnet_qfalse() -> VALUE;
    pub fn garnet_qundef() -> VALUE;

    pub fn garnet_special_const_p(value: VALUE) -> c_int;
    pub fn garnet_nil_p(value: VALUE) -> c_int;
    pub fn garnet_rtest(value: VALUE) -> c_int;

    pub fn garnet_fixnum_p(value: VALUE) -> c_int;
    pub fn garnet_fix2long(value: VALUE) -> c_long;

    pub fn garnet_float_p(value: VALUE) -> c_int;
    pub fn garnet_float_value(value: VALUE) -> c_double;

    pub fn garnet_bignum_p(value: VALUE) -> c_int;
    pub fn garnet_bignum_negative_p(value: VALUE) -> c_int;

    pub fn garnet_string_p(value: VALUE) -> c_int;
    pub fn garnet_rstring_ptr(value: VALUE) -> *const c_char;
    pub fn garnet_rstring_len(value: VALUE) -> c_long;
}
