//! Owned, GC-rooted handle to a Ruby value

use std::fmt;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_long};

use garnet_sys::*;

use crate::boxed::{self, BoxedValue};
use crate::coerce;
use crate::error::{RbError, RbResult};
use crate::protect::{self, protect, protect_with};

/// Scoped borrow of the `VALUE` inside an [`RbValue`].
///
/// Only handed out by [`RbValue::with_raw`] and only valid inside that call.
#[derive(Clone, Copy)]
pub struct RawValue<'a> {
    value: VALUE,
    _borrow: PhantomData<&'a RbValue>,
}

impl RawValue<'_> {
    /// Whether the value is an immediate constant
    pub fn is_immediate(self) -> bool {
        boxed::is_immediate(self.value)
    }

    /// The bare word, for use as a thunk payload or FFI argument.
    ///
    /// # Safety
    /// The word is only kept alive by the borrowed handle. It must not be
    /// used after the enclosing [`RbValue::with_raw`] call returns unless it
    /// was boxed first.
    pub unsafe fn into_raw(self) -> VALUE {
        self.value
    }
}

impl fmt::Debug for RawValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawValue({:#x})", self.value)
    }
}

/// A Ruby value kept alive for as long as this handle exists.
///
/// Owns exactly one [`BoxedValue`]. [`try_clone`](Self::try_clone) registers
/// a second, independent root for the same object.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync` because Ruby objects belong to the VM
/// thread. Cross-thread access causes undefined behavior.
pub struct RbValue {
    boxed: BoxedValue,
}

impl fmt::Debug for RbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RbValue({:#x})", self.boxed.get())
    }
}

impl RbValue {
    /// Take ownership of a raw value, rooting it immediately.
    ///
    /// # Safety
    /// `value` must have come from the runtime and still be live, and the VM
    /// must be ready on the current thread.
    pub unsafe fn from_raw(value: VALUE) -> Self {
        Self {
            // SAFETY: forwarded from the caller
            boxed: unsafe { BoxedValue::acquire(value) },
        }
    }

    fn immediate(value: VALUE) -> Self {
        debug_assert!(boxed::is_immediate(value));
        // SAFETY: immediates are never registered, so no VM access happens
        unsafe { Self::from_raw(value) }
    }

    /// `nil`
    pub fn nil() -> Self {
        // SAFETY: constant accessor
        Self::immediate(unsafe { garnet_qnil() })
    }

    /// `true` or `false`
    pub fn from_bool(b: bool) -> Self {
        // SAFETY: constant accessors
        Self::immediate(unsafe { if b { garnet_qtrue() } else { garnet_qfalse() } })
    }

    /// An Integer
    pub fn from_i64(n: i64) -> RbResult<Self> {
        let mut block = BitsBlock { bits: n as u64 };
        // SAFETY: i64_to_ruby_thunk reads the payload as *mut BitsBlock
        let raw = unsafe { protect_with(i64_to_ruby_thunk, &mut block)? };
        // SAFETY: raw was just returned by the runtime
        Ok(unsafe { Self::from_raw(raw) })
    }

    /// An Integer, possibly a Bignum
    pub fn from_u64(n: u64) -> RbResult<Self> {
        let mut block = BitsBlock { bits: n };
        // SAFETY: u64_to_ruby_thunk reads the payload as *mut BitsBlock
        let raw = unsafe { protect_with(u64_to_ruby_thunk, &mut block)? };
        // SAFETY: raw was just returned by the runtime
        Ok(unsafe { Self::from_raw(raw) })
    }

    /// A Float
    pub fn from_f64(f: f64) -> RbResult<Self> {
        let mut block = BitsBlock { bits: f.to_bits() };
        // SAFETY: f64_to_ruby_thunk reads the payload as *mut BitsBlock
        let raw = unsafe { protect_with(f64_to_ruby_thunk, &mut block)? };
        // SAFETY: raw was just returned by the runtime
        Ok(unsafe { Self::from_raw(raw) })
    }

    /// A UTF-8 String
    pub fn from_rust_str(s: &str) -> RbResult<Self> {
        Self::new_string(s.as_bytes(), utf8_string_thunk)
    }

    /// A binary (ASCII-8BIT) String
    pub fn from_bytes(bytes: &[u8]) -> RbResult<Self> {
        Self::new_string(bytes, binary_string_thunk)
    }

    fn new_string(bytes: &[u8], thunk: protect::Thunk) -> RbResult<Self> {
        let len = c_long::try_from(bytes.len())
            .map_err(|_| RbError::internal("String too long for the runtime"))?;
        let mut block = StringBlock {
            ptr: bytes.as_ptr() as *const c_char,
            len,
        };
        // SAFETY: both string thunks read the payload as *mut StringBlock
        let raw = unsafe { protect_with(thunk, &mut block)? };
        // SAFETY: raw was just returned by the runtime
        Ok(unsafe { Self::from_raw(raw) })
    }

    /// Evaluate Ruby source and return the result
    pub fn eval(source: &str) -> RbResult<Self> {
        protect::protect_eval(source)
    }

    /// Run `f` with a borrow of the raw value.
    ///
    /// The [`RawValue`] is branded with the lifetime of the closure argument,
    /// so it cannot be returned or stored past the call.
    ///
    /// ```compile_fail
    /// use garnet_core::RbValue;
    ///
    /// let value = RbValue::nil();
    /// let leaked = value.with_raw(|raw| raw); // Error: borrow escapes the closure
    /// ```
    pub fn with_raw<R>(&self, f: impl for<'a> FnOnce(RawValue<'a>) -> R) -> R {
        f(RawValue {
            value: self.boxed.get(),
            _borrow: PhantomData,
        })
    }

    /// Whether this is `nil`
    pub fn is_nil(&self) -> bool {
        // SAFETY: pure bit test
        unsafe { garnet_nil_p(self.boxed.get()) != 0 }
    }

    /// Whether this is an immediate constant (not a heap object)
    pub fn is_immediate(&self) -> bool {
        boxed::is_immediate(self.boxed.get())
    }

    /// Ruby truthiness: everything except `nil` and `false`
    pub fn is_truthy(&self) -> bool {
        // SAFETY: pure bit test
        unsafe { garnet_rtest(self.boxed.get()) != 0 }
    }

    /// Whether both handles refer to the same object (`equal?`)
    pub fn is_same_object(&self, other: &RbValue) -> bool {
        self.boxed.get() == other.boxed.get()
    }

    /// Ruby `==`
    pub fn equals(&self, other: &RbValue) -> RbResult<bool> {
        let mut block = PairBlock {
            a: self.boxed.get(),
            b: other.boxed.get(),
        };
        // SAFETY: equal_thunk reads the payload as *mut PairBlock
        let result = unsafe { protect_with(equal_thunk, &mut block)? };
        // SAFETY: pure bit test
        Ok(unsafe { garnet_rtest(result) != 0 })
    }

    /// Name of the object's class
    pub fn class_name(&self) -> RbResult<String> {
        // SAFETY: class_name_thunk takes the object itself as payload
        let name = unsafe { protect(class_name_thunk, self.boxed.get())? };
        if name == 0 {
            return Err(RbError::internal("rb_obj_classname returned null"));
        }
        // SAFETY: NUL-terminated name owned by the class
        let name = unsafe { std::ffi::CStr::from_ptr(name as *const c_char) };
        Ok(name.to_string_lossy().into_owned())
    }

    /// `inspect`
    pub fn inspect(&self) -> RbResult<String> {
        // SAFETY: inspect_thunk takes the object itself as payload
        let string = unsafe { protect(inspect_thunk, self.boxed.get())? };
        // SAFETY: inspect_thunk returns a String; nothing ran since
        let bytes = unsafe { coerce::copy_string_bytes(string) };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Call a method that takes no arguments
    pub fn send0(&self, method: &str) -> RbResult<RbValue> {
        let method = std::ffi::CString::new(method)
            .map_err(|e| RbError::string_encoding(format!("Invalid method name: {}", e)))?;
        let mut block = SendBlock {
            recv: self.boxed.get(),
            method: method.as_ptr(),
        };
        // SAFETY: send0_thunk reads the payload as *mut SendBlock
        let raw = unsafe { protect_with(send0_thunk, &mut block)? };
        // SAFETY: raw was just returned by the runtime
        Ok(unsafe { Self::from_raw(raw) })
    }

    /// Convert to `u64`; negatives and overflow raise `RangeError`
    pub fn to_u64(&self) -> RbResult<u64> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_u64(self.boxed.get()) }
    }

    /// Convert to `u32`; negatives and overflow raise `RangeError`
    pub fn to_u32(&self) -> RbResult<u32> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_u32(self.boxed.get()) }
    }

    /// Convert to `i64`; overflow raises `RangeError`
    pub fn to_i64(&self) -> RbResult<i64> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_i64(self.boxed.get()) }
    }

    /// Convert to `i32`; overflow raises `RangeError`
    pub fn to_i32(&self) -> RbResult<i32> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_i32(self.boxed.get()) }
    }

    /// Convert to `f64` with `Kernel#Float` semantics
    pub fn to_f64(&self) -> RbResult<f64> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_f64(self.boxed.get()) }
    }

    /// Bytes of `to_str`, or of `to_s` when `to_str` is missing
    pub fn to_bytes(&self) -> RbResult<Vec<u8>> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_bytes(self.boxed.get()) }
    }

    /// Like [`to_bytes`](Self::to_bytes), validated as UTF-8
    pub fn to_rust_string(&self) -> RbResult<String> {
        // SAFETY: rooted by self.boxed
        unsafe { coerce::to_string(self.boxed.get()) }
    }

    /// Register an independent root for the same object.
    ///
    /// Fails with [`RbError::TornDown`] once the VM is gone.
    pub fn try_clone(&self) -> RbResult<Self> {
        if self.is_immediate() {
            return Ok(Self::immediate(self.boxed.get()));
        }
        Ok(Self {
            boxed: self.boxed.duplicate()?,
        })
    }

    /// Release the root now instead of on drop
    pub fn release(mut self) -> RbResult<()> {
        self.boxed.release()
    }
}

/// Host values that can become Ruby values
pub trait IntoRuby {
    fn into_ruby(self) -> RbResult<RbValue>;
}

impl IntoRuby for RbValue {
    fn into_ruby(self) -> RbResult<RbValue> {
        Ok(self)
    }
}

impl IntoRuby for () {
    fn into_ruby(self) -> RbResult<RbValue> {
        Ok(RbValue::nil())
    }
}

impl IntoRuby for bool {
    fn into_ruby(self) -> RbResult<RbValue> {
        Ok(RbValue::from_bool(self))
    }
}

impl IntoRuby for i64 {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_i64(self)
    }
}

impl IntoRuby for i32 {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_i64(self.into())
    }
}

impl IntoRuby for u64 {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_u64(self)
    }
}

impl IntoRuby for u32 {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_u64(self.into())
    }
}

impl IntoRuby for f64 {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_f64(self)
    }
}

impl IntoRuby for &str {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_rust_str(self)
    }
}

impl IntoRuby for String {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_rust_str(&self)
    }
}

impl IntoRuby for &[u8] {
    fn into_ruby(self) -> RbResult<RbValue> {
        RbValue::from_bytes(self)
    }
}

macro_rules! impl_try_from_value {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl TryFrom<&RbValue> for $ty {
                type Error = RbError;

                fn try_from(value: &RbValue) -> RbResult<Self> {
                    value.$method()
                }
            }
        )*
    };
}

impl_try_from_value! {
    u64 => to_u64,
    u32 => to_u32,
    i64 => to_i64,
    i32 => to_i32,
    f64 => to_f64,
    String => to_rust_string,
    Vec<u8> => to_bytes,
}

/// 64-bit payloads do not fit the payload word on 32-bit targets
#[repr(C)]
struct BitsBlock {
    bits: u64,
}

#[repr(C)]
struct StringBlock {
    ptr: *const c_char,
    len: c_long,
}

#[repr(C)]
struct PairBlock {
    a: VALUE,
    b: VALUE,
}

#[repr(C)]
struct SendBlock {
    recv: VALUE,
    method: *const c_char,
}

unsafe extern "C" fn i64_to_ruby_thunk(payload: VALUE) -> VALUE {
    unsafe { rb_ll2inum((*(payload as *const BitsBlock)).bits as i64) }
}

unsafe extern "C" fn u64_to_ruby_thunk(payload: VALUE) -> VALUE {
    unsafe { rb_ull2inum((*(payload as *const BitsBlock)).bits) }
}

unsafe extern "C" fn f64_to_ruby_thunk(payload: VALUE) -> VALUE {
    unsafe { rb_float_new(f64::from_bits((*(payload as *const BitsBlock)).bits)) }
}

unsafe extern "C" fn utf8_string_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &*(payload as *const StringBlock);
        rb_utf8_str_new(block.ptr, block.len)
    }
}

unsafe extern "C" fn binary_string_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &*(payload as *const StringBlock);
        rb_str_new(block.ptr, block.len)
    }
}

unsafe extern "C" fn equal_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &*(payload as *const PairBlock);
        rb_equal(block.a, block.b)
    }
}

unsafe extern "C" fn class_name_thunk(object: VALUE) -> VALUE {
    unsafe { rb_obj_classname(object) as VALUE }
}

unsafe extern "C" fn inspect_thunk(object: VALUE) -> VALUE {
    unsafe { rb_inspect(object) }
}

unsafe extern "C" fn send0_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &*(payload as *const SendBlock);
        rb_funcallv(block.recv, rb_intern(block.method), 0, std::ptr::null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_immediate() {
        let nil = RbValue::nil();
        assert!(nil.is_nil());
        assert!(nil.is_immediate());
        assert!(!nil.is_truthy());
    }

    #[test]
    fn test_booleans() {
        assert!(RbValue::from_bool(true).is_truthy());
        assert!(!RbValue::from_bool(false).is_truthy());
        assert!(!RbValue::from_bool(false).is_nil());
    }

    #[test]
    fn test_immediate_clone_skips_vm() {
        let value = RbValue::from_bool(true);
        let copy = value.try_clone().unwrap();
        assert!(copy.is_same_object(&value));
    }
}
