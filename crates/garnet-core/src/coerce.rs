//! Numeric and string coercion
//!
//! Ruby's conversions call user-overridable methods (`to_int`, `to_str`,
//! `to_s`, ...), so every conversion runs as a thunk under the protected-call
//! bridge. Range and sign violations are raised as Ruby `RangeError`s from
//! inside the thunk, which sends them down the same error channel as any
//! other exception.
//!
//! Ruby's own narrowing is permissive: `rb_num2ull(-1)` quietly wraps to
//! `u64::MAX`. The unsigned paths therefore classify the sign from the
//! concrete representation first (fixnum, float or bignum) and refuse
//! negatives explicitly.

use std::os::raw::{c_char, c_long};
use std::slice;

use garnet_sys::*;

use crate::error::{RbError, RbResult};
use crate::protect::protect_with;

#[repr(C)]
struct UnsignedBlock {
    value: VALUE,
    out: u64,
}

#[repr(C)]
struct SignedBlock {
    value: VALUE,
    out: i64,
}

#[repr(C)]
struct FloatBlock {
    value: VALUE,
    out: f64,
}

/// `string` keeps the coerced String reachable from this frame until the
/// bytes are copied out.
#[repr(C)]
struct BytesBlock {
    value: VALUE,
    string: VALUE,
    ptr: *const c_char,
    len: c_long,
}

/// Coerce to `u64`, failing with `RangeError` on negatives and overflow.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_u64(value: VALUE) -> RbResult<u64> {
    let mut block = UnsignedBlock { value, out: 0 };
    // SAFETY: to_u64_thunk reads the payload as *mut UnsignedBlock
    unsafe { protect_with(to_u64_thunk, &mut block)? };
    Ok(block.out)
}

/// Coerce to `u32`, failing with `RangeError` on negatives and overflow.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_u32(value: VALUE) -> RbResult<u32> {
    let mut block = UnsignedBlock { value, out: 0 };
    // SAFETY: to_u32_thunk reads the payload as *mut UnsignedBlock
    unsafe { protect_with(to_u32_thunk, &mut block)? };
    // the thunk raised for anything above u32::MAX
    Ok(block.out as u32)
}

/// Coerce to `i64`, failing with `RangeError` when out of range.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_i64(value: VALUE) -> RbResult<i64> {
    let mut block = SignedBlock { value, out: 0 };
    // SAFETY: to_i64_thunk reads the payload as *mut SignedBlock
    unsafe { protect_with(to_i64_thunk, &mut block)? };
    Ok(block.out)
}

/// Coerce to `i32`, failing with `RangeError` when out of range.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_i32(value: VALUE) -> RbResult<i32> {
    let mut block = SignedBlock { value, out: 0 };
    // SAFETY: to_i32_thunk reads the payload as *mut SignedBlock
    unsafe { protect_with(to_i32_thunk, &mut block)? };
    Ok(block.out as i32)
}

/// Coerce through `Kernel#Float` semantics.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_f64(value: VALUE) -> RbResult<f64> {
    let mut block = FloatBlock { value, out: 0.0 };
    // SAFETY: to_f64_thunk reads the payload as *mut FloatBlock
    unsafe { protect_with(to_f64_thunk, &mut block)? };
    Ok(block.out)
}

/// Coerce with `to_str`, falling back to `to_s`, and copy the bytes out.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_bytes(value: VALUE) -> RbResult<Vec<u8>> {
    let mut block = BytesBlock {
        value,
        // SAFETY: constant accessor
        string: unsafe { garnet_qnil() },
        ptr: std::ptr::null(),
        len: 0,
    };
    // SAFETY: to_bytes_thunk reads the payload as *mut BytesBlock
    unsafe { protect_with(to_bytes_thunk, &mut block)? };

    // The pointer is into runtime memory; copy before anything else runs
    if block.ptr.is_null() || block.len <= 0 {
        return Ok(Vec::new());
    }
    // SAFETY: ptr/len describe the string the thunk just produced
    Ok(unsafe { slice::from_raw_parts(block.ptr as *const u8, block.len as usize) }.to_vec())
}

/// Like [`to_bytes`], but the result must be valid UTF-8.
///
/// # Safety
/// `value` must be rooted for the duration of the call.
pub unsafe fn to_string(value: VALUE) -> RbResult<String> {
    // SAFETY: forwarded from the caller
    let bytes = unsafe { to_bytes(value)? };
    String::from_utf8(bytes).map_err(|e| RbError::string_encoding(e.to_string()))
}

/// Copy the bytes of a Ruby String.
///
/// # Safety
/// `string` must be a String, and no runtime call may happen between
/// obtaining it and this copy.
pub(crate) unsafe fn copy_string_bytes(string: VALUE) -> Vec<u8> {
    unsafe {
        if garnet_string_p(string) == 0 {
            return Vec::new();
        }
        let ptr = garnet_rstring_ptr(string);
        let len = garnet_rstring_len(string);
        if ptr.is_null() || len <= 0 {
            return Vec::new();
        }
        slice::from_raw_parts(ptr as *const u8, len as usize).to_vec()
    }
}

// Thunks below run under rb_protect: no owned locals, no destructors.

/// `rb_Integer` until the value is directly inspectable.
unsafe fn normalize_integer(value: VALUE) -> VALUE {
    unsafe {
        let mut num = value;
        while garnet_fixnum_p(num) == 0 && garnet_float_p(num) == 0 && garnet_bignum_p(num) == 0 {
            num = rb_Integer(num);
        }
        num
    }
}

unsafe fn is_negative(num: VALUE) -> bool {
    unsafe {
        if garnet_fixnum_p(num) != 0 {
            garnet_fix2long(num) < 0
        } else if garnet_float_p(num) != 0 {
            garnet_float_value(num) < 0.0
        } else {
            garnet_bignum_negative_p(num) != 0
        }
    }
}

unsafe fn raise_range_error(message: &'static std::ffi::CStr) -> ! {
    unsafe { rb_exc_raise(rb_exc_new_cstr(rb_eRangeError, message.as_ptr())) }
}

unsafe fn unsigned_of(value: VALUE) -> u64 {
    unsafe {
        let num = normalize_integer(value);
        if is_negative(num) {
            raise_range_error(c"can't convert negative number to unsigned integer");
        }
        rb_num2ull(num)
    }
}

unsafe extern "C" fn to_u64_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &mut *(payload as *mut UnsignedBlock);
        block.out = unsigned_of(block.value);
        garnet_qnil()
    }
}

unsafe extern "C" fn to_u32_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &mut *(payload as *mut UnsignedBlock);
        let out = unsigned_of(block.value);
        if out > u32::MAX as u64 {
            raise_range_error(c"integer too big to convert to 32-bit unsigned integer");
        }
        block.out = out;
        garnet_qnil()
    }
}

unsafe extern "C" fn to_i64_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &mut *(payload as *mut SignedBlock);
        block.out = rb_num2ll(normalize_integer(block.value));
        garnet_qnil()
    }
}

unsafe extern "C" fn to_i32_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &mut *(payload as *mut SignedBlock);
        let out = rb_num2int(normalize_integer(block.value)) as i64;
        if out < i32::MIN as i64 || out > i32::MAX as i64 {
            raise_range_error(c"integer out of range of 32-bit signed integer");
        }
        block.out = out;
        garnet_qnil()
    }
}

unsafe extern "C" fn to_f64_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &mut *(payload as *mut FloatBlock);
        block.out = rb_num2dbl(rb_Float(block.value));
        garnet_qnil()
    }
}

unsafe extern "C" fn to_bytes_thunk(payload: VALUE) -> VALUE {
    unsafe {
        let block = &mut *(payload as *mut BytesBlock);
        let mut string = rb_check_string_type(block.value);
        if garnet_nil_p(string) != 0 {
            string = rb_obj_as_string(block.value);
        }
        block.string = string;
        block.ptr = garnet_rstring_ptr(string);
        block.len = garnet_rstring_len(string);
        string
    }
}
