//! Protected-call bridge
//!
//! CRuby signals errors with a non-local exit: `rb_raise` restores a context
//! saved by the nearest `rb_protect` (or `rb_rescue`, `rb_ensure`, ...) with
//! `longjmp`. Rust frames skipped by that jump never run their destructors,
//! so every unit of work that can raise is written as a [`Thunk`]: a plain
//! `extern "C"` function with no captured state and no locals that need
//! dropping. Everything that owns resources stays outside the thunk, around
//! the protected call.
//!
//! A thunk receives one payload word. When it needs more than one input or
//! has to report more than one output, the caller puts a `#[repr(C)]` block
//! on its own stack and passes a pointer to it through
//! [`protect_with`].
//!
//! After a failed call the in-flight exception lives in `rb_errinfo()` until
//! the next runtime call overwrites it. [`take_pending_error`] has to be the
//! very next thing that touches the runtime; [`protect`] does that for you.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use garnet_sys::*;
use tracing::debug;

use crate::coerce::copy_string_bytes;
use crate::error::{RbError, RbResult};
use crate::value::RbValue;
use crate::vm;

/// A unit of work run under `rb_protect`.
///
/// Thunks must not hold values with destructors: a raise discards their
/// frame without unwinding it.
pub type Thunk = unsafe extern "C" fn(VALUE) -> VALUE;

/// Status word filled in by a protected call. Zero is success; anything
/// else is the tag of the non-local exit that was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectStatus(c_int);

impl ProtectStatus {
    pub const SUCCESS: Self = Self(TAG_NONE);

    pub fn from_raw(raw: c_int) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> c_int {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == TAG_NONE
    }

    /// The exit was an exception raise, so `rb_errinfo()` holds the exception.
    pub fn is_raise(self) -> bool {
        self.0 == TAG_RAISE
    }
}

/// Run `thunk(payload)` under `rb_protect`.
///
/// Returns the thunk's result, or `Qnil` with a non-zero `status` if it
/// exited non-locally. A `None` status slot is replaced by a local, since
/// `rb_protect` reads through the pointer unconditionally. The pending
/// error is left in place for the caller to consume.
///
/// This is the layer thunks themselves use for nested protected calls; it
/// does not check the VM lifecycle.
///
/// # Safety
/// The VM must be ready on the current thread, and `payload` must be what
/// `thunk` expects.
pub unsafe fn protect_raw(thunk: Thunk, payload: VALUE, status: Option<&mut c_int>) -> VALUE {
    let mut fallback: c_int = TAG_NONE;
    let slot = status.unwrap_or(&mut fallback);
    *slot = TAG_NONE;
    // SAFETY: forwarded from the caller
    unsafe { rb_protect(thunk, payload, slot) }
}

/// Run `thunk(payload)` under `rb_protect` and translate a failure into an
/// [`RbError`].
///
/// The returned `VALUE` is unrooted; box it before the next runtime call
/// if it has to outlive this expression.
///
/// # Safety
/// `payload` must be what `thunk` expects.
pub unsafe fn protect(thunk: Thunk, payload: VALUE) -> RbResult<VALUE> {
    vm::ensure_ready()?;

    let mut status: c_int = TAG_NONE;
    // SAFETY: the VM is ready on this thread; payload is forwarded from the caller
    let result = unsafe { protect_raw(thunk, payload, Some(&mut status)) };

    if status == TAG_NONE {
        Ok(result)
    } else {
        // SAFETY: the call above just failed on the ready VM thread
        Err(unsafe { pending_error(ProtectStatus(status)) })
    }
}

/// Run `thunk` with a pointer to `block` as its payload.
///
/// # Safety
/// `thunk` must read the payload as `*mut T`, and must not keep the pointer
/// past its own return.
pub unsafe fn protect_with<T>(thunk: Thunk, block: &mut T) -> RbResult<VALUE> {
    // SAFETY: forwarded from the caller
    unsafe { protect(thunk, block as *mut T as VALUE) }
}

/// Evaluate Ruby source through `rb_eval_string_protect`.
pub fn protect_eval(source: &str) -> RbResult<RbValue> {
    let source = CString::new(source)
        .map_err(|e| RbError::string_encoding(format!("Invalid source: {}", e)))?;
    vm::ensure_ready()?;

    let mut status: c_int = TAG_NONE;
    // SAFETY: source is a valid C string and the VM is ready on this thread
    let result = unsafe { rb_eval_string_protect(source.as_ptr(), &mut status) };

    if status != TAG_NONE {
        // SAFETY: the eval above just failed on the ready VM thread
        return Err(unsafe { pending_error(ProtectStatus(status)) });
    }

    // SAFETY: result came straight from the runtime
    Ok(unsafe { RbValue::from_raw(result) })
}

/// Continue a non-local exit that an inner [`protect_raw`] caught.
///
/// Only valid inside a thunk: the jump lands in the enclosing protected
/// call, which then reports the original error with its own non-zero status.
///
/// # Safety
/// Must be called from a thunk running under `rb_protect`, with the pending
/// error of the inner call still in place.
pub unsafe fn resume_unwind(status: c_int) -> ! {
    // SAFETY: forwarded from the caller
    unsafe { rb_jump_tag(status) }
}

/// Consume the in-flight error left by a failed protected call.
///
/// Boxes the exception, then clears `rb_errinfo()` so a later call does not
/// observe a stale error. Class name and message are fetched through further
/// protected calls; if those raise too, placeholders are used.
///
/// Never sets the VM up. Before setup, after teardown, or on a thread that
/// does not own the VM, the lifecycle error is returned instead and the
/// runtime is left alone.
pub fn take_pending_error(status: ProtectStatus) -> RbError {
    if let Err(err) = vm::check_current() {
        return err;
    }
    // SAFETY: the VM is ready and owned by this thread
    unsafe { pending_error(status) }
}

/// # Safety
/// The VM must be ready on the current thread, and no runtime call may have
/// happened since the protected call that failed with `status`.
unsafe fn pending_error(status: ProtectStatus) -> RbError {
    if !status.is_raise() {
        // SAFETY: resetting the in-flight slot is valid on the VM thread
        unsafe { rb_set_errinfo(garnet_qnil()) };
        debug!(tag = status.raw(), "Protected call exited non-locally");
        return RbError::Jump { tag: status.raw() };
    }

    // SAFETY: errinfo holds the exception raised by the call that just failed
    let exception = unsafe { RbValue::from_raw(rb_errinfo()) };
    // SAFETY: as above
    unsafe { rb_set_errinfo(garnet_qnil()) };

    let (class_name, message) = exception.with_raw(|raw| {
        // SAFETY: the word stays inside this borrow of `exception`
        let raw = unsafe { raw.into_raw() };
        (class_name_of(raw), message_of(raw))
    });
    debug!(class = %class_name, message = %message, "Protected call raised");

    RbError::Exception {
        class_name,
        message,
        exception,
    }
}

/// Class name of a (rooted) exception. Never fails.
fn class_name_of(exception: VALUE) -> String {
    let mut status: c_int = TAG_NONE;
    // SAFETY: class_name_thunk takes the object itself as payload
    let name = unsafe { protect_raw(class_name_thunk, exception, Some(&mut status)) };

    if status != TAG_NONE || name == 0 {
        // SAFETY: discard the secondary error
        unsafe { rb_set_errinfo(garnet_qnil()) };
        return "Exception".to_string();
    }

    // SAFETY: rb_obj_classname returns a NUL-terminated name owned by the class
    unsafe { CStr::from_ptr(name as *const c_char) }
        .to_string_lossy()
        .into_owned()
}

/// Message of a (rooted) exception. Never fails.
fn message_of(exception: VALUE) -> String {
    let mut status: c_int = TAG_NONE;
    // SAFETY: message_thunk takes the object itself as payload
    let message = unsafe { protect_raw(message_thunk, exception, Some(&mut status)) };

    if status != TAG_NONE {
        // SAFETY: discard the secondary error
        unsafe { rb_set_errinfo(garnet_qnil()) };
        return String::new();
    }

    // SAFETY: message_thunk always returns a String; nothing ran since
    let bytes = unsafe { copy_string_bytes(message) };
    String::from_utf8_lossy(&bytes).into_owned()
}

unsafe extern "C" fn class_name_thunk(object: VALUE) -> VALUE {
    unsafe { rb_obj_classname(object) as VALUE }
}

unsafe extern "C" fn message_thunk(exception: VALUE) -> VALUE {
    unsafe {
        let message = rb_funcallv(exception, rb_intern(c"message".as_ptr()), 0, ptr::null());
        rb_obj_as_string(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_success() {
        assert!(ProtectStatus::SUCCESS.is_success());
        assert!(!ProtectStatus::SUCCESS.is_raise());
        assert_eq!(ProtectStatus::from_raw(0), ProtectStatus::SUCCESS);
    }

    #[test]
    fn test_status_raise() {
        let status = ProtectStatus::from_raw(TAG_RAISE);
        assert!(!status.is_success());
        assert!(status.is_raise());
        assert_eq!(status.raw(), 6);
    }

    #[test]
    fn test_status_throw_is_not_raise() {
        let status = ProtectStatus::from_raw(TAG_THROW);
        assert!(!status.is_success());
        assert!(!status.is_raise());
    }
}
