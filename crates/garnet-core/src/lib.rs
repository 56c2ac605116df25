//! Safe boundary layer for an embedded CRuby VM.
//!
//! This crate provides memory-safe, RAII-based wrappers around
//! the raw CRuby FFI bindings in garnet-sys.
//!
//! Two properties of CRuby shape everything here:
//!
//! - Errors are non-local exits (`longjmp`). Every runtime call that can
//!   raise runs as a destructor-free thunk under `rb_protect`
//!   ([`protect`] module) and comes back as an [`RbError`].
//! - The collector cannot see references held by Rust. Every value kept by
//!   the host sits in a fixed-address cell registered as a GC root
//!   ([`BoxedValue`]), owned by an [`RbValue`] handle.
//!
//! # Example
//!
//! ```no_run
//! use garnet_core::RbValue;
//!
//! garnet_core::setup().unwrap();
//!
//! let value = RbValue::eval("'3'").unwrap();
//! assert_eq!(value.to_u64().unwrap(), 3);
//!
//! let err = RbValue::eval("1 / 0").unwrap_err();
//! assert_eq!(err.class_name(), "ZeroDivisionError");
//!
//! garnet_core::teardown().unwrap();
//! ```
//!
//! # Thread Safety
//!
//! The VM is a process-wide singleton owned by the thread that set it up.
//! [`RbValue`] and [`BoxedValue`] are `!Send` and `!Sync`; lifecycle
//! functions called from another thread fail with [`RbError::WrongThread`].
//!
//! ```compile_fail
//! use garnet_core::RbValue;
//! use std::thread;
//!
//! let value = RbValue::nil();
//! thread::spawn(move || {
//!     let _ = value.is_nil(); // Error: RbValue is !Send
//! });
//! ```
//!
//! ```compile_fail
//! use garnet_core::RbValue;
//! use std::sync::Arc;
//!
//! let value = Arc::new(RbValue::nil());
//! std::thread::spawn(move || {
//!     let _ = value; // Error: RbValue is !Sync
//! });
//! ```
//!
//! # Lifecycle
//!
//! Setup is explicit ([`setup`], [`setup_with`]) or lazy on first use.
//! [`teardown`] is explicit only and final: afterwards every operation fails
//! with [`RbError::TornDown`].

pub mod boxed;
pub mod coerce;
mod config;
mod error;
pub mod protect;
mod value;
pub mod vm;

pub use boxed::{BoxedValue, live_roots};
pub use config::VmConfig;
pub use error::{RbError, RbResult};
pub use protect::{ProtectStatus, Thunk};
pub use value::{IntoRuby, RawValue, RbValue};
pub use vm::{VmPhase, gc_count, gc_start, phase, setup, setup_with, teardown};

// Re-export garnet-sys for direct FFI access when needed
pub use garnet_sys;
