//! Fixed-address GC roots
//!
//! The collector cannot see `VALUE`s held in Rust memory. A [`BoxedValue`]
//! puts the value in its own heap cell and registers that cell's address with
//! `rb_gc_register_address`, so the collector marks (and pins) the object for
//! as long as the box lives. The registration is keyed by address, which is
//! why the cell is a separate allocation that never moves even when the
//! `BoxedValue` itself does, and why duplicating a box registers a new cell
//! instead of sharing the old one.
//!
//! Immediates (nil, true, false, fixnums, flonums, static symbols) are not
//! heap objects and are never registered.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use garnet_sys::*;
use tracing::{trace, warn};

use crate::error::{RbError, RbResult};
use crate::vm;

static LIVE_ROOTS: AtomicUsize = AtomicUsize::new(0);

/// Number of GC roots currently registered through [`BoxedValue`].
pub fn live_roots() -> usize {
    LIVE_ROOTS.load(Ordering::Acquire)
}

/// Whether `value` is an immediate constant that needs no GC tracking
pub fn is_immediate(value: VALUE) -> bool {
    // SAFETY: pure bit test compiled from the Ruby headers
    unsafe { garnet_special_const_p(value) != 0 }
}

/// A `VALUE` in a fixed heap cell, registered as a GC root unless immediate.
///
/// Released exactly once, either explicitly through [`release`](Self::release)
/// or on drop. A released cell holds `Qundef`.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync`: the root set belongs to the VM thread.
pub struct BoxedValue {
    cell: Box<VALUE>,
    rooted: bool,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

impl BoxedValue {
    /// Box `value`, registering it as a GC root if it is a heap object.
    ///
    /// # Safety
    /// `value` must be a live value obtained from the runtime, and the VM
    /// must be ready on the current thread.
    pub unsafe fn acquire(value: VALUE) -> Self {
        let mut cell = Box::new(value);
        let rooted = !is_immediate(value);

        if rooted {
            // SAFETY: the cell is heap allocated and stays put until release
            unsafe { rb_gc_register_address(&mut *cell) };
            let live = LIVE_ROOTS.fetch_add(1, Ordering::AcqRel) + 1;
            trace!(cell = ?(&*cell as *const VALUE), live, "Registered GC root");
        }

        Self {
            cell,
            rooted,
            _not_send: PhantomData,
        }
    }

    /// The stored value. `Qundef` once released.
    pub fn get(&self) -> VALUE {
        *self.cell
    }

    /// Whether this box holds a registered root
    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    /// Whether [`release`](Self::release) already ran
    pub fn is_released(&self) -> bool {
        // SAFETY: constant accessor
        *self.cell == unsafe { garnet_qundef() }
    }

    /// Box the same value again, as an independent root.
    pub fn duplicate(&self) -> RbResult<Self> {
        if self.is_released() {
            return Err(RbError::AlreadyReleased);
        }
        vm::ensure_ready()?;
        // SAFETY: the value is kept alive by our own registration
        Ok(unsafe { Self::acquire(self.get()) })
    }

    /// Unregister the root and poison the cell.
    ///
    /// A second call returns [`RbError::AlreadyReleased`] and leaves the root
    /// set alone. After VM teardown the root set no longer exists, so only
    /// the bookkeeping is undone.
    pub fn release(&mut self) -> RbResult<()> {
        if self.is_released() {
            return Err(RbError::AlreadyReleased);
        }

        if self.rooted {
            if vm::is_live() {
                // SAFETY: this exact address was registered in acquire()
                unsafe { rb_gc_unregister_address(&mut *self.cell) };
            } else {
                warn!("GC root released after VM teardown");
            }
            self.rooted = false;
            let live = LIVE_ROOTS.fetch_sub(1, Ordering::AcqRel) - 1;
            trace!(cell = ?(&*self.cell as *const VALUE), live, "Unregistered GC root");
        }

        // SAFETY: constant accessor
        *self.cell = unsafe { garnet_qundef() };
        Ok(())
    }
}

impl Drop for BoxedValue {
    fn drop(&mut self) {
        // AlreadyReleased is the only possible error and means an explicit release ran
        let _ = self.release();
    }
}

impl fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedValue")
            .field("value", &format_args!("{:#x}", self.get()))
            .field("rooted", &self.rooted)
            .finish()
    }
}
