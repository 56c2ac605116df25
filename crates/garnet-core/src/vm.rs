//! Process-wide VM lifecycle
//!
//! CRuby keeps a single interpreter per process. Its lifecycle is modeled as
//! `Uninitialized -> Ready -> TornDown`, where `TornDown` is terminal: the
//! runtime cannot be set up again after `ruby_cleanup`, so every operation
//! attempted afterwards fails with [`RbError::TornDown`].
//!
//! The thread that performs setup owns the VM. Calls from any other thread
//! fail with [`RbError::WrongThread`].

use std::ffi::CString;
use std::thread::{self, ThreadId};

use garnet_sys::*;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::boxed;
use crate::config::VmConfig;
use crate::error::{RbError, RbResult};
use crate::protect;

/// Lifecycle phase of the embedded VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPhase {
    Uninitialized,
    Ready,
    TornDown,
}

#[derive(Debug)]
struct Lifecycle {
    phase: VmPhase,
    owner: Option<ThreadId>,
}

impl Lifecycle {
    const fn new() -> Self {
        Self {
            phase: VmPhase::Uninitialized,
            owner: None,
        }
    }

    /// Whether `current` may call into a ready VM.
    fn check(&self, current: ThreadId) -> RbResult<()> {
        match self.phase {
            VmPhase::Ready if self.owner == Some(current) => Ok(()),
            VmPhase::Ready => Err(RbError::WrongThread),
            VmPhase::TornDown => Err(RbError::TornDown),
            VmPhase::Uninitialized => Err(RbError::internal("Ruby VM is not set up")),
        }
    }

    /// Returns true when setup has to run now, false when it already ran.
    fn begin_setup(&self, current: ThreadId) -> RbResult<bool> {
        match self.phase {
            VmPhase::Uninitialized => Ok(true),
            VmPhase::Ready => self.check(current).map(|()| false),
            VmPhase::TornDown => Err(RbError::TornDown),
        }
    }

    /// Returns true when `ruby_cleanup` has to run now.
    fn begin_teardown(&self, current: ThreadId) -> RbResult<bool> {
        match self.phase {
            VmPhase::Uninitialized => Ok(false),
            VmPhase::Ready => self.check(current).map(|()| true),
            VmPhase::TornDown => Err(RbError::TornDown),
        }
    }

    fn mark_ready(&mut self, owner: ThreadId) {
        self.phase = VmPhase::Ready;
        self.owner = Some(owner);
    }

    fn mark_torn_down(&mut self) {
        self.phase = VmPhase::TornDown;
    }
}

static LIFECYCLE: Mutex<Lifecycle> = Mutex::new(Lifecycle::new());

/// Current lifecycle phase.
pub fn phase() -> VmPhase {
    LIFECYCLE.lock().phase
}

/// True while the VM is set up and not yet torn down.
pub(crate) fn is_live() -> bool {
    phase() == VmPhase::Ready
}

/// Set up the VM with the default configuration.
///
/// A second call is a no-op success. Fails with [`RbError::TornDown`] after
/// [`teardown`].
pub fn setup() -> RbResult<()> {
    setup_with(&VmConfig::default())
}

/// Set up the VM with `config`. The calling thread becomes the VM owner.
pub fn setup_with(config: &VmConfig) -> RbResult<()> {
    let current = thread::current().id();
    let script_name = CString::new(config.script_name.as_str())
        .map_err(|e| RbError::string_encoding(format!("Invalid script name: {}", e)))?;

    {
        let mut lifecycle = LIFECYCLE.lock();
        if !lifecycle.begin_setup(current)? {
            return Ok(());
        }

        info!(
            script_name = %config.script_name,
            init_loadpath = config.init_loadpath,
            gc_stress = config.gc_stress,
            "Setting up Ruby VM"
        );

        // SAFETY: first and only setup in this process, on the owning thread
        let status = unsafe {
            let mut stack_anchor: VALUE = 0;
            ruby_init_stack(&mut stack_anchor);
            ruby_setup()
        };

        if status != 0 {
            // A half-initialized runtime cannot be retried
            lifecycle.mark_torn_down();
            return Err(RbError::Setup { status });
        }

        lifecycle.mark_ready(current);
    }

    // SAFETY: both thunks accept these payloads; script_name outlives the call
    unsafe {
        protect::protect(set_script_name_thunk, script_name.as_ptr() as VALUE)?;
        if config.init_loadpath {
            protect::protect(init_loadpath_thunk, 0)?;
        }
    }
    if config.gc_stress {
        protect::protect_eval("GC.stress = true")?;
    }

    Ok(())
}

/// Run lazy setup if needed and check that the caller may use the VM.
pub(crate) fn ensure_ready() -> RbResult<()> {
    let current = thread::current().id();
    {
        let lifecycle = LIFECYCLE.lock();
        if lifecycle.phase != VmPhase::Uninitialized {
            return lifecycle.check(current);
        }
    }

    debug!("Ruby VM used before setup, initializing with defaults");
    setup()
}

/// Check that the VM is ready and owned by the caller, without setting it up.
pub(crate) fn check_current() -> RbResult<()> {
    LIFECYCLE.lock().check(thread::current().id())
}

/// Tear down the VM and return the status reported by `ruby_cleanup`.
///
/// Teardown is explicit only; nothing runs it at process exit. Tearing down
/// a VM that was never set up just closes the lifecycle. Any later call,
/// including another `teardown` or `setup`, fails with [`RbError::TornDown`].
pub fn teardown() -> RbResult<i32> {
    let current = thread::current().id();
    let mut lifecycle = LIFECYCLE.lock();

    if !lifecycle.begin_teardown(current)? {
        lifecycle.mark_torn_down();
        info!("Ruby VM closed before setup");
        return Ok(0);
    }

    info!(live_roots = boxed::live_roots(), "Tearing down Ruby VM");

    // SAFETY: the VM is ready and owned by this thread
    let status = unsafe { ruby_cleanup(0) };
    lifecycle.mark_torn_down();

    debug!(status, "Ruby VM torn down");
    Ok(status)
}

/// Run a full collection, as `GC.start` does.
pub fn gc_start() -> RbResult<()> {
    // SAFETY: gc_start_thunk ignores its payload
    unsafe { protect::protect(gc_start_thunk, 0)? };
    Ok(())
}

/// Number of collections the VM has run so far.
pub fn gc_count() -> RbResult<usize> {
    // SAFETY: gc_count_thunk ignores its payload
    let count = unsafe { protect::protect(gc_count_thunk, 0)? };
    Ok(count)
}

unsafe extern "C" fn gc_start_thunk(_: VALUE) -> VALUE {
    unsafe {
        rb_gc();
        garnet_qnil()
    }
}

// The count is a plain integer riding in the result word, not an object
unsafe extern "C" fn gc_count_thunk(_: VALUE) -> VALUE {
    unsafe { rb_gc_count() }
}

unsafe extern "C" fn set_script_name_thunk(name: VALUE) -> VALUE {
    unsafe {
        ruby_script(name as *const std::os::raw::c_char);
        garnet_qnil()
    }
}

unsafe extern "C" fn init_loadpath_thunk(_: VALUE) -> VALUE {
    unsafe {
        ruby_init_loadpath();
        garnet_qnil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn other_thread() -> ThreadId {
        thread::spawn(|| thread::current().id()).join().unwrap()
    }

    #[test]
    fn test_setup_runs_once() {
        let me = thread::current().id();
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.begin_setup(me).unwrap());

        lifecycle.mark_ready(me);
        assert!(!lifecycle.begin_setup(me).unwrap());
        assert!(lifecycle.check(me).is_ok());
    }

    #[test]
    fn test_other_thread_rejected() {
        let me = thread::current().id();
        let mut lifecycle = Lifecycle::new();
        lifecycle.mark_ready(me);

        let other = other_thread();
        assert!(matches!(lifecycle.check(other), Err(RbError::WrongThread)));
        assert!(matches!(lifecycle.begin_setup(other), Err(RbError::WrongThread)));
        assert!(matches!(
            lifecycle.begin_teardown(other),
            Err(RbError::WrongThread)
        ));
    }

    #[test]
    fn test_torn_down_is_terminal() {
        let me = thread::current().id();
        let mut lifecycle = Lifecycle::new();
        lifecycle.mark_ready(me);
        assert!(lifecycle.begin_teardown(me).unwrap());
        lifecycle.mark_torn_down();

        assert!(matches!(lifecycle.check(me), Err(RbError::TornDown)));
        assert!(matches!(lifecycle.begin_setup(me), Err(RbError::TornDown)));
        assert!(matches!(lifecycle.begin_teardown(me), Err(RbError::TornDown)));
    }

    #[test]
    fn test_teardown_before_setup() {
        let me = thread::current().id();
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.begin_teardown(me).unwrap());
        assert!(lifecycle.check(me).is_err());
    }
}
