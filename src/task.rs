//! Abstraction over "spawn a worker, join it, yield, sleep µs", so the
//! scheduler in [`crate::scheduler`] never names a concrete threading
//! primitive.
//!
//! [`HostedThreads`] is the only implementation usable on a desktop/server
//! target and the only one exercised by this crate's tests. The
//! `freertos`/`threadx`/`zephyr` features gate FFI-only stubs that declare
//! the extern entry points a real RTOS SDK provides and must be linked
//! against a vendor toolchain to do anything; they exist so a downstream
//! crate can implement [`TaskPolicy`] for its target without inventing the
//! trait itself.

use std::thread;
use std::time::Duration;

use tracing::trace;

/// Spawn/join/yield/sleep, pluggable per target.
pub trait TaskPolicy: Send + Sync + 'static {
    /// Handle returned by [`spawn`][TaskPolicy::spawn]; consumed by
    /// [`join`][TaskPolicy::join].
    type JoinHandle: Send;

    /// Starts a worker that runs `f` to completion. One-shot: a given
    /// closure runs exactly once.
    fn spawn<F>(&self, name: &str, f: F) -> Self::JoinHandle
    where
        F: FnOnce() + Send + 'static;

    /// Waits for a spawned worker to finish. When this returns, the
    /// worker's closure has completed and its stack has been reclaimed.
    fn join(&self, handle: Self::JoinHandle);

    /// Voluntarily relinquishes the current worker to the scheduler.
    fn yield_now(&self);

    /// Blocks the current worker for at least `us` microseconds.
    fn sleep_us(&self, us: u64);
}

/// [`TaskPolicy`] backed by `std::thread`, for hosted (desktop/server)
/// targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostedThreads;

impl TaskPolicy for HostedThreads {
    type JoinHandle = thread::JoinHandle<()>;

    fn spawn<F>(&self, name: &str, f: F) -> Self::JoinHandle
    where
        F: FnOnce() + Send + 'static,
    {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .expect("failed to spawn flowgraph worker thread")
    }

    fn join(&self, handle: Self::JoinHandle) {
        if let Err(payload) = handle.join() {
            trace!(?payload, "flowgraph worker thread panicked");
        }
    }

    fn yield_now(&self) {
        thread::yield_now();
    }

    fn sleep_us(&self, us: u64) {
        thread::sleep(Duration::from_micros(us));
    }
}

#[cfg(feature = "freertos")]
pub mod freertos {
    //! FFI-only stub. Real use requires linking against a FreeRTOS SDK that
    //! provides these symbols; stack size and priority are build-time
    //! constants, not runtime config.

    use super::TaskPolicy;

    /// Stack size, in words, given to `xTaskCreate` for every spawned
    /// worker.
    pub const STACK_SIZE_WORDS: u32 = 2048;
    /// Priority given to `xTaskCreate` for every spawned worker.
    pub const TASK_PRIORITY: u32 = 2;

    extern "C" {
        fn xTaskCreate(
            task_code: extern "C" fn(*mut core::ffi::c_void),
            name: *const core::ffi::c_char,
            stack_depth: u32,
            parameters: *mut core::ffi::c_void,
            priority: u32,
            created_task: *mut *mut core::ffi::c_void,
        ) -> i32;
        fn vTaskDelete(task: *mut core::ffi::c_void);
        fn taskYIELD();
        fn vTaskDelay(ticks: u32);
    }

    /// Handle to a spawned FreeRTOS task.
    pub struct FreeRtosJoinHandle {
        task: *mut core::ffi::c_void,
        done: *const core::sync::atomic::AtomicBool,
    }

    unsafe impl Send for FreeRtosJoinHandle {}

    /// [`TaskPolicy`] for a FreeRTOS target. Construct after `vTaskStartScheduler`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct FreeRtosTasks;

    impl TaskPolicy for FreeRtosTasks {
        type JoinHandle = FreeRtosJoinHandle;

        fn spawn<F>(&self, _name: &str, f: F) -> Self::JoinHandle
        where
            F: FnOnce() + Send + 'static,
        {
            // A real implementation boxes `f` and a completion flag, passes
            // the pair as `parameters` to `xTaskCreate`, and the trampoline
            // runs `f`, sets the flag, then calls `vTaskDelete(NULL)`.
            unimplemented!("link against a FreeRTOS SDK to spawn real tasks")
        }

        fn join(&self, _handle: Self::JoinHandle) {
            unimplemented!("link against a FreeRTOS SDK to join real tasks")
        }

        fn yield_now(&self) {
            unsafe { taskYIELD() };
        }

        fn sleep_us(&self, us: u64) {
            // FreeRTOS delays in ticks; callers configure `configTICK_RATE_HZ`
            // to get microsecond resolution close enough for this policy.
            unsafe { vTaskDelay(us as u32) };
        }
    }
}

#[cfg(feature = "threadx")]
pub mod threadx {
    //! FFI-only stub for a ThreadX target. Stack size, priority, preemption
    //! threshold, and time slice are build-time constants, matching
    //! `tx_thread_create`'s signature.

    use super::TaskPolicy;

    pub const STACK_SIZE_BYTES: u32 = 4096;
    pub const THREAD_PRIORITY: u32 = 16;
    pub const PREEMPTION_THRESHOLD: u32 = 16;
    pub const TIME_SLICE_TICKS: u32 = 4;

    extern "C" {
        fn tx_thread_create(
            thread_ptr: *mut core::ffi::c_void,
            name: *const core::ffi::c_char,
            entry_function: extern "C" fn(u32),
            entry_input: u32,
            stack_start: *mut core::ffi::c_void,
            stack_size: u32,
            priority: u32,
            preempt_threshold: u32,
            time_slice: u32,
            auto_start: u32,
        ) -> u32;
        fn tx_thread_terminate(thread_ptr: *mut core::ffi::c_void) -> u32;
        fn tx_thread_relinquish();
        fn tx_thread_sleep(ticks: u32) -> u32;
    }

    pub struct ThreadXJoinHandle {
        thread: *mut core::ffi::c_void,
    }

    unsafe impl Send for ThreadXJoinHandle {}

    #[derive(Debug, Default, Clone, Copy)]
    pub struct ThreadXTasks;

    impl TaskPolicy for ThreadXTasks {
        type JoinHandle = ThreadXJoinHandle;

        fn spawn<F>(&self, _name: &str, f: F) -> Self::JoinHandle
        where
            F: FnOnce() + Send + 'static,
        {
            unimplemented!("link against a ThreadX SDK to spawn real threads")
        }

        fn join(&self, _handle: Self::JoinHandle) {
            unimplemented!("link against a ThreadX SDK to join real threads")
        }

        fn yield_now(&self) {
            unsafe { tx_thread_relinquish() };
        }

        fn sleep_us(&self, us: u64) {
            unsafe { tx_thread_sleep(us as u32) };
        }
    }
}

#[cfg(feature = "zephyr")]
pub mod zephyr {
    //! FFI-only stub for a Zephyr target, modeled on `k_thread_create`.

    use super::TaskPolicy;

    pub const STACK_SIZE_BYTES: usize = 1024;
    pub const THREAD_PRIORITY: i32 = 5;

    extern "C" {
        fn k_yield();
        fn k_usleep(us: i32) -> i32;
    }

    pub struct ZephyrJoinHandle {
        thread: *mut core::ffi::c_void,
    }

    unsafe impl Send for ZephyrJoinHandle {}

    #[derive(Debug, Default, Clone, Copy)]
    pub struct ZephyrTasks;

    impl TaskPolicy for ZephyrTasks {
        type JoinHandle = ZephyrJoinHandle;

        fn spawn<F>(&self, _name: &str, f: F) -> Self::JoinHandle
        where
            F: FnOnce() + Send + 'static,
        {
            unimplemented!("link against a Zephyr SDK to spawn real threads")
        }

        fn join(&self, _handle: Self::JoinHandle) {
            unimplemented!("link against a Zephyr SDK to join real threads")
        }

        fn yield_now(&self) {
            unsafe { k_yield() };
        }

        fn sleep_us(&self, us: u64) {
            unsafe { k_usleep(us as i32) };
        }
    }
}
