//! Named, core-pinned threads.
//!
//! ESP-IDF backs `std::thread` with pthreads on top of FreeRTOS tasks.
//! `esp_pthread_set_cfg()` stores a per-thread config (core, priority,
//! stack, name) that the *next* `pthread_create()` from the same thread
//! picks up, so configure and spawn always happen back to back here.
//!
//! Every long-lived thread of the firmware has a [`TaskSpec`] below:
//!
//! | Task     | Core | Prio | Stack | Work                                 |
//! |----------|------|------|-------|--------------------------------------|
//! | `button` | App  | 6    | 4 KB  | GPIO edge wait, debounce             |
//! | `blink`  | App  | 5    | 3 KB  | alert tick onto the queue            |
//! | `poll`   | Pro  | 5    | 10 KB | HTTPS `GET` on every tick            |
//! | `push`   | Pro  | 5    | 10 KB | SSE stream over HTTPS, reconnects    |
//! | `mqtt`   | Pro  | 5    | 8 KB  | MQTT event loop, twin routing        |
//!
//! Network work sits on the protocol core next to lwIP; the engine's
//! producers that must stay responsive sit on the application core.

use std::io;
use std::thread::JoinHandle;

/// CPU core of the ESP32 Xtensa dual-core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// PRO_CPU: WiFi, lwIP, TLS, MQTT.
    Pro = 0,
    /// APP_CPU: engine, button and lamp timing.
    App = 1,
}

/// Placement and sizing of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    /// NUL-terminated; FreeRTOS keeps the pointer.
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_kb: usize,
}

impl TaskSpec {
    pub const fn new(name: &'static str, core: Core, priority: u8, stack_kb: usize) -> Self {
        Self {
            name,
            core,
            priority,
            stack_kb,
        }
    }

    /// Name without the terminator, for logs and `std::thread`.
    pub fn display_name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }
}

pub const BUTTON_TASK: TaskSpec = TaskSpec::new("button\0", Core::App, 6, 4);
pub const BLINK_TASK: TaskSpec = TaskSpec::new("blink\0", Core::App, 5, 3);
pub const POLL_TASK: TaskSpec = TaskSpec::new("poll\0", Core::Pro, 5, 10);
pub const PUSH_TASK: TaskSpec = TaskSpec::new("push\0", Core::Pro, 5, 10);
pub const MQTT_TASK: TaskSpec = TaskSpec::new("mqtt\0", Core::Pro, 5, 8);

/// Spawn `f` on its own thread placed according to `spec`.
#[cfg(target_os = "espidf")]
pub fn spawn_on_core(
    spec: TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    // SAFETY: `spec.name` is `'static` and NUL-terminated, so the pointer
    // outlives the config ESP-IDF keeps for the next pthread_create.
    unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = spec.core as i32;
        cfg.prio = i32::from(spec.priority);
        cfg.stack_size = (spec.stack_kb * 1024) as i32;
        cfg.thread_name = spec.name.as_ptr().cast();
        let ret = esp_idf_sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_sys::ESP_OK as i32 {
            return Err(io::Error::other(format!("esp_pthread_set_cfg failed: {ret}")));
        }
    }

    log::info!(
        "Task '{}' on {:?} (prio {}, {} KB)",
        spec.display_name(),
        spec.core,
        spec.priority,
        spec.stack_kb
    );
    std::thread::Builder::new()
        .name(spec.display_name().into())
        .spawn(f)
}

/// Host: no pinning or priorities; the stack size is still honoured
/// (rounded up to the platform minimum).
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core(
    spec: TaskSpec,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    log::debug!("Task '{}' (sim, {} KB)", spec.display_name(), spec.stack_kb);
    std::thread::Builder::new()
        .name(spec.display_name().into())
        .stack_size(spec.stack_kb * 1024)
        .spawn(f)
}
