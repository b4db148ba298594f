//! ESP32 time adapter.
//!
//! - **`target_os = "espidf"`**: wraps `esp_timer_get_time()` (monotonic,
//!   microsecond precision) and `gettimeofday()` for wall-clock time once
//!   SNTP has synced.
//! - **`not(target_os = "espidf")`**: `std::time::Instant` and
//!   `SystemTime` for host-side testing.

/// Wall-clock readings before 2020-01-01 mean the clock is not synced.
const EPOCH_2020: u64 = 1_577_836_800;

#[derive(Clone)]
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Milliseconds since boot, wrapping at `u32::MAX` (~49 days).
    /// Button debouncing compares these with `wrapping_sub`.
    #[cfg(target_os = "espidf")]
    pub fn uptime_ms(&self) -> u32 {
        ((unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000) as u32
    }

    /// Milliseconds since boot, wrapping at `u32::MAX` (~49 days).
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    /// Unix time in seconds.  `None` until the wall clock has been synced.
    #[cfg(target_os = "espidf")]
    pub fn unix_time_secs(&self) -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        synced(tv.tv_sec as i64)
    }

    /// Unix time in seconds.  `None` if the host clock is before 2020.
    #[cfg(not(target_os = "espidf"))]
    pub fn unix_time_secs(&self) -> Option<u64> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        synced(now.as_secs() as i64)
    }
}

fn synced(secs: i64) -> Option<u64> {
    let secs = u64::try_from(secs).ok()?;
    (secs >= EPOCH_2020).then_some(secs)
}
