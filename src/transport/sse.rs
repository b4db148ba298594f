//! Incremental Server-Sent-Events parser for the push hub stream.
//!
//! Chunks arrive at arbitrary boundaries; the parser buffers one line at
//! a time and dispatches an event on each blank line.
//!
//! ```text
//! event: UpdateLight\n
//! data: Red\n
//! \n                     ◀── dispatch { event: "UpdateLight", data: "Red" }
//! : keep-alive\n         ◀── comment, ignored
//! ```
//!
//! Lines longer than [`MAX_LINE`] are dropped whole.

/// Longest accepted line, in bytes.
pub const MAX_LINE: usize = 512;

/// One dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseParser {
    line: Vec<u8>,
    overflow: bool,
    event: String,
    data: String,
    has_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, invoking `on_event` for every complete event.
    pub fn feed(&mut self, chunk: &[u8], mut on_event: impl FnMut(SseEvent)) {
        for &b in chunk {
            if b == b'\n' {
                if !self.overflow {
                    let line = core::mem::take(&mut self.line);
                    self.process_line(&line, &mut on_event);
                }
                self.line.clear();
                self.overflow = false;
            } else if self.line.len() >= MAX_LINE {
                self.overflow = true;
            } else {
                self.line.push(b);
            }
        }
    }

    /// Drop any partial line and pending event (after a reconnect).
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn process_line(&mut self, raw: &[u8], on_event: &mut impl FnMut(SseEvent)) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let Ok(line) = core::str::from_utf8(raw) else {
            return;
        };

        if line.is_empty() {
            self.dispatch(on_event);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => value.clone_into(&mut self.event),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            // `id`, `retry` and unknown fields carry nothing we use.
            _ => {}
        }
    }

    fn dispatch(&mut self, on_event: &mut impl FnMut(SseEvent)) {
        if !self.has_data {
            self.event.clear();
            return;
        }
        let event = if self.event.is_empty() {
            "message".to_owned()
        } else {
            core::mem::take(&mut self.event)
        };
        on_event(SseEvent {
            event,
            data: core::mem::take(&mut self.data),
        });
        self.event.clear();
        self.has_data = false;
    }
}
