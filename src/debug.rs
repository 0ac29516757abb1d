//! Audio-thread safe logging for the limiter.
//!
//! `mbl_log!` formats into a fixed-size entry and pushes it onto a lock-free
//! single-producer ring; nothing allocates or blocks on the audio thread. The
//! ring is drained to `LOG_PATH` from `initialize()`/`reset()`, which run off
//! the audio thread. Without the `debug` feature the macro compiles to
//! nothing but the argument type check.

use std::fmt;

#[cfg(feature = "debug")]
pub mod logger {
    use std::cell::UnsafeCell;
    use std::fmt;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;

    pub const LOG_PATH: &str = "/tmp/mblimiter.log";

    const LOG_CAP: usize = 128;
    const LOG_MSG_MAX: usize = 256;

    #[derive(Copy, Clone)]
    struct LogEntry {
        len: u16,
        bytes: [u8; LOG_MSG_MAX],
    }

    impl Default for LogEntry {
        fn default() -> Self {
            Self {
                len: 0,
                bytes: [0; LOG_MSG_MAX],
            }
        }
    }

    impl fmt::Write for LogEntry {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let used = self.len as usize;
            let mut n = s.len().min(LOG_MSG_MAX - used);
            // Never cut a multi-byte character in half
            while !s.is_char_boundary(n) {
                n -= 1;
            }
            self.bytes[used..used + n].copy_from_slice(&s.as_bytes()[..n]);
            self.len += n as u16;
            Ok(())
        }
    }

    /// Entries dropped on overflow are counted, not blocked on.
    struct LogRing {
        head: AtomicUsize,
        tail: AtomicUsize,
        dropped: AtomicUsize,
        buf: Box<[UnsafeCell<LogEntry>]>,
    }

    // One producer (the audio thread) and one consumer (the drain)
    unsafe impl Sync for LogRing {}

    impl LogRing {
        fn new() -> Self {
            Self {
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
                buf: (0..LOG_CAP)
                    .map(|_| UnsafeCell::new(LogEntry::default()))
                    .collect(),
            }
        }

        fn push(&self, entry: &LogEntry) {
            let head = self.head.load(Ordering::Relaxed);
            let next = (head + 1) % LOG_CAP;
            if next == self.tail.load(Ordering::Acquire) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            unsafe {
                *self.buf[head].get() = *entry;
            }
            self.head.store(next, Ordering::Release);
        }

        fn pop(&self) -> Option<LogEntry> {
            let tail = self.tail.load(Ordering::Relaxed);
            if tail == self.head.load(Ordering::Acquire) {
                return None;
            }
            let entry = unsafe { *self.buf[tail].get() };
            self.tail.store((tail + 1) % LOG_CAP, Ordering::Release);
            Some(entry)
        }
    }

    static LOGGER: OnceLock<LogRing> = OnceLock::new();
    static LOG_ENABLED: AtomicBool = AtomicBool::new(false);

    pub fn init_logger() {
        let _ = LOGGER.get_or_init(LogRing::new);
        LOG_ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn log_args(args: fmt::Arguments) {
        if !LOG_ENABLED.load(Ordering::Relaxed) {
            return;
        }
        if let Some(ring) = LOGGER.get() {
            let mut entry = LogEntry::default();
            let _ = fmt::write(&mut entry, args);
            ring.push(&entry);
        }
    }

    /// Hand every pending message to `sink`, oldest first. Returns how many
    /// messages were lost to overflow since the last drain.
    pub fn drain_with(mut sink: impl FnMut(&str)) -> usize {
        let Some(ring) = LOGGER.get() else {
            return 0;
        };
        while let Some(entry) = ring.pop() {
            let len = entry.len as usize;
            if len > 0 {
                sink(std::str::from_utf8(&entry.bytes[..len]).unwrap_or("<invalid>"));
            }
        }
        ring.dropped.swap(0, Ordering::Relaxed)
    }

    pub fn drain_to_file() {
        if !LOG_ENABLED.load(Ordering::Relaxed) {
            return;
        }
        let Ok(mut file) = OpenOptions::new().create(true).append(true).open(LOG_PATH) else {
            return;
        };
        let dropped = drain_with(|msg| {
            let _ = writeln!(file, "{}", msg);
        });
        if dropped > 0 {
            let _ = writeln!(file, "[{} messages dropped]", dropped);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_ring_round_trip_and_truncation() {
            init_logger();
            let _ = drain_with(|_| {});
            crate::mbl_log!("ring test {}", 4);
            crate::mbl_log!("{}", "x".repeat(LOG_MSG_MAX * 2));

            let mut seen = Vec::new();
            drain_with(|m| seen.push(m.to_string()));
            assert!(seen.iter().any(|m| m == "ring test 4"));
            assert!(seen
                .iter()
                .any(|m| m.len() == LOG_MSG_MAX && m.bytes().all(|b| b == b'x')));
        }

        #[test]
        fn test_truncation_keeps_whole_characters() {
            let mut entry = LogEntry::default();
            let _ = std::fmt::write(&mut entry, format_args!("{}", "€".repeat(LOG_MSG_MAX)));
            let len = entry.len as usize;
            assert_eq!(len, LOG_MSG_MAX / 3 * 3);
            let text = std::str::from_utf8(&entry.bytes[..len]).unwrap();
            assert!(text.chars().all(|c| c == '€'));
        }
    }
}

#[cfg(feature = "debug")]
pub(crate) fn mbl_log_inner(args: fmt::Arguments) {
    logger::log_args(args);
}

#[cfg(not(feature = "debug"))]
pub(crate) fn mbl_log_inner(_args: fmt::Arguments) {}

#[macro_export]
macro_rules! mbl_log {
    ($($arg:tt)*) => {
        $crate::debug::mbl_log_inner(format_args!($($arg)*))
    };
}
