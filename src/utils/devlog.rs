//! Thread-local trace capture for chunk-level transfer tracing.
//!
//! Emits through the global logger at the dedicated [`crate::logger::TRANSFER_TARGET`]
//! target (see `logger::init_for_snapshot_root`) and, when a test enables the
//! thread-local sink, also captures the formatted message so tests can
//! assert on transfer trace output without races against the global logger.

use std::cell::RefCell;

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Guard that disables the thread-local sink on drop.
pub struct TraceSinkGuard;
impl Drop for TraceSinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Enables the thread-local sink for the current thread. Returns a guard
/// that disables it again on drop.
pub fn enable_thread_sink() -> TraceSinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    TraceSinkGuard
}

/// Pushes a message into the thread-local sink if enabled.
pub fn write_str(msg: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(msg.to_owned());
        }
    });
}

/// Drains and returns the captured messages for the current thread. Returns
/// an empty vec if the sink is disabled.
pub fn drain() -> Vec<String> {
    TL_SINK.with(|s| match s.borrow_mut().as_mut() {
        Some(buf) => {
            let out = buf.clone();
            buf.clear();
            out
        }
        None => Vec::new(),
    })
}

/// Peeks at the currently captured messages without clearing them.
pub fn snapshot() -> Vec<String> {
    TL_SINK.with(|s| s.borrow().as_ref().cloned().unwrap_or_default())
}

/// Emits a per-chunk transfer trace, logged at `TRACE` under
/// `core::transfer` and captured by the thread-local sink if enabled.
#[macro_export]
macro_rules! transfer_trace {
    ($($arg:tt)*) => {{
        let __s = format!($($arg)*);
        $crate::utils::devlog::write_str(&__s);
        log::log!(target: $crate::logger::TRANSFER_TARGET, log::Level::Trace, "{}", __s);
    }};
}
