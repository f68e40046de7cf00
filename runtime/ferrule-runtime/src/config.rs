use std::sync::OnceLock;

pub const TRACE_DISPATCH_ENV: &str = "FERRULE_TRACE_DISPATCH";

/// `FERRULE_TRACE_DISPATCH=1` raises translated trampoline errors from
/// `trace` to `debug`.
pub(crate) fn trace_dispatch() -> bool {
    static TRACE: OnceLock<bool> = OnceLock::new();
    *TRACE.get_or_init(|| std::env::var(TRACE_DISPATCH_ENV).as_deref() == Ok("1"))
}
