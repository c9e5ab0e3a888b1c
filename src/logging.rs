//! Thin wrapper around `env_logger`, matching the teacher's
//! `env_logger::builder().is_test(false).try_init()` call sites in its
//! `src/bin/*.rs` binaries.

/// Initialize the global logger with a default filter of `info`, overridable
/// via `RUST_LOG`. Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(false)
        .try_init();
}
