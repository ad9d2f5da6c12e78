use env_logger::{Builder, Env};

/// Install `env_logger` as the `log` backend. `RUST_LOG` is honoured, and
/// defaults to `info` so that leak-check results are visible. Calling this
/// more than once is harmless.
pub fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("info"))
        .format_target(false)
        .try_init();
}

/// Like [`init()`], but for tests: output is captured by the test harness.
pub fn init_for_tests() {
    let _ = Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
