pub mod backend;
pub mod fixture;

pub use backend::ScriptedBackend;
pub use fixture::{TestDatabase, count, fail_fast_config};

/// Route `tracing` output through the test harness's captured writer.
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
