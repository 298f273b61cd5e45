use crate::logging;

/// Standard setup for tests: captures logs through the usual subscriber so
/// `RUST_LOG` works when debugging a failing test.
pub fn setup_test() {
    logging::Config {
        colors: Some(false),
        ..Default::default()
    }
    .init();
}
