//! Process-wide logging setup, shared by the CLI binary and test harnesses.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

static INIT: OnceCell<()> = OnceCell::new();

/// Initialize the global `tracing` subscriber from `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call takes effect.
pub fn init() {
	INIT.get_or_init(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
		let fmt = tracing_subscriber::fmt::layer().with_target(true);
		let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
	});
}

pub mod testing {
	/// Initialize logging for `#[test]` functions; respects `RUST_LOG`, defaults to `warn`
	/// so test output stays quiet unless the developer asks for more.
	pub fn setup_test_logging() {
		if std::env::var_os("RUST_LOG").is_none() {
			// SAFETY: tests are single-threaded with respect to this call and we only ever
			// widen the default; no other code reads/writes RUST_LOG concurrently here.
			unsafe { std::env::set_var("RUST_LOG", "warn") };
		}
		super::init();
	}
}
