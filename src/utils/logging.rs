use tracing_subscriber::EnvFilter;

/// Install a `fmt` tracing subscriber for the SDK.
///
/// Filtering follows `RUST_LOG`, with `ledger_gateway_sdk=info` added so SDK activity is visible
/// by default. Output carries a wall-clock time and the message only.
///
/// # Errors
/// Fails if a directive cannot be parsed or a global subscriber is already installed.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
	let filter = EnvFilter::from_default_env().add_directive("ledger_gateway_sdk=info".parse()?);

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.try_init()
}
