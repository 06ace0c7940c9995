use tracing_subscriber::EnvFilter;

/// `info` by default, `debug` with `--verbose`; `RUST_LOG` overrides both. Logs go to stderr
/// so stdout stays clean for piping.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // already installed when called twice
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
