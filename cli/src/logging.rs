use tracing_subscriber::EnvFilter;

use crate::options::Options;

/// Directive variable read before `RUST_LOG`.
const LOG_ENV: &str = "SDAQ_LOG";

fn fallback(options: &Options) -> &'static str {
    if options.verbose() {
        "debug"
    } else if options.silent() {
        "warn"
    } else {
        "info"
    }
}

/// Logs go to stderr, stdout only carries results.
pub fn init(options: &Options) {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); using {}", fallback(options));
            EnvFilter::new(fallback(options))
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback(options))),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(options.verbose())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}
