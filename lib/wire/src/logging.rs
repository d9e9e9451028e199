pub use slog::{debug, error, info, o, trace, warn, Drain, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the root logger used by the `notifyd` binary and threaded down into every
/// component. `verbose` selects `debug` severity instead of the default `info`.
pub fn init(verbose: bool) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(if verbose { Severity::Debug } else { Severity::Info });
    builder.destination(Destination::Stderr);

    builder.build().expect("failed to build terminal logger")
}
