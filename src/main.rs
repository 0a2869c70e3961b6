//! Binary entrypoint for the relay.

use std::process::ExitCode;

use websoft_relay::start_relay;

/// Serve the relay in the mode selected by `RELAY_ENV`.
fn main() -> ExitCode {
    start_relay::run()
}
