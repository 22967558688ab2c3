//! Operator console: prompt, parse, reprompt. Never escalates bad input.

use std::io::{BufRead, Write};

use crate::error::InputError;
use crate::setpoint::SetpointSource;

pub const PROMPT: &str =
    "Enter a motor speed in meters/second (range from [-1.5, 1.5] m/s): ";
pub const OUT_OF_RANGE: &str =
    "The speed you entered is not within the specified range. Please enter a new speed.";
pub const NOT_A_NUMBER: &str = "You did not enter a number in the correct format (check for any unwanted characters, spaces, etc).";
pub const TRY_AGAIN: &str = "Please enter your speed again.";

/// Read lines until EOF, applying each accepted speed to `setpoint`.
///
/// Returns the number of accepted inputs. I/O errors on the output side are
/// propagated; parse and range errors are reported and retried.
pub fn run_console<R: BufRead, W: Write>(
    input: R,
    mut out: W,
    setpoint: &SetpointSource,
) -> std::io::Result<usize> {
    let mut accepted = 0;
    write!(out, "{PROMPT}")?;
    out.flush()?;
    for line in input.lines() {
        let line = line?;
        match setpoint.submit_text(&line) {
            Ok(mps) => {
                accepted += 1;
                tracing::info!(desired_mps = mps, "setpoint from console");
            }
            Err(InputError::OutOfRange { value, .. }) => {
                tracing::debug!(value, "console input out of range");
                writeln!(out, "{OUT_OF_RANGE}")?;
            }
            Err(InputError::NotANumber(text)) => {
                tracing::debug!(%text, "console input not a number");
                writeln!(out, "{NOT_A_NUMBER}")?;
                writeln!(out, "{TRY_AGAIN}")?;
            }
        }
        write!(out, "{PROMPT}")?;
        out.flush()?;
    }
    Ok(accepted)
}

/// Console reader on its own thread, bound to stdin/stdout.
pub fn spawn_console(setpoint: SetpointSource) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        match run_console(stdin.lock(), stdout.lock(), &setpoint) {
            Ok(n) => tracing::debug!(accepted = n, "console closed"),
            Err(e) => tracing::warn!(error = %e, "console reader stopped"),
        }
    })
}
