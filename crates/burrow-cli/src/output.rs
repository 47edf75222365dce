//! Diagnostics and exit-code helpers for CLI commands.
//!
//! Everything here writes to stderr; stdout belongs to the launched command.

use burrow_common::constants::EXIT_SETUP;
use burrow_common::error::BurrowError;
use burrow_runtime::engine::RunFailure;

/// Formats a byte count into a human-readable string (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Folds a child exit code into the `0..=255` range a process can return.
#[must_use]
pub fn exit_byte(code: i32) -> u8 {
    u8::try_from(code.rem_euclid(256)).unwrap_or(u8::MAX)
}

/// Returns the documented exit code for an error raised by a command.
#[must_use]
pub fn failure_code(err: &anyhow::Error) -> u8 {
    if let Some(failure) = err.downcast_ref::<RunFailure>() {
        failure.exit_code()
    } else if let Some(error) = err.downcast_ref::<BurrowError>() {
        error.exit_code()
    } else {
        EXIT_SETUP
    }
}

/// Prints a one-line diagnostic for `err` and returns its exit code.
#[allow(clippy::print_stderr)]
pub fn report_failure(err: &anyhow::Error) -> u8 {
    let code = failure_code(err);
    let kind = err
        .downcast_ref::<RunFailure>()
        .map(RunFailure::kind)
        .or_else(|| err.downcast_ref::<BurrowError>().map(BurrowError::kind));
    match kind {
        Some(kind) => eprintln!("burrow: {kind} error: {err:#}"),
        None => eprintln!("burrow: {err:#}"),
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_runtime::state::RunStage;

    #[test]
    fn format_bytes_displays_bytes() {
        assert_eq!(format_bytes(512), "512 B");
    }

    #[test]
    fn format_bytes_displays_mib() {
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn exit_byte_keeps_small_codes() {
        assert_eq!(exit_byte(0), 0);
        assert_eq!(exit_byte(137), 137);
    }

    #[test]
    fn exit_byte_wraps_like_a_shell() {
        assert_eq!(exit_byte(256), 0);
        assert_eq!(exit_byte(-1), 255);
    }

    #[test]
    fn run_failures_map_to_their_kind() {
        let err = anyhow::Error::new(RunFailure {
            stage: RunStage::Staging,
            error: BurrowError::CommandNotFound {
                command: "nope".into(),
                message: "not found".into(),
            },
        });
        assert_eq!(failure_code(&err), 14);
    }

    #[test]
    fn bare_errors_map_to_their_kind() {
        let err = anyhow::Error::new(BurrowError::Cancelled);
        assert_eq!(failure_code(&err), 130);
    }

    #[test]
    fn unknown_errors_are_setup_failures() {
        assert_eq!(failure_code(&anyhow::anyhow!("boom")), 2);
    }
}
