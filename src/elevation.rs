//! Privilege elevation for packet-filter commands
//!
//! iplimit usually runs as root under a service manager. When it does not,
//! only the two packet-filter programs are ever elevated:
//!
//! - **iptables**: appending and deleting rules
//! - **iptables-save**: dumping the live rule set
//!
//! # Elevation Strategy
//!
//! - **Root**: programs run directly
//! - **Default**: `sudo -n` (non-interactive, a service cannot answer a prompt)
//! - **No sudo**: programs run directly and fail with a permission error,
//!   which surfaces as `BackendUnavailable`
//!
//! # Environment Variables
//!
//! - `IPLIMIT_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `none`).
//! - `IPLIMIT_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Only the configured iptables programs can be elevated
//! - Targets are validated before they reach a command line
//! - Commands are constructed without shell interpolation

use tokio::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `IPLIMIT_ELEVATION_METHOD`
    #[error("Invalid IPLIMIT_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, none")]
    InvalidMethod(String),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn direct(program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

fn wrapped(wrapper: &str, wrapper_args: &[&str], program: &str, args: &[String]) -> Command {
    let mut cmd = Command::new(wrapper);
    cmd.args(wrapper_args).arg(program).args(args);
    cmd
}

/// Creates an elevated command for one of the packet-filter programs.
///
/// `program` is the configured `iptables` or `iptables-save` path
/// (`/usr/sbin/iptables-legacy`, ...). Arguments are passed directly without
/// shell interpretation.
pub fn create_elevated_command(program: &str, args: &[String]) -> Result<Command, ElevationError> {
    // 1. Strict Test Mode Override (Highest Priority)
    if std::env::var("IPLIMIT_TEST_NO_ELEVATION").is_ok() {
        return Ok(direct(program, args));
    }

    // 2. Direct Root Execution
    if nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    // 3. Explicit elevation method override
    if let Ok(method) = std::env::var("IPLIMIT_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "none" => Ok(direct(program, args)),
                "sudo" => {
                    if !binary_exists("sudo") {
                        return Err(ElevationError::MethodNotAvailable("sudo".into()));
                    }
                    Ok(wrapped("sudo", &["-n"], program, args))
                }
                "run0" => {
                    if !binary_exists("run0") {
                        return Err(ElevationError::MethodNotAvailable("run0".into()));
                    }
                    Ok(wrapped("run0", &["--no-ask-password"], program, args))
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection
    if binary_exists("sudo") {
        Ok(wrapped("sudo", &["-n"], program, args))
    } else {
        Ok(direct(program, args))
    }
}
