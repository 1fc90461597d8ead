//! Wrapper CLI implementation.

use clap::Parser;

/// Wrapping a command line to support trzsz (trz / tsz).
#[derive(Debug, Parser)]
#[command(
    name = "trzsz",
    version,
    about = "Wrapping a command line to support trzsz ( trz / tsz )"
)]
pub struct Cli {
    /// Enable dragging file(s) onto the terminal to upload
    #[arg(short = 'd', long = "dragfile")]
    pub dragfile: bool,

    /// The original command line
    pub command: String,

    /// Arguments of the original command line
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wrapped_command() {
        let cli = Cli::parse_from(["trzsz", "ssh", "example.com"]);
        assert!(!cli.dragfile);
        assert_eq!(cli.command, "ssh");
        assert_eq!(cli.args, ["example.com"]);
    }

    #[test]
    fn parses_dragfile_flag() {
        let cli = Cli::parse_from(["trzsz", "-d", "ssh", "host"]);
        assert!(cli.dragfile);
        assert_eq!(cli.command, "ssh");
    }

    #[test]
    fn wrapped_command_flags_pass_through() {
        let cli = Cli::parse_from(["trzsz", "ssh", "-p", "2222", "host"]);
        assert_eq!(cli.args, ["-p", "2222", "host"]);
    }

    #[test]
    fn missing_command_is_an_error() {
        assert!(Cli::try_parse_from(["trzsz"]).is_err());
    }
}
