//! CLI entry point for baff.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod commands;
mod script;

/// Client-side entity cache sessions against fixture data.
#[derive(Parser, Debug)]
#[command(
    name = "baff",
    version,
    about = "baff: entity cache with master/dependent version coherence"
)]
struct Cli {
    /// Directory holding `.baff/config.toml` (defaults to current).
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and list registered types.
    Check,

    /// Replay a scripted session, printing cache notifications as JSON lines.
    Replay {
        /// JSON file mapping entity types to record arrays.
        #[arg(long)]
        fixtures: PathBuf,
        /// JSON array of script steps.
        #[arg(long)]
        script: PathBuf,
    },
}

fn main() -> Result<()> {
    let Cli { dir, cmd } = Cli::parse();
    install_tracing();

    let workdir = dir.unwrap_or_else(|| PathBuf::from("."));
    commands::run(cmd, &workdir, &mut io::stdout().lock())
}

fn install_tracing() {
    // Logs go to stderr so stdout stays machine-readable.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_check_command() {
        let cli = Cli::parse_from(["baff", "check", "--dir", "/tmp/project"]);
        assert!(matches!(cli.cmd, Command::Check));
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/project")));
    }

    #[test]
    fn parse_replay_command() {
        let cli = Cli::parse_from([
            "baff",
            "replay",
            "--fixtures",
            "fixtures.json",
            "--script",
            "session.json",
        ]);

        match cli.cmd {
            Command::Replay { fixtures, script } => {
                assert_eq!(fixtures, PathBuf::from("fixtures.json"));
                assert_eq!(script, PathBuf::from("session.json"));
            }
            Command::Check => panic!("expected replay command"),
        }
        assert!(cli.dir.is_none());
    }
}
