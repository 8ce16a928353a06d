use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tally_job_queue::{Delay, JobOptions};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "tally-trigger")]
#[command(about = "Enqueue Tally background jobs")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides TALLY_CONFIG_PATH)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Trigger one job
    Trigger {
        /// Job id, see `list`
        job: String,
        /// Payload as a JSON document
        #[arg(long)]
        payload: String,
        /// Delay in milliseconds or as an expression such as 30s, 5m, 1h, 1d
        #[arg(long)]
        delay: Option<String>,
        #[arg(long)]
        priority: Option<u32>,
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Trigger a batch from a JSON file holding an array of {payload, options}
    Batch {
        job: String,
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List known jobs and their queues
    List,
}

impl Cli {
    /// Config path from the flag, falling back to TALLY_CONFIG_PATH.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| std::env::var("TALLY_CONFIG_PATH").ok().map(PathBuf::from))
    }
}

/// Read a `--delay` value: bare integers are milliseconds.
pub fn delay_arg(raw: &str) -> Delay {
    match raw.parse::<i64>() {
        Ok(ms) => Delay::Millis(ms),
        Err(_) => Delay::Expr(raw.to_string()),
    }
}

/// Per-call options from the `trigger` flags.
pub fn options_from_args(
    delay: Option<&str>,
    priority: Option<u32>,
    attempts: Option<u32>,
) -> JobOptions {
    let mut options = JobOptions::new();
    if let Some(delay) = delay {
        options = options.delay(delay_arg(delay));
    }
    if let Some(priority) = priority {
        options = options.priority(priority);
    }
    if let Some(attempts) = attempts {
        options = options.attempts(attempts);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_with_global_config() {
        let cli = Cli::try_parse_from([
            "tally-trigger",
            "trigger",
            "generate-invoice",
            "--payload",
            "{}",
            "--delay",
            "10m",
            "-c",
            "tally.toml",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("tally.toml")));
        match cli.command {
            Command::Trigger {
                job, delay, priority, ..
            } => {
                assert_eq!(job, "generate-invoice");
                assert_eq!(delay.as_deref(), Some("10m"));
                assert_eq!(priority, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn batch_requires_a_file() {
        assert!(Cli::try_parse_from(["tally-trigger", "batch", "notification"]).is_err());
    }

    #[test]
    fn delay_flag_accepts_millis_and_expressions() {
        assert_eq!(delay_arg("1500"), Delay::Millis(1500));
        assert_eq!(delay_arg("1h"), Delay::Expr("1h".into()));

        let options = options_from_args(Some("30s"), Some(2), None);
        assert_eq!(options.priority, Some(2));
        assert_eq!(options.attempts, None);
        assert_eq!(options.delay, Some(Delay::Expr("30s".into())));
    }
}
