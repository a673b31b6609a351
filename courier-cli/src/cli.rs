use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Deliver messages through configured providers with retry and fallback")]
#[command(version)]
pub struct Args {
    /// Router configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "COURIER_CONFIG",
        default_value = "courier.toml"
    )]
    pub config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message
    Send {
        /// Channel to route through
        #[arg(long)]
        channel: String,

        /// Destination address (phone number, email, ...)
        #[arg(long)]
        to: String,

        /// Text body; read from stdin when neither --message nor --json is given
        #[arg(short, long, conflicts_with = "json")]
        message: Option<String>,

        /// Structured body as a JSON document
        #[arg(long)]
        json: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Validate the configuration and print the resolved routes
    Check {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Push a batch of synthetic messages through a channel and report counters
    Simulate {
        #[arg(long)]
        channel: String,

        /// Number of messages to send
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,

        /// Sends in flight at once
        #[arg(long, default_value_t = 10)]
        concurrency: usize,

        /// Destination used for every message
        #[arg(long, default_value = "+15550100")]
        to: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_send() {
        let args = Args::try_parse_from([
            "courier",
            "--config",
            "routes.toml",
            "send",
            "--channel",
            "sms",
            "--to",
            "+15550100",
            "-m",
            "hello",
            "-o",
            "json",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("routes.toml"));
        match args.command {
            Commands::Send {
                channel,
                to,
                message,
                json,
                output,
            } => {
                assert_eq!(channel, "sms");
                assert_eq!(to, "+15550100");
                assert_eq!(message.as_deref(), Some("hello"));
                assert!(json.is_none());
                assert_eq!(output, OutputFormat::Json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn message_and_json_conflict() {
        let result = Args::try_parse_from([
            "courier", "send", "--channel", "sms", "--to", "x", "-m", "a", "--json", "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn simulate_defaults() {
        let args = Args::try_parse_from(["courier", "simulate", "--channel", "sms"]).unwrap();
        match args.command {
            Commands::Simulate {
                count, concurrency, ..
            } => {
                assert_eq!(count, 100);
                assert_eq!(concurrency, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
