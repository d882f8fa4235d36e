use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Parser)]
#[command(
    name = "chat-digest",
    version,
    about = "Condense chat transcripts into a categorized, linked bullet digest"
)]
struct Cli {
    /// Debug-level logging unless DIGEST_LOG or RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Markdown,
    Json,
    Plain,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Plain => "txt",
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the digest pipeline over an exported transcript
    Digest {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        /// Diagnostics JSON path; defaults to a sibling of the output file
        #[arg(long)]
        diagnostics: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration after file and env overrides
    Config {
        #[arg(long)]
        json: bool,
    },
    /// Build or parse message permalinks
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
}

#[derive(Subcommand)]
enum LinkAction {
    Build {
        server: String,
        channel: String,
        message: String,
        #[arg(long)]
        json: bool,
    },
    Parse {
        url: String,
        #[arg(long)]
        json: bool,
    },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let (report, json) = match cli.command {
        Command::Digest {
            input,
            output,
            format,
            diagnostics,
            json,
        } => {
            let opts = commands::digest::DigestOptions {
                input,
                output,
                format,
                diagnostics,
            };
            (commands::digest::run(&opts)?, json)
        }
        Command::Config { json } => (commands::config::run()?, json),
        Command::Link { action } => match action {
            LinkAction::Build {
                server,
                channel,
                message,
                json,
            } => (commands::link::build(&server, &channel, &message)?, json),
            LinkAction::Parse { url, json } => (commands::link::parse(&url)?, json),
        },
    };

    print_report(&report, json)?;
    if !report.ok {
        anyhow::bail!("{} finished with {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
