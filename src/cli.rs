use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::port::PortRange;
use crate::process::KillSignal;
use crate::utils::{parse_duration, parse_port, parse_range, parse_signal};

#[derive(Parser, Debug)]
#[command(
    name = "portctl",
    about = "Local development port helper: list, inspect, free and allocate TCP ports",
    version,
    subcommand_help_heading = "Commands"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(long, global = true, help = "Disable ANSI colors")]
    pub no_color: bool,

    #[arg(long, global = true, help = "Log diagnostics to stderr")]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "List listening TCP ports")]
    List {
        #[arg(help = "Match command, executable or command line (case-insensitive)")]
        filter: Option<String>,

        #[arg(long, value_parser = parse_port, help = "Only show this port")]
        port: Option<u16>,

        #[arg(long, help = "One row per (port, pid)")]
        unique: bool,

        #[arg(short = 'v', long, help = "Show ppid and program path")]
        verbose: bool,
    },

    #[command(about = "Show which processes listen on a port")]
    Who {
        #[arg(value_parser = parse_port, help = "Port number")]
        port: u16,
    },

    #[command(about = "Signal the processes listening on a port")]
    Kill {
        #[arg(value_parser = parse_port, help = "Port number")]
        port: u16,

        #[arg(long, default_value = "TERM", value_parser = parse_signal, help = "Signal to send (TERM, INT, KILL)")]
        signal: KillSignal,

        #[arg(long, value_parser = parse_duration, help = "Grace period before SIGKILL, 0 disables (e.g. 2s, 500ms)")]
        timeout: Option<Duration>,

        #[arg(long, help = "Kill processes owned by other users")]
        force: bool,

        #[arg(long, help = "Show what would be signaled without sending anything")]
        dry_run: bool,
    },

    #[command(about = "Print a free TCP port")]
    Pick {
        #[arg(long, value_delimiter = ',', value_parser = parse_port, help = "Preferred ports, comma separated")]
        prefer: Vec<u16>,

        #[arg(long, value_parser = parse_range, help = "Fallback range (e.g. 3000-3999)")]
        range: Option<PortRange>,
    },

    #[command(about = "Run a command with a free port exported in its environment")]
    Run {
        #[arg(long, value_delimiter = ',', value_parser = parse_port, help = "Preferred ports, comma separated")]
        prefer: Vec<u16>,

        #[arg(long, value_parser = parse_range, help = "Fallback range (e.g. 3000-3999)")]
        range: Option<PortRange>,

        #[arg(long, default_value = "PORT", help = "Environment variable receiving the port")]
        env: String,

        #[arg(last = true, required = true, help = "Command to run, after --")]
        command: Vec<String>,
    },

    #[command(about = "Exit 0 if a port is free, 1 if in use")]
    Check {
        #[arg(value_parser = parse_port, help = "Port number")]
        port: u16,

        #[arg(long, value_parser = parse_duration, help = "Wait up to this long for the port to be freed")]
        wait: Option<Duration>,
    },

    #[command(about = "Check system tools and configuration")]
    Doctor,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
