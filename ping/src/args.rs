use std::path::PathBuf;

use clap::{ArgAction, Parser};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Opts {
    /// Host name or IPv4 address to ping
    #[arg(default_value = "127.0.0.1")]
    pub destination: String,
    /// Number of echo requests to send
    #[arg(
        default_value_t = 20,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub count: u16,
    /// Interface to bind to
    #[arg(long, short)]
    pub iface: Option<String>,
    /// Write one CSV row per round to this file
    #[arg(long, short)]
    pub file: Option<PathBuf>,
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence
    #[arg(long, short, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Opts {
    /// Log specification handed to the logger when RUST_LOG is unset
    pub fn log_spec(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
