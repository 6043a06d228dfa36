//! Server configuration.
//!
//! Options come from three layers: built-in defaults, an optional
//! `server.cfg` key=value file, and the command line, in increasing order of
//! precedence. Anything invalid in either source is a fatal startup error;
//! the server never runs on a half-understood configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;

use crate::error::{Error, Result};

/// The port used when neither the config file nor the command line sets one.
pub const DEFAULT_PORT: u16 = 4242;

/// Command line options.
///
/// Every option can also be set in the config file; the command line wins.
#[derive(Debug, Parser)]
#[command(name = "textboard", about = "A line-oriented TCP textboard server")]
pub struct CliArgs {
    /// Port on which the server listens.
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding the message database (created if absent).
    #[arg(long, value_name = "DIR")]
    pub database_directory: Option<PathBuf>,

    /// Character encoding for client sessions.
    #[arg(long)]
    pub charset: Option<String>,

    /// Key=value configuration file, read when present.
    #[arg(long, value_name = "FILE", default_value = "server.cfg")]
    pub config_file: PathBuf,
}

/// Supported client character encodings.
///
/// Every accepted name is byte-compatible with UTF-8, the protocol default.
/// A name the server could not honor is rejected at startup instead of
/// producing mojibake mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    UsAscii,
}

impl Charset {
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::UsAscii => "US-ASCII",
        }
    }
}

impl FromStr for Charset {
    type Err = Error;

    fn from_str(name: &str) -> Result<Charset> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "us-ascii" | "ascii" => Ok(Charset::UsAscii),
            _ => Err(Error::Config(format!("unsupported charset {name:?}"))),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The validated effective configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_directory: PathBuf,
    pub charset: Charset,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            database_directory: PathBuf::from("."),
            charset: Charset::default(),
        }
    }
}

impl Config {
    /// Resolves the effective configuration from all three layers.
    pub fn load(args: &CliArgs) -> Result<Config> {
        let mut config = Config::default();

        if args.config_file.exists() {
            let text = std::fs::read_to_string(&args.config_file).map_err(|err| {
                Error::Config(format!(
                    "failed to read the config file {}: {err}",
                    args.config_file.display()
                ))
            })?;
            config.apply_file(&text, &args.config_file)?;
        }

        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(dir) = &args.database_directory {
            config.database_directory = dir.clone();
        }
        if let Some(charset) = &args.charset {
            config.charset = charset.parse()?;
        }

        Ok(config)
    }

    fn apply_file(&mut self, text: &str, path: &Path) -> Result<()> {
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::Config(format!(
                    "{}:{}: expected key=value, got {line:?}",
                    path.display(),
                    index + 1
                )));
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "port" => self.port = parse_port(value)?,
                "database_directory" => self.database_directory = PathBuf::from(value),
                "charset" => self.charset = value.parse()?,
                _ => {
                    return Err(Error::Config(format!(
                        "{}:{}: unknown option [{key}]",
                        path.display(),
                        index + 1
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_port(value: &str) -> Result<u16> {
    value.parse::<u16>().map_err(|_| {
        Error::Config(format!(
            "the option [port] must be an integer in the interval [0, 65535]; actual value: {value}"
        ))
    })
}
