use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use rpcpipe_client::{ClientConfig, ConfigFile};
use serde_json::Value;

use crate::exit::{client_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

#[cfg(unix)]
pub mod mock;
pub mod paths;
pub mod probe;
pub mod request;
pub mod subscribe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print candidate endpoint paths in connect order.
    Paths(PathsArgs),
    /// Connect, wait for READY, issue one command and print the response.
    Request(RequestArgs),
    /// Subscribe to an event and print what arrives.
    Subscribe(SubscribeArgs),
    /// Look for the peer's HTTP side channel.
    Probe(ProbeArgs),
    /// Run a mock peer on a local socket.
    #[cfg(unix)]
    Mock(MockArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, globals: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Paths(args) => paths::run(args, globals, format),
        Command::Request(args) => request::run(args, globals, format).await,
        Command::Subscribe(args) => subscribe::run(args, globals, format).await,
        Command::Probe(args) => probe::run(args, globals, format).await,
        #[cfg(unix)]
        Command::Mock(args) => mock::run(args).await,
        Command::Version(args) => version::run(args),
    }
}

/// Flags shared by every subcommand.
#[derive(Debug, Default)]
pub struct GlobalArgs {
    pub client_id: Option<String>,
    pub endpoints: Vec<PathBuf>,
    pub config: Option<PathBuf>,
}

impl GlobalArgs {
    fn config_file(&self) -> CliResult<ConfigFile> {
        match &self.config {
            Some(path) => ConfigFile::load(path).map_err(|err| client_error("config", err)),
            None => Ok(ConfigFile::default()),
        }
    }

    /// Defaults, then the config file, then command-line flags.
    pub fn client_config(&self) -> CliResult<ClientConfig> {
        let mut config = self.config_file()?.client_config();
        if let Some(id) = &self.client_id {
            config.handshake.client_id = id.clone();
        }
        if !self.endpoints.is_empty() {
            config.endpoint.explicit = self.endpoints.clone();
        }
        Ok(config)
    }

    /// Like [`GlobalArgs::client_config`], but a client id is mandatory.
    pub fn connect_config(&self) -> CliResult<ClientConfig> {
        let config = self.client_config()?;
        if config.handshake.client_id.is_empty() {
            return Err(CliError::new(
                USAGE,
                "a client id is required (--client-id, RPCPIPE_CLIENT_ID, or the config file)",
            ));
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct PathsArgs {}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Command name, e.g. GET_GUILD.
    pub command: String,
    /// Command arguments as a JSON value.
    #[arg(long, default_value = "{}")]
    pub args: String,
    /// Event name carried alongside the command.
    #[arg(long)]
    pub evt: Option<String>,
    /// Response deadline (e.g. 5s, 500ms). Default: the configured request timeout.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Event name, e.g. MESSAGE_CREATE.
    pub evt: String,
    /// Subscription arguments as a JSON value.
    #[arg(long, default_value = "{}")]
    pub args: String,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Probe attempts before giving up.
    #[arg(long, default_value = "10")]
    pub attempts: u32,
    /// First port of the probed range.
    #[arg(long)]
    pub base_port: Option<u16>,
    /// Per-attempt timeout (e.g. 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
}

#[cfg(unix)]
#[derive(Args, Debug)]
pub struct MockArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Answer this command with an ERROR response instead of echoing.
    #[arg(long, value_name = "CMD")]
    pub error_on: Vec<String>,
    /// Exit after the first connection ends.
    #[arg(long)]
    pub once: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse a `--args` value.
pub fn parse_json_arg(input: &str) -> CliResult<Value> {
    serde_json::from_str(input)
        .map_err(|err| CliError::new(DATA_INVALID, format!("--args is not valid JSON: {err}")))
}

/// `5s`, `500ms`, or a bare number of seconds.
pub fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
