//! Command-line entry point for the `cvs-proxy` binary.

use std::ffi::OsString;
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use logging::VerbosityConfig;
use tracing::{debug, info};

use crate::config::{ConfigFile, Endpoint, ProxyConfig, ProxyConfigBuilder};
use crate::listener::{ProxyContext, ProxyListener};

/// Program name used in diagnostics.
pub const PROGRAM_NAME: &str = "cvs-proxy";
/// Invalid command line or configuration.
pub const USAGE_EXIT_CODE: i32 = 1;
/// The listener could not be set up or failed.
pub const SOCKET_IO_EXIT_CODE: i32 = 10;
/// Largest status the process reports.
pub const MAX_EXIT_CODE: i32 = 255;

pub(crate) struct ParsedArgs {
    show_help: bool,
    show_version: bool,
    config: Option<PathBuf>,
    port: Option<u16>,
    address: Option<IpAddr>,
    local: Option<Endpoint>,
    remote: Option<Endpoint>,
    local_timeout_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
    remote_timeout_secs: Option<u64>,
    max_connections: Option<usize>,
    credentials_passthrough: Option<bool>,
    verbose: u8,
    quiet: bool,
}

/// Runs the proxy CLI using the provided argument iterator and output handles.
///
/// Returns the process exit code. `--help` and `--version` write to
/// `stdout`; every diagnostic goes to `stderr`.
pub fn run<I, S, Out, Err>(arguments: I, stdout: &mut Out, stderr: &mut Err) -> i32
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
    Out: Write,
    Err: Write,
{
    match parse_args(arguments) {
        Ok(parsed) => execute(&parsed, stdout, stderr),
        Err(error) => {
            let _ = write!(stderr, "{error}");
            USAGE_EXIT_CODE
        }
    }
}

fn execute<Out, Err>(parsed: &ParsedArgs, stdout: &mut Out, stderr: &mut Err) -> i32
where
    Out: Write,
    Err: Write,
{
    if parsed.show_help {
        let help = clap_command().render_help().to_string();
        if stdout.write_all(help.as_bytes()).is_err() {
            return USAGE_EXIT_CODE;
        }
        return 0;
    }
    if parsed.show_version {
        if writeln!(stdout, "{PROGRAM_NAME} {}", env!("CARGO_PKG_VERSION")).is_err() {
            return USAGE_EXIT_CODE;
        }
        return 0;
    }

    let config = match build_config(parsed) {
        Ok(config) => config,
        Err(error) => {
            let _ = writeln!(stderr, "{PROGRAM_NAME}: {error}");
            return USAGE_EXIT_CODE;
        }
    };

    let verbosity = if parsed.quiet {
        VerbosityConfig::quiet()
    } else {
        VerbosityConfig::from_verbose_level(parsed.verbose)
    };
    if let Err(error) = logging::init_tracing(&verbosity) {
        // A subscriber installed by an embedding program keeps working.
        debug!(%error, "tracing subscriber already installed");
    }

    match serve(config) {
        Ok(()) => 0,
        Err(error) => {
            let _ = writeln!(stderr, "{PROGRAM_NAME}: {error}");
            SOCKET_IO_EXIT_CODE
        }
    }
}

/// Converts a numeric exit code into an [`std::process::ExitCode`].
#[must_use]
pub fn exit_code_from(status: i32) -> std::process::ExitCode {
    let clamped = status.clamp(0, MAX_EXIT_CODE);
    std::process::ExitCode::from(clamped as u8)
}

fn serve(config: ProxyConfig) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let listener = ProxyListener::bind(ProxyContext::new(config)).await?;
        let shutdown = listener.shutdown_signal();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; stopping");
                let _ = shutdown.send(());
            }
        });
        listener.serve().await
    })
}

/// Layers the command line over the optional configuration file.
pub(crate) fn build_config(parsed: &ParsedArgs) -> Result<ProxyConfig, crate::config::ConfigError> {
    let mut builder = match &parsed.config {
        Some(path) => ConfigFile::from_file(path)?.into_builder(),
        None => ProxyConfigBuilder::default(),
    };
    if let Some(port) = parsed.port {
        builder = builder.listen_port(port);
    }
    if let Some(address) = parsed.address {
        builder = builder.listen_address(address);
    }
    if let Some(local) = &parsed.local {
        builder = builder.local(local.clone());
    }
    if let Some(remote) = &parsed.remote {
        builder = builder.remote(remote.clone());
    }
    if let Some(ms) = parsed.local_timeout_ms {
        builder = builder.local_timeout(Duration::from_millis(ms));
    }
    if let Some(secs) = parsed.connect_timeout_secs {
        builder = builder.connect_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = parsed.remote_timeout_secs {
        builder = builder.remote_timeout(Duration::from_secs(secs));
    }
    if let Some(limit) = parsed.max_connections {
        builder = builder.max_connections(limit);
    }
    if let Some(enabled) = parsed.credentials_passthrough {
        builder = builder.credentials_passthrough(enabled);
    }
    builder.build()
}

fn clap_command() -> Command {
    Command::new(PROGRAM_NAME)
        .about("Serves CVS pserver reads from a local mirror and forwards everything else to the master.")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .help("Show this help message and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .short('V')
                .help("Output version information and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Read settings from FILE; command-line options take precedence.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_name("PORT")
                .help("Listen on PORT instead of the cvspserver service port.")
                .value_parser(value_parser!(u16)),
        )
        .arg(
            Arg::new("address")
                .long("address")
                .value_name("ADDR")
                .help("Listen on ADDR (default 0.0.0.0).")
                .value_parser(value_parser!(IpAddr)),
        )
        .arg(
            Arg::new("local")
                .long("local")
                .value_name("HOST[:PORT][/ROOT]")
                .help("Local mirror pserver.")
                .value_parser(value_parser!(Endpoint)),
        )
        .arg(
            Arg::new("remote")
                .long("remote")
                .value_name("HOST[:PORT][/ROOT]")
                .help("Remote master pserver.")
                .value_parser(value_parser!(Endpoint)),
        )
        .arg(
            Arg::new("local-timeout")
                .long("local-timeout")
                .value_name("MS")
                .help("Milliseconds to wait for the mirror before asking the master.")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .value_name("SECONDS")
                .help("Seconds allowed for connecting to and logging in to an upstream.")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("remote-timeout")
                .long("remote-timeout")
                .value_name("SECONDS")
                .help("Seconds of master silence tolerated mid-response.")
                .value_parser(value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("max-connections")
                .long("max-connections")
                .value_name("N")
                .help("Maximum concurrent client sessions.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("credentials-passthrough")
                .long("credentials-passthrough")
                .help("Relay the client's login to both upstreams (default).")
                .action(ArgAction::SetTrue)
                .overrides_with("no-credentials-passthrough"),
        )
        .arg(
            Arg::new("no-credentials-passthrough")
                .long("no-credentials-passthrough")
                .help("Log in to upstreams with the credentials from the config file.")
                .action(ArgAction::SetTrue)
                .overrides_with("credentials-passthrough"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Increase logging verbosity; repeat for wire traces.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .help("Only log errors.")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

pub(crate) fn parse_args<I, S>(arguments: I) -> Result<ParsedArgs, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();
    if args.is_empty() {
        args.push(OsString::from(PROGRAM_NAME));
    }
    let mut matches = clap_command().try_get_matches_from(args)?;
    Ok(ParsedArgs::from_matches(&mut matches))
}

impl ParsedArgs {
    fn from_matches(matches: &mut ArgMatches) -> Self {
        let credentials_passthrough = if matches.get_flag("no-credentials-passthrough") {
            Some(false)
        } else if matches.get_flag("credentials-passthrough") {
            Some(true)
        } else {
            None
        };
        Self {
            show_help: matches.get_flag("help"),
            show_version: matches.get_flag("version"),
            config: matches.remove_one("config"),
            port: matches.remove_one("port"),
            address: matches.remove_one("address"),
            local: matches.remove_one("local"),
            remote: matches.remove_one("remote"),
            local_timeout_ms: matches.remove_one("local-timeout"),
            connect_timeout_secs: matches.remove_one("connect-timeout"),
            remote_timeout_secs: matches.remove_one("remote-timeout"),
            max_connections: matches.remove_one("max-connections"),
            credentials_passthrough,
            verbose: matches.get_count("verbose"),
            quiet: matches.get_flag("quiet"),
        }
    }
}
