#[macro_use]
extern crate tracing;

use std::env;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use hop::TunnelCfg;
use hop::session::{MAX_HANDSHAKE_TIMEOUT, MAX_POLL_TIMEOUT, Role, SERVER_FLAG, SessionCfg};
use seahorse::{App, Context, Flag, FlagType};
use tokio::runtime;
use tracing_appender::non_blocking::WorkerGuard;

const DEFAULT_LOG_FILTER: &str = "info";

fn main() {
    let args: Vec<String> = if let Ok(args_str) = env::var("HOP_ARGS") {
        env::args()
            .take(1)
            .chain(parse_env_variable_as_args(&args_str))
            .collect()
    } else {
        env::args().collect()
    };

    let app = App::new(env!("CARGO_PKG_NAME"))
        .description(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .usage(generate_usage())
        .action(tunnel_action);

    apply_flags(app).run(args);
}

fn generate_usage() -> String {
    format!(
        r##"{command} <LOCAL PORT> <REMOTE HOST> <REMOTE PORT> [{server}]

Example: client side, local SSH clients connect to port 2222

    {command} 2222 tunnel.example.org 8080

Example: server side, forwarding to the local SSH daemon

    {command} 8080 127.0.0.1 22 {server}

Arguments can also be provided with the HOP_ARGS environment variable."##,
        command = env!("CARGO_PKG_NAME"),
        server = SERVER_FLAG,
    )
}

pub fn run<F: Future<Output = anyhow::Result<()>>>(f: F) -> anyhow::Result<()> {
    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("runtime build failed")?;

    match rt.block_on(f) {
        Ok(()) => info!("Terminated successfully"),
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    }

    rt.shutdown_timeout(Duration::from_millis(100)); // just to be safe

    Ok(())
}

pub fn exit(res: anyhow::Result<()>) -> ! {
    match res {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{:?}", e);
            std::process::exit(1);
        }
    }
}

fn tunnel_action(c: &Context) {
    let res = TunnelArgs::parse(c).and_then(|args| {
        let _guard = setup_logger(&args.logging, &args.log_filter)?;
        run(hop::run_tunnel(args.cfg))
    });
    exit(res);
}

// args parsing

fn parse_env_variable_as_args(env_var_str: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut arg = String::new();
    let mut iter = env_var_str.chars();

    loop {
        match iter.next() {
            Some('"') => loop {
                match iter.next() {
                    Some('"') | None => break,
                    Some(c) => arg.push(c),
                }
            },
            Some('\'') => loop {
                match iter.next() {
                    Some('\'') | None => break,
                    Some(c) => arg.push(c),
                }
            },
            Some(' ') => {
                if !arg.is_empty() {
                    args.push(std::mem::take(&mut arg));
                }
            }
            Some(c) => arg.push(c),
            None => break,
        }
    }

    if !arg.is_empty() {
        args.push(arg);
    }

    args
}

fn apply_flags(app: App) -> App {
    app.flag(Flag::new("log-file", FlagType::String).description("Write logs to the specified file"))
        .flag(Flag::new("log-term", FlagType::Bool).description("Print logs to stdout [default]"))
        .flag(
            Flag::new("log-filter", FlagType::String)
                .description("Filtering directives, e.g. `hop=debug` [default = HOP_LOG or `info`]"),
        )
        .flag(
            Flag::new("plain-wire", FlagType::String)
                .description("Wire format of the plain leg: `raw` or `framed` [default = raw]"),
        )
        .flag(
            Flag::new("poll-timeout", FlagType::String)
                .description("Maximum wait for a message during one forwarding step [default = 10ms]"),
        )
        .flag(
            Flag::new("handshake-timeout", FlagType::String)
                .description("Maximum wait for the client hello in server role [default = 10s]"),
        )
}

enum Logging {
    Term,
    File { filepath: PathBuf },
}

struct TunnelArgs {
    logging: Logging,
    log_filter: String,
    cfg: TunnelCfg,
}

impl TunnelArgs {
    fn parse(c: &Context) -> anyhow::Result<Self> {
        let logging = if c.bool_flag("log-term") {
            Logging::Term
        } else if let Ok(filepath) = c.string_flag("log-file") {
            Logging::File {
                filepath: PathBuf::from(filepath),
            }
        } else {
            Logging::Term
        };

        let log_filter = c
            .string_flag("log-filter")
            .ok()
            .or_else(|| env::var("HOP_LOG").ok())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned());

        let mut cfg = parse_tunnel_cfg(&c.args)?;

        if let Ok(value) = c.string_flag("plain-wire") {
            cfg.session.plain_wire = value.parse().context("Invalid value for plain-wire")?;
        }

        if let Ok(value) = c.string_flag("poll-timeout") {
            cfg.session.poll_timeout =
                parse_bounded_duration(&value, MAX_POLL_TIMEOUT).context("Invalid value for poll-timeout")?;
        }

        if let Ok(value) = c.string_flag("handshake-timeout") {
            cfg.session.handshake_timeout =
                parse_bounded_duration(&value, MAX_HANDSHAKE_TIMEOUT).context("Invalid value for handshake-timeout")?;
        }

        Ok(Self {
            logging,
            log_filter,
            cfg,
        })
    }
}

fn parse_bounded_duration(value: &str, max: Duration) -> anyhow::Result<Duration> {
    let duration = humantime::parse_duration(value)?;

    anyhow::ensure!(
        duration <= max,
        "{} exceeds the maximum of {}",
        humantime::format_duration(duration),
        humantime::format_duration(max)
    );

    Ok(duration)
}

fn parse_tunnel_cfg(args: &[String]) -> anyhow::Result<TunnelCfg> {
    let listen_port = args
        .first()
        .context("<LOCAL PORT> is missing")?
        .parse::<u16>()
        .context("Bad <LOCAL PORT>")?;

    let remote_host = args.get(1).context("<REMOTE HOST> is missing")?;
    anyhow::ensure!(!remote_host.is_empty(), "Bad <REMOTE HOST>: empty");

    let remote_port = args
        .get(2)
        .context("<REMOTE PORT> is missing")?
        .parse::<u16>()
        .context("Bad <REMOTE PORT>")?;
    anyhow::ensure!(remote_port != 0, "Bad <REMOTE PORT>: must not be zero");

    if let Some(extra) = args.get(4) {
        anyhow::bail!("Unexpected argument: `{extra}`");
    }

    let role = Role::from_flag(args.get(3).map(String::as_str));

    let session = SessionCfg::new(role, remote_host.as_str(), remote_port);

    // The remote address ends up in the Host header of every request.
    hop_proto::Codec::http_request(&session.remote_addr()).context("Bad <REMOTE HOST>")?;

    Ok(TunnelCfg { listen_port, session })
}

// logging

fn setup_logger(logging: &Logging, log_filter: &str) -> anyhow::Result<WorkerGuard> {
    use std::fs::OpenOptions;
    use std::panic;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let (non_blocking, guard) = match logging {
        Logging::Term => tracing_appender::non_blocking(std::io::stdout()),
        Logging::File { filepath } => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filepath)
                .with_context(|| format!("couldn't open log file {}", filepath.display()))?;
            tracing_appender::non_blocking(file)
        }
    };

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(matches!(logging, Logging::Term));

    let env_filter = EnvFilter::try_new(log_filter).context("invalid filtering directives")?;

    tracing_subscriber::registry().with(fmt_layer).with(env_filter).init();

    panic::set_hook(Box::new(move |panic_info| {
        error!("{}", panic_info);
        eprintln!("{}", panic_info);
    }));

    Ok(guard)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test code can panic on errors")]

    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn env_variable_args() {
        assert_eq!(
            parse_env_variable_as_args(r#"2222 "tunnel example" 8080  'SERVER'"#),
            args(&["2222", "tunnel example", "8080", "SERVER"])
        );
    }

    #[test]
    fn client_by_default() {
        let cfg = parse_tunnel_cfg(&args(&["2222", "10.0.0.5", "8080"])).unwrap();
        assert_eq!(cfg.listen_port, 2222);
        assert_eq!(cfg.session.role, Role::Client);
        assert_eq!(cfg.session.remote_addr(), "10.0.0.5:8080");
    }

    #[test]
    fn server_flag() {
        let cfg = parse_tunnel_cfg(&args(&["8080", "127.0.0.1", "22", "SERVER"])).unwrap();
        assert_eq!(cfg.session.role, Role::Server);

        let cfg = parse_tunnel_cfg(&args(&["8080", "127.0.0.1", "22", "server"])).unwrap();
        assert_eq!(cfg.session.role, Role::Client);
    }

    #[test]
    fn bad_arguments() {
        assert!(parse_tunnel_cfg(&args(&["2222", "10.0.0.5"])).is_err());
        assert!(parse_tunnel_cfg(&args(&["70000", "10.0.0.5", "8080"])).is_err());
        assert!(parse_tunnel_cfg(&args(&["2222", "10.0.0.5", "http"])).is_err());
        assert!(parse_tunnel_cfg(&args(&["2222", "10.0.0.5", "0"])).is_err());
        assert!(parse_tunnel_cfg(&args(&["2222", "", "8080"])).is_err());
        assert!(parse_tunnel_cfg(&args(&["2222", "10.0.0.5", "8080", "SERVER", "extra"])).is_err());
    }

    #[test]
    fn durations_are_bounded() {
        assert_eq!(
            parse_bounded_duration("250ms", MAX_POLL_TIMEOUT).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            parse_bounded_duration("1h", MAX_HANDSHAKE_TIMEOUT).unwrap(),
            MAX_HANDSHAKE_TIMEOUT
        );

        assert!(parse_bounded_duration("2s", MAX_POLL_TIMEOUT).is_err());
        assert!(parse_bounded_duration("300000000000years", MAX_HANDSHAKE_TIMEOUT).is_err());
        assert!(parse_bounded_duration("soon", MAX_HANDSHAKE_TIMEOUT).is_err());
    }
}
