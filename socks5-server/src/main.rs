use socks5_proto::auth::{AuthPolicy, Credential};
use socks5_proto::{Acceptor, EventSink, ServerConfig, TracingEventSink};
use std::sync::Arc;

const USAGE: &str = "[--host <HOST>] [--port <PORT>] [--backlog <N>] [--require-auth] [--user <USERNAME>,<PASSWORD>]";
const DEFAULT_PORT: u16 = 10696;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let raw_args: Vec<String> = std::env::args().collect();
    let raw_args: Vec<&str> = raw_args.iter().skip(1).map(String::as_str).collect();
    let args = match parse_args(&raw_args) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Usage: socks5-server {USAGE}");
            std::process::exit(1);
        }
    };

    if args.show_usage {
        println!("Usage: socks5-server {USAGE}");
        return Ok(());
    }

    let config = Arc::new(build_config(&args));
    let sink: Arc<dyn EventSink> = Arc::new(TracingEventSink);

    let acceptor = Acceptor::bind(Arc::clone(&config), sink)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}:{}: {e}", config.bind_host, config.bind_port))?;

    tracing::info!(host = %config.bind_host, port = config.bind_port, "listening for SOCKS5 connections");

    tokio::select! {
        result = acceptor.run() => {
            result.map_err(|e| anyhow::anyhow!("accept loop ended: {e}"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested; no longer accepting new connections, existing sessions run to completion");
        }
    }

    Ok(())
}

fn build_config(args: &Args<'_>) -> ServerConfig {
    let credential = args.user.map(|(username, password)| Credential {
        username: username.to_owned(),
        password: password.to_owned(),
    });

    ServerConfig {
        bind_host: args.host.to_owned(),
        bind_port: args.port,
        max_pending: args.backlog,
        auth: AuthPolicy {
            require_auth: args.require_auth || credential.is_some(),
            credential,
        },
        ipv6_enabled: true,
    }
}

#[derive(Debug)]
struct Args<'a> {
    host: &'a str,
    port: u16,
    backlog: u32,
    require_auth: bool,
    user: Option<(&'a str, &'a str)>,
    show_usage: bool,
}

impl<'a> Default for Args<'a> {
    fn default() -> Self {
        Self {
            host: "0.0.0.0",
            port: DEFAULT_PORT,
            backlog: 128,
            require_auth: false,
            user: None,
            show_usage: false,
        }
    }
}

fn parse_args<'a>(mut input: &[&'a str]) -> anyhow::Result<Args<'a>> {
    let mut args = Args::default();

    loop {
        match input {
            ["--host", value, rest @ ..] => {
                args.host = value;
                input = rest;
            }
            ["--port" | "-p", value, rest @ ..] => {
                args.port = value.parse().map_err(|e| anyhow::anyhow!("port value malformed: {e}"))?;
                input = rest;
            }
            ["--backlog", value, rest @ ..] => {
                args.backlog = value.parse().map_err(|e| anyhow::anyhow!("backlog value malformed: {e}"))?;
                input = rest;
            }
            ["--require-auth", rest @ ..] => {
                args.require_auth = true;
                input = rest;
            }
            ["--user" | "-u", value, rest @ ..] => {
                let idx = value
                    .find(',')
                    .ok_or_else(|| anyhow::anyhow!("malformed username,password: {value}"))?;
                let (user, pass) = value.split_at(idx);
                args.user = Some((user, &pass[1..]));
                input = rest;
            }
            ["--help" | "-h", rest @ ..] => {
                args.show_usage = true;
                input = rest;
            }
            [unexpected, ..] => anyhow::bail!("unexpected argument: {unexpected}"),
            [] => break,
        }
    }

    Ok(args)
}
