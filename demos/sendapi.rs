// Copyright 2020 Joyent, Inc.

use std::process;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{crate_version, Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use slog::{info, o, Drain, Level, LevelFilter, Logger};

use api_transport::config::{DEFAULT_HTTP_URL, DEFAULT_SOCKET_URL};
use api_transport::{
    ApiClient, Credentials, MemoryTokenStore, Request, TokenStore, TransportConfig,
};

static APP: &str = "sendapi";

pub fn parse_opts(app: &'static str) -> ArgMatches {
    Command::new(app)
        .about("Command-line tool for issuing one API call over the socket transport")
        .version(crate_version!())
        .arg(
            Arg::new("socket_url")
                .help("WebSocket endpoint of the API server")
                .long("socket-url")
                .short('s')
                .default_value(DEFAULT_SOCKET_URL),
        )
        .arg(
            Arg::new("http_url")
                .help("HTTP endpoint used when the socket is unavailable")
                .long("http-url")
                .short('u')
                .default_value(DEFAULT_HTTP_URL),
        )
        .arg(
            Arg::new("route")
                .help("Route of the API call, e.g. /users")
                .long("route")
                .short('r')
                .required(true),
        )
        .arg(
            Arg::new("data")
                .help("JSON-encoded payload for the API call")
                .long("data")
                .short('d'),
        )
        .arg(
            Arg::new("token")
                .help("Bearer token to attach to the request")
                .long("token")
                .short('t'),
        )
        .arg(
            Arg::new("wait_ms")
                .help("How long to wait for the socket before using the fallback (Default: 1000)")
                .long("wait-ms")
                .short('w')
                .value_parser(clap::value_parser!(u64))
                .default_value("1000"),
        )
        .arg(
            Arg::new("verbose")
                .help("Log transport activity")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue),
        )
        .get_matches()
}

fn logger(verbose: bool) -> Logger {
    let level = if verbose { Level::Debug } else { Level::Warning };
    let plain = slog_term::PlainSyncDecorator::new(std::io::stderr());
    Logger::root(
        Mutex::new(LevelFilter::new(
            slog_term::FullFormat::new(plain).build(),
            level,
        ))
        .fuse(),
        o!("build-id" => "0.1.0"),
    )
}

#[tokio::main]
async fn main() {
    let matches = parse_opts(APP);
    let log = logger(matches.get_flag("verbose"));

    let arg = |name: &str| matches.get_one::<String>(name).cloned();
    let route = arg("route").unwrap_or_else(|| {
        eprintln!("Failed to parse route argument");
        process::exit(1)
    });
    let data: Option<Value> = arg("data").map(|raw| {
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            eprintln!("Failed to parse data argument as JSON: {}", e);
            process::exit(1)
        })
    });

    let tokens = MemoryTokenStore::new();
    if let Some(token) = arg("token") {
        if let Err(e) = tokens.set(Credentials::new(token, Value::Null)) {
            eprintln!("Failed to store token: {}", e);
            process::exit(1)
        }
    }

    let config = TransportConfig::new(
        arg("socket_url").unwrap_or_else(|| String::from(DEFAULT_SOCKET_URL)),
        arg("http_url").unwrap_or_else(|| String::from(DEFAULT_HTTP_URL)),
    );
    let client = ApiClient::start(config, Arc::new(tokens), Some(&log)).unwrap_or_else(|e| {
        eprintln!("Failed to start transport: {}", e);
        process::exit(1)
    });

    let wait_ms = *matches.get_one::<u64>("wait_ms").unwrap_or(&1000);
    let opened = client.wait_until_open(Duration::from_millis(wait_ms)).await;
    info!(log, "issuing request"; "route" => &route, "socket_open" => opened);

    let request = Request { route, data };
    let response = client.send_api(request).await;
    client.shutdown().await;

    match serde_json::to_string(&response) {
        Ok(out) => println!("{}", out),
        Err(e) => eprintln!("Failed to encode response: {}", e),
    }
    if response.is_error() {
        process::exit(2)
    }
}
