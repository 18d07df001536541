//! transport-probe: send one request through a configured upstream transport.
//!
//! Useful for checking a transport configuration against a live backend
//! (TLS trust, PROXY protocol, resolver overrides, unix sockets) without
//! running the whole proxy.
//!
//! ```text
//! transport-probe --config upstream.toml --source 203.0.113.7:4000 https://backend:8443/health
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::Body;
use clap::Parser;
use hyper::{Method, Request};

use reverse_proxy_transport::config::{load_config, TransportConfig};
use reverse_proxy_transport::observability::logging;
use reverse_proxy_transport::{
    DialInfo, HttpTransport, ProvisionContext, ProxyProtocolInfo, Replacer, RequestContext,
};

#[derive(Parser)]
#[command(name = "transport-probe")]
#[command(about = "Send a request through an upstream transport configuration", long_about = None)]
struct Cli {
    /// Transport configuration (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: Method,

    /// Client address announced in the PROXY header.
    #[arg(long)]
    source: Option<SocketAddr>,

    /// Connect to this unix socket instead of the URL's host.
    #[arg(long)]
    unix: Option<String>,

    /// Placeholder value for templated settings, as key=value.
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Print the effective configuration after defaults and exit.
    #[arg(long)]
    dump_config: bool,

    /// Request URL. A path-only URL needs --host.
    url: String,

    /// Host header for path-only URLs.
    #[arg(long)]
    host: Option<String>,
}

fn parse_var(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {input:?}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TransportConfig::default(),
    };

    let mut transport = HttpTransport::new(config);
    transport.provision(ProvisionContext::default())?;

    if cli.dump_config {
        println!("{}", toml::to_string_pretty(transport.config())?);
        return Ok(());
    }

    let mut replacer = Replacer::new();
    for (key, value) in cli.vars {
        replacer.set(key, value);
    }
    let mut ctx = RequestContext::new(replacer);
    if let Some(path) = cli.unix {
        ctx = ctx.with_dial_info(DialInfo::unix(path));
    }
    if let Some(source) = cli.source {
        ctx = ctx.with_proxy_protocol(ProxyProtocolInfo { source });
    }

    let mut request = Request::builder().method(cli.method).uri(&cli.url);
    if let Some(host) = &cli.host {
        request = request.header(hyper::header::HOST, host);
    }
    let request = request.body(Body::empty())?;

    match transport.round_trip(request, ctx).await {
        Ok(response) => {
            println!("{:?} {}", response.version(), response.status());
            for (name, value) in response.headers() {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            println!();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
            println!("{}", String::from_utf8_lossy(&body));
            Ok(())
        }
        Err(err) => {
            tracing::error!(dial_error = err.is_dial_error(), error = %err, "Request failed");
            transport.cleanup();
            Err(err.into())
        }
    }
}
