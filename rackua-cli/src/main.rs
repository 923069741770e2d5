use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use rackua::{Bridge, CallError, RequestEnvironment, ResponseBody, VmConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rackua-cli")]
#[command(about = "Run one request against an embedded Lua web application", long_about = None)]
struct Args {
    /// Path to the application entry file
    #[arg(short, long, env = "RACKUA_APP")]
    app: PathBuf,

    /// Guest expression that resolves to the application callable
    #[arg(long, env = "RACKUA_APP_NAME", default_value = "app")]
    app_name: String,

    /// Request method
    #[arg(short, long, default_value = "GET")]
    method: String,

    /// Request path (may carry a query string)
    #[arg(short, long, default_value = "/")]
    path: String,

    /// Extra environment pairs, KEY=VALUE (repeatable)
    #[arg(short = 'e', long = "env")]
    env: Vec<String>,

    /// Request body
    #[arg(short, long, default_value = "")]
    body: String,

    /// Read extra environment pairs from a JSON object file
    #[arg(long)]
    env_json: Option<PathBuf>,

    /// Extra directories appended to the guest module search path (repeatable)
    #[arg(long = "module-path")]
    module_paths: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let request = build_request(&args)?;

    let bridge = Bridge::initialize(VmConfig {
        module_paths: args.module_paths.clone(),
        ..VmConfig::default()
    });
    bridge
        .load_application(&args.app)
        .with_context(|| format!("loading {}", args.app.display()))?;

    let response = match bridge.call_application(&args.app_name, &request) {
        Ok(response) => response,
        Err(CallError::AppRaised(err) | CallError::AppNotFound(err)) => {
            bail!("guest failure: {err}");
        }
        Err(err) => return Err(err).context("decoding the application response"),
    };

    println!("status: {}", response.status());
    for header in response.headers() {
        println!("{}: {}", header.key, header.value);
    }
    println!();

    match response.body() {
        ResponseBody::Inline(bytes) => {
            println!("{}", String::from_utf8_lossy(bytes));
        }
        ResponseBody::File(path) => {
            // The bridge hands back a path; streaming the file is our job.
            let contents =
                fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            println!("{}", String::from_utf8_lossy(&contents));
        }
    }

    Ok(())
}

fn build_request(args: &Args) -> Result<RequestEnvironment> {
    let mut request = RequestEnvironment::http(&args.method, &args.path);

    if let Some(path) = &args.env_json {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&raw).context("environment file must be a JSON object")?;
        for (key, value) in object {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            request = request.pair(key, value);
        }
    }

    for pair in &args.env {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("environment pair {pair:?} is not KEY=VALUE");
        };
        request = request.pair(key, value);
    }

    if !args.body.is_empty() {
        request = request.body(Bytes::from(args.body.clone().into_bytes()));
    }

    Ok(request)
}
