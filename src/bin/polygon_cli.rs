//! polygon-cli: Polygon API 命令行工具
//!
//! Usage:
//!   polygon-cli call <method> [name=value ...]                 Print the JSON result
//!   polygon-cli text <method> [name=value ...]                 Print a plain-text body
//!   polygon-cli download <method> --out <path> [name=value ...] Save a binary body
//!
//! A value starting with `@` names a file whose content is sent (`source=@main.cpp`).

use anyhow::{bail, Context};
use polygon_api::{CallDescriptor, ParamValue, PolygonSession, TracingProgress};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let outcome = match args[1].as_str() {
        "call" => cmd_call(&args[2..]).await,
        "text" => cmd_text(&args[2..]).await,
        "download" => cmd_download(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("error: {e:#}");
        std::process::exit(2);
    }
}

fn print_usage() {
    println!(
        r#"polygon-cli: Polygon API 命令行工具

USAGE:
    polygon-cli <COMMAND> <METHOD> [OPTIONS] [name=value ...]

COMMANDS:
    call <method>                   Call a JSON endpoint and print its result
    text <method>                   Call a plain-text endpoint and print the body
    download <method> --out <path>  Stream a binary endpoint into a file
    version                         Show version information
    help                            Show this help message

PARAMETERS:
    name=value                      Text parameter
    name=@path                      File parameter (content read as UTF-8)

ENVIRONMENT:
    POLYGON_API_KEY, POLYGON_API_SECRET   Credentials (the OS keyring is tried first)
    POLYGON_API_URL                       API base address
    POLYGON_PIN                           Pin sent with every request
    RUST_LOG                              Log filter (default: warn)"#
    );
}

fn cmd_version() {
    println!("polygon-cli {}", env!("CARGO_PKG_VERSION"));
}

async fn cmd_call(args: &[String]) -> anyhow::Result<()> {
    let (call, rest) = parse_call(args)?;
    reject_options(&rest)?;
    let session = PolygonSession::from_env().context("cannot configure session")?;
    let (result, stats) = session
        .call_with_stats::<serde_json::Value>(&call, None)
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if stats.retries() > 0 {
        eprintln!(
            "({} attempts, {} ms backoff)",
            stats.attempts, stats.backoff_ms
        );
    }
    Ok(())
}

async fn cmd_text(args: &[String]) -> anyhow::Result<()> {
    let (call, rest) = parse_call(args)?;
    reject_options(&rest)?;
    let session = PolygonSession::from_env().context("cannot configure session")?;
    let body = session.call_text(&call).await?;
    print!("{body}");
    Ok(())
}

async fn cmd_download(args: &[String]) -> anyhow::Result<()> {
    let (call, rest) = parse_call(args)?;
    let out = match rest.as_slice() {
        [flag, path] if flag == "--out" || flag == "-o" => PathBuf::from(path),
        [] => bail!("download needs --out <path>"),
        other => bail!("unexpected arguments: {}", other.join(" ")),
    };
    let session = PolygonSession::from_env().context("cannot configure session")?;
    let progress = TracingProgress::new(call.method().to_string());
    let transfer = session.download_to_path(&call, &out, &progress).await?;
    eprintln!("saved {} bytes to {}", transfer.bytes, out.display());
    Ok(())
}

/// Split `<method> [--flag value] [name=value ...]` into a call and leftover options.
fn parse_call(args: &[String]) -> anyhow::Result<(CallDescriptor, Vec<String>)> {
    let Some(method) = args.first() else {
        bail!("missing method name (e.g. problem.info)");
    };
    let mut call = CallDescriptor::new(method.as_str());
    let mut options = Vec::new();
    let mut iter = args[1..].iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with('-') {
            options.push(arg.clone());
            if let Some(value) = iter.next() {
                options.push(value.clone());
            }
            continue;
        }
        let Some((name, value)) = arg.split_once('=') else {
            bail!("parameter must look like name=value, got {arg:?}");
        };
        call = call.param(name, parse_value(value));
    }
    Ok((call, options))
}

fn parse_value(raw: &str) -> ParamValue {
    match raw.strip_prefix('@') {
        Some(path) => ParamValue::file(path),
        None => ParamValue::text(raw),
    }
}

fn reject_options(options: &[String]) -> anyhow::Result<()> {
    if options.is_empty() {
        Ok(())
    } else {
        bail!("unexpected options: {}", options.join(" "))
    }
}
