//! Tapedeck CLI

use std::path::Path;
use std::process;

use anyhow::{bail, Context};
use tapedeck::codec;
use tapedeck::Cassette;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("Tapedeck v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: tapedeck <command> <cassette.json>");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  inspect   List the interactions in a cassette");
        eprintln!("  check     Verify every interaction and body can be read");
        process::exit(1);
    }

    let command = &args[1];
    let path = Path::new(&args[2]);

    let result = match command.as_str() {
        "inspect" => inspect(path),
        "check" => check(path),
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'tapedeck' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn load(path: &Path) -> anyhow::Result<(Vec<u8>, Cassette)> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let cassette = Cassette::from_slice(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok((data, cassette))
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let (_, cassette) = load(path)?;

    println!("Cassette: {}", cassette.name);
    println!("Interactions: {}", cassette.len());
    println!();

    for interaction in &cassette.interactions {
        let format = interaction.response_body.as_ref().map_or("no body".to_string(), |body| {
            codec::encode(body, &interaction.response.headers).format.to_string()
        });
        println!(
            "{} {} -> {} ({})",
            interaction.request.method, interaction.request.url, interaction.response.status, format
        );
    }

    Ok(())
}

fn check(path: &Path) -> anyhow::Result<()> {
    let (data, cassette) = load(path)?;

    // Parsing skips unreadable interactions, so compare against the raw count
    let raw: serde_json::Value = serde_json::from_slice(&data)?;
    let expected = raw
        .get("interactions")
        .and_then(serde_json::Value::as_array)
        .map_or(0, Vec::len);

    if cassette.len() != expected {
        bail!(
            "{} of {} interactions in '{}' could not be read",
            expected - cassette.len(),
            expected,
            cassette.name
        );
    }

    println!("OK: '{}' ({} interactions)", cassette.name, cassette.len());
    Ok(())
}
