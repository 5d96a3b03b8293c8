//! stego-bridge CLI entry point.
//!
//! Hides a secret inside a carrier image, or recovers one, by driving the
//! sandboxed steganography guest module through the bridge.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stego_bridge_common::ConfigFile;
use stego_bridge_core::{ContainerKind, GuestRuntime, StegoBridge};

#[derive(Parser, Debug)]
#[command(version, about = "Hide and recover secrets in carrier images via a sandboxed Wasm guest")]
struct Cli {
    /// Path to the compiled steganography guest module.
    #[arg(long, env = "STEGO_WASM_MODULE")]
    wasm: Option<PathBuf>,

    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed a secret into a carrier image
    Encode {
        /// Secret to embed
        #[arg(short, long)]
        secret: String,

        /// Path to the carrier image
        #[arg(short, long)]
        input: PathBuf,

        /// Path for the encoded image
        #[arg(short, long)]
        output: PathBuf,

        /// Carrier format; inferred from the input extension when omitted
        #[arg(short, long, value_parser = parse_kind)]
        format: Option<ContainerKind>,
    },
    /// Recover the secret from a previously encoded image
    Decode {
        /// Path to the encoded image
        #[arg(short, long)]
        input: PathBuf,

        /// Carrier format; inferred from the input extension when omitted
        #[arg(short, long, value_parser = parse_kind)]
        format: Option<ContainerKind>,
    },
}

fn parse_kind(s: &str) -> Result<ContainerKind, String> {
    s.parse()
}

fn resolve_kind(format: Option<ContainerKind>, input: &Path) -> anyhow::Result<ContainerKind> {
    format
        .or_else(|| ContainerKind::from_extension(input))
        .with_context(|| {
            format!(
                "Cannot infer carrier format from '{}'. Pass --format bmp|jpeg",
                input.display()
            )
        })
}

/// Tracing filter directive when neither `RUST_LOG` nor a config file
/// supplies one.
const DEFAULT_LOG_FILTER: &str = "info,stego_bridge=debug";

/// The filter directive to fall back on when `RUST_LOG` is unset:
/// the config file's `[logging] filter` if one was loaded, otherwise
/// [`DEFAULT_LOG_FILTER`].
fn fallback_filter(config: Option<&ConfigFile>) -> &str {
    config.map_or(DEFAULT_LOG_FILTER, |c| c.logging.filter.as_str())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // The config file is loaded before tracing comes up so its [logging]
    // filter can take effect; RUST_LOG still wins when set.
    let config = match &args.config {
        Some(path) => Some(
            ConfigFile::from_file(path)
                .with_context(|| format!("Failed loading config '{}'", path.display()))?,
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_filter(config.as_ref()))),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Module path: flag/environment first, then config file. Absence is
    // fatal before any operation runs.
    let module_path = match (args.wasm, &config) {
        (Some(path), _) => path,
        (None, Some(config)) => config
            .module_path()
            .context("Config file does not set [module] path")?
            .to_path_buf(),
        (None, None) => anyhow::bail!(
            "No guest module configured. Pass --wasm, set STEGO_WASM_MODULE, or use --config"
        ),
    };

    let mut runtime = GuestRuntime::new();
    stego_bridge_host::register_all(runtime.linker_mut())?;
    let instance = runtime.load(&module_path)?;
    let bridge = StegoBridge::new(instance);

    info!(module = %module_path.display(), "Guest module loaded");

    match args.command {
        Command::Encode {
            secret,
            input,
            output,
            format,
        } => {
            let kind = resolve_kind(format, &input)?;
            let image = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed reading carrier '{}'", input.display()))?;

            let encoded = bridge.encode(&secret, &image, kind).await?;

            tokio::fs::write(&output, &encoded)
                .await
                .with_context(|| format!("Failed writing '{}'", output.display()))?;
            info!(output = %output.display(), bytes = encoded.len(), "Secret embedded");
        }
        Command::Decode { input, format } => {
            let kind = resolve_kind(format, &input)?;
            let image = tokio::fs::read(&input)
                .await
                .with_context(|| format!("Failed reading image '{}'", input.display()))?;

            let secret = bridge.decode(&image, kind).await?;

            println!("{secret}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_filter_used_as_fallback() {
        let config = ConfigFile::from_toml(
            r#"
                [logging]
                filter = "warn,wasmtime=error"
            "#,
        )
        .unwrap();

        assert_eq!(fallback_filter(Some(&config)), "warn,wasmtime=error");
    }

    #[test]
    fn test_filter_without_config() {
        assert_eq!(fallback_filter(None), DEFAULT_LOG_FILTER);
    }
}
