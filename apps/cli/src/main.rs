use std::path::PathBuf;

use clap::Parser;
use otagen_core::session::{BuildConfig, BuildSession};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bootloader OTA image generator", long_about = None)]
struct Args {
    /// Input application binary
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output image
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// LZMA-compress the payload
    #[arg(short, long, overrides_with = "no_compress")]
    compress: bool,

    /// Do not compress, even if the config file enables it
    #[arg(long, overrides_with = "compress")]
    no_compress: bool,

    /// Sign with this private key (PEM)
    #[arg(short, long, value_name = "KEY")]
    sign: Option<PathBuf>,

    /// Write the payload only, without the OTA header
    #[arg(short, long, overrides_with = "no_bin_only")]
    bin_only: bool,

    /// Write the full OTA image, even if the config file selects binary-only
    #[arg(long, overrides_with = "bin_only")]
    no_bin_only: bool,

    /// Load settings from a TOML file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// openssl executable used for signing
    #[arg(long)]
    openssl: Option<String>,

    /// Exchange data with openssl through temporary files
    #[arg(long, overrides_with = "no_scratch_files")]
    scratch_files: bool,

    /// Pipe data to openssl, even if the config file enables scratch files
    #[arg(long, overrides_with = "scratch_files")]
    no_scratch_files: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<BuildConfig> {
        let mut config = match &self.config {
            Some(path) => BuildConfig::load_from_file(path)?,
            None => BuildConfig::default(),
        };
        if self.input.is_some() {
            config.input = self.input;
        }
        if self.output.is_some() {
            config.output = self.output;
        }
        if self.sign.is_some() {
            config.sign_key = self.sign;
        }
        if self.openssl.is_some() {
            config.openssl = self.openssl;
        }
        config.compress = toggle(config.compress, self.compress, self.no_compress);
        config.bin_only = toggle(config.bin_only, self.bin_only, self.no_bin_only);
        config.scratch_files =
            toggle(config.scratch_files, self.scratch_files, self.no_scratch_files);
        Ok(config)
    }
}

/// Resolve an `--x` / `--no-x` flag pair against the configured value.
fn toggle(current: bool, on: bool, off: bool) -> bool {
    if on {
        true
    } else if off {
        false
    } else {
        current
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let session = BuildSession::new(&config)?;
    session.run()?;
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting OTA image generator...");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
