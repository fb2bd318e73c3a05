use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use otagen_core::compress::uncompressed_len;
use otagen_core::protocol::ImageHeader;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the CLI
    Run {
        /// Arguments passed to otagen
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Decode the header and footers of a generated image
    Inspect {
        /// OTA image
        image: PathBuf,
    },
}

fn inspect(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let header = ImageHeader::parse(&bytes)?;
    print!("{header}");

    let payload = &bytes[ImageHeader::SIZE..];
    if payload.len() != header.payload_len() {
        println!(
            "  WARNING: payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len()
        );
    }
    let crc = otagen_core::crc32(payload);
    println!(
        "  CRC check: {}",
        if crc == header.crc32 { "OK" } else { "MISMATCH" }
    );

    if header.options.is_compressed() {
        println!("  Unpacked size: {}", uncompressed_len(payload)?);
    }
    if let Some(at) = header.footer_offset(payload)? {
        let footer = header.signature_footer(payload)?.context("missing footer")?;
        println!("  Footer @0x{at:X}: size={} sig={:?}", footer.size, footer.signature);
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            let status = Command::new("cargo").arg("build").status()?;
            if !status.success() {
                anyhow::bail!("Build failed");
            }
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let status = Command::new("cargo")
                .arg("run")
                .arg("-p")
                .arg("otagen-cli")
                .arg("--")
                .args(args)
                .status()?;
            if !status.success() {
                anyhow::bail!("Run failed");
            }
        }
        Commands::Inspect { image } => inspect(image)?,
    }

    Ok(())
}
