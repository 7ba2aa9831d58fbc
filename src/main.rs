use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use sicxe::opcode::OpcodeTable;

/// Two-pass assembler for the SIC/XE instruction set.
#[derive(Debug, Parser)]
#[command(name = "sicxe", about = "Assembles SIC/XE source into an object program and listing")]
struct Cli {
    /// Assembly source file to assemble.
    source: PathBuf,

    /// Path to write the object program to. Defaults to `<source>.obj`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to write the listing to. Defaults to `<source>.lst`.
    #[arg(short, long)]
    listing: Option<PathBuf>,

    /// Path to the opcode table CSV.
    #[arg(long, default_value = "optab.csv")]
    optab: PathBuf,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let optab = OpcodeTable::load(&cli.optab)
        .with_context(|| format!("loading opcode table \"{}\"", cli.optab.display()))?;

    let source = fs::read_to_string(&cli.source)
        .with_context(|| format!("reading source \"{}\"", cli.source.display()))?;

    log::debug!("assembling {}", cli.source.display());
    let assembled = sicxe::assemble(&source, &optab)
        .with_context(|| format!("assembling \"{}\"", cli.source.display()))?;

    let output_path = cli.output.clone().unwrap_or_else(|| with_extension(&cli.source, "obj"));
    let listing_path = cli.listing.clone().unwrap_or_else(|| with_extension(&cli.source, "lst"));

    fs::write(&output_path, &assembled.object_program)
        .with_context(|| format!("writing object program \"{}\"", output_path.display()))?;
    fs::write(&listing_path, &assembled.listing)
        .with_context(|| format!("writing listing \"{}\"", listing_path.display()))?;

    log::debug!(
        "wrote {} and {}",
        output_path.display(),
        listing_path.display()
    );
    Ok(())
}

fn with_extension(source: &Path, ext: &str) -> PathBuf {
    source.with_extension(ext)
}
