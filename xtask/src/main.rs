// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

mod image;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use consts::{BOOT_SECTION_END, BOOT_SECTION_START, PAGE_SIZE};
use image::PageImage;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::{env, fs};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct XtaskArgs {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an Intel HEX boot loader into the page image built into the updater.
    /// Writes new_boot.bin and new_boot.rs into the output directory.
    #[command(verbatim_doc_comment)]
    Image {
        /// Boot loader linked at the boot section start
        hex: PathBuf,
        #[arg(short, long, default_value = "target/new_boot")]
        out_dir: PathBuf,
    },

    /// Convert the boot loader and build the updater around it
    Build {
        hex: PathBuf,
        /// Offer the block upload session before writing the built-in image
        #[arg(long)]
        interactive: bool,
        /// Use the second self-programming sequence of the boot section
        #[arg(long)]
        skip_decoy: bool,
    },
}

fn project_root() -> PathBuf {
    Path::new(&env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(1)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

pub fn cargo() -> String {
    env::var("CARGO").unwrap_or_else(|_| "cargo".to_string())
}

fn convert(hex: &Path, out_dir: &Path) -> Result<PathBuf> {
    tracing::info!("Converting {}", hex.display());
    let text = fs::read_to_string(hex).with_context(|| format!("reading {}", hex.display()))?;
    let image = PageImage::from_ihex(&text).with_context(|| format!("converting {}", hex.display()))?;

    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let bin = out_dir.join("new_boot.bin");
    let rs = out_dir.join("new_boot.rs");
    fs::write(&bin, &image.bytes).with_context(|| format!("writing {}", bin.display()))?;
    fs::write(&rs, image.to_rust()).with_context(|| format!("writing {}", rs.display()))?;

    print_image_size(&image);
    tracing::info!("Wrote {} and {}", bin.display(), rs.display());
    Ok(rs)
}

fn print_image_size(image: &PageImage) {
    let capacity = (BOOT_SECTION_END - BOOT_SECTION_START) as usize;
    let usage_percentage = (image.bytes.len() as f64 / capacity as f64) * 100.0;

    println!("Boot image:");
    println!("   Pages: {} of {}", image.pages(), capacity / PAGE_SIZE);
    println!("   Bytes: {} bytes", image.bytes.len());
    println!("   Boot section usage: {:.1}%", usage_percentage);
    println!("   CRC-32C: {:#010x}", image.crc());
}

fn build_updater(new_boot_rs: &Path, interactive: bool, skip_decoy: bool, verbose: bool) -> Result<()> {
    tracing::info!("Building updater....");
    let mut features = Vec::new();
    if interactive {
        features.push("interactive");
    }
    if skip_decoy {
        features.push("skip-decoy");
    }

    let new_boot_rs = fs::canonicalize(new_boot_rs)?;
    let mut cargo_cmd = Command::new(cargo());
    let mut cmd = cargo_cmd
        .current_dir(project_root().join("updater"))
        .env("NEW_BOOT_RS", new_boot_rs)
        .args(["build", "--release"]);
    if !features.is_empty() {
        cmd = cmd.arg("--features").arg(features.join(","));
    }
    if !verbose {
        cmd = cmd.stdout(Stdio::null()).stderr(Stdio::null()).arg("--quiet");
    }
    let status = cmd.status().context("running cargo")?;
    if !status.success() {
        bail!("updater build failed");
    }
    tracing::info!("Updater built with features [{}]", features.join(", "));
    Ok(())
}

fn main() -> Result<()> {
    let args = XtaskArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match args.command {
        Commands::Image { hex, out_dir } => {
            convert(&hex, &out_dir)?;
        }
        Commands::Build {
            hex,
            interactive,
            skip_decoy,
        } => {
            let out_dir = project_root().join("target/new_boot");
            let rs = convert(&hex, &out_dir)?;
            build_updater(&rs, interactive, skip_decoy, args.verbose)?;
        }
    }
    Ok(())
}
