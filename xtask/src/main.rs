//! Build automation tasks for the evpg workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Feature combinations of `evpg-pool` that must build and pass tests.
const POOL_FEATURE_SETS: &[&[&str]] = &[&[], &["tokio"], &["serde"], &["tokio", "serde"]];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for evpg")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, feature matrix, test)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy with all features
    Clippy,
    /// Run tests, optionally for a single package
    Test {
        /// Package to test, e.g. `evpg-pool`
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Test evpg-pool under every feature combination
    Features,
    /// Generate documentation
    Doc,
    /// Run benchmarks
    Bench,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            features(&sh)?;
            test(&sh, None)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { package } => test(&sh, package.as_deref())?,
        Command::Features => features(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Bench => bench(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;

    PathBuf::from(manifest.trim())
        .parent()
        .map(PathBuf::from)
        .context("manifest path has no parent directory")
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-features --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>) -> Result<()> {
    match package {
        Some(package) => {
            println!("Running tests for {package}...");
            cmd!(sh, "cargo test -p {package} --all-features").run()?;
        }
        None => {
            println!("Running workspace tests...");
            cmd!(sh, "cargo test --workspace --all-features").run()?;
        }
    }
    Ok(())
}

fn features(sh: &Shell) -> Result<()> {
    for set in POOL_FEATURE_SETS {
        let list = set.join(",");
        println!("Testing evpg-pool with features [{list}]...");
        cmd!(
            sh,
            "cargo test -p evpg-pool --no-default-features --features={list}"
        )
        .run()
        .with_context(|| format!("evpg-pool failed with features [{list}]"))?;
    }
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(sh, "cargo doc --workspace --all-features --no-deps").run()?;
    Ok(())
}

fn bench(sh: &Shell) -> Result<()> {
    println!("Running benchmarks...");
    cmd!(sh, "cargo bench -p evpg-types").run()?;
    Ok(())
}
