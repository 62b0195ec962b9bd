//! fsdump CLI - Copy the contents of fscrypt-encrypted directories
//!
//! Unlocks each requested directory with a protector passphrase, copies its
//! contents out in the clear, and locks it again.

mod cli;
mod config;
mod constants;
mod copy;
mod dump;
mod errors;
mod interrupt;
mod logging;
mod prompt;
mod ui;

use clap::Parser;

use fsdump_core::{FscryptKeyring, FsMetadataStore, FsdumpError, PolicyResolver, RemovalStatus};

use crate::cli::Cli;
use crate::constants::exit_codes;
use crate::errors::CliError;
use crate::interrupt::Interrupt;
use crate::prompt::DialoguerPrompter;
use crate::ui::{receipt, UiContext};

fn main() {
    let cli = Cli::parse();
    // Every unlocked directory is released inside `run`, before any exit.
    if let Err(err) = run(&cli) {
        exit_with(err);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = config::load_config(cli.config.as_deref())?;
    logging::init(cli.verbose, &config.log.level);
    let ctx = UiContext::from_env(cli.no_color, cli.ascii, cli.no_input);

    let store = FsMetadataStore::open(&cli.mountpoint)?
        .with_fallback_root(&config.metadata.fallback_root);
    let targets = dump::plan(&cli.mountpoint, &cli.output_dir, &cli.dirs)?;
    tracing::info!(
        mountpoint = %cli.mountpoint.display(),
        count = targets.len(),
        "starting dump"
    );

    let resolver = PolicyResolver::new(FscryptKeyring::new(), store, &cli.mountpoint);
    let mut prompter = DialoguerPrompter::from_env(ctx.interactive)?;
    let interrupt = Interrupt::new();
    let reports = dump::dump_all(
        &resolver,
        &targets,
        &mut prompter,
        &ctx,
        &interrupt,
        cli.quiet,
    )?;

    if !cli.quiet {
        let dirs = reports.len().to_string();
        let files = reports.iter().map(|r| r.stats.files).sum::<u64>().to_string();
        let bytes = reports.iter().map(|r| r.stats.bytes).sum::<u64>().to_string();
        let output = cli.output_dir.display().to_string();
        let still_open = reports
            .iter()
            .filter(|r| r.removal != RemovalStatus::Removed)
            .map(|r| r.target.dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let mut items = vec![
            ("Directories", dirs.as_str()),
            ("Files", files.as_str()),
            ("Bytes", bytes.as_str()),
            ("Output", output.as_str()),
        ];
        if !still_open.is_empty() {
            items.push(("Not fully locked", still_open.as_str()));
        }
        println!("{}", receipt(&ctx, "Dump complete", &items));
    }
    Ok(())
}

fn exit_with(err: anyhow::Error) -> ! {
    if Interrupt::caused(&err) {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_codes::INTERRUPTED)
    }
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        cli_err.exit()
    }
    if let Some(cli_err) = err.downcast_ref::<FsdumpError>().and_then(CliError::from_core) {
        cli_err.exit()
    }
    eprintln!("Error: {:#}", err);
    std::process::exit(1)
}
