//! Batch dump: unlock, copy, and relock each requested directory in turn.

use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use fsdump_core::{
    AddKeyStatus, Keyring, MetadataStore, PolicyResolver, Prompter, RemovalStatus,
};

use crate::copy::{copy_tree, CopyStats};
use crate::errors::CliError;
use crate::interrupt::Interrupt;
use crate::ui::{badge, hint, Badge, UiContext};

/// One directory to dump, with its resolved source and destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// As given on the command line, relative to the mountpoint
    pub dir: PathBuf,
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Outcome of one dumped directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReport {
    pub target: Target,
    pub stats: CopyStats,
    pub removal: RemovalStatus,
}

/// Resolve and check every target before any key is touched.
pub fn plan(mountpoint: &Path, output_dir: &Path, dirs: &[PathBuf]) -> Result<Vec<Target>, CliError> {
    let mut targets: Vec<Target> = Vec::with_capacity(dirs.len());
    let mut relatives: Vec<PathBuf> = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let relative = normalize_relative(dir)?;
        let source = mountpoint.join(&relative);
        if !source.is_dir() {
            return Err(CliError::not_found(
                format!(
                    "Directory {} does not exist or it's not a directory",
                    source.display()
                ),
                "Hint: Directories are given relative to the mountpoint.",
            ));
        }

        let destination = output_dir.join(&relative);
        if destination.symlink_metadata().is_ok() {
            return Err(CliError::invalid_input(format!(
                "Destination {} already exists; refusing to overwrite it",
                destination.display()
            )));
        }
        // Copying one target would create the destination of the other.
        if let Some(other) = relatives
            .iter()
            .find(|other| relative.starts_with(other) || other.starts_with(&relative))
        {
            let message = if *other == relative {
                format!("Directory {} was given more than once", dir.display())
            } else {
                format!(
                    "Directories {} and {} overlap; dump only the outer one",
                    other.display(),
                    relative.display()
                )
            };
            return Err(CliError::invalid_input(message));
        }

        relatives.push(relative);
        targets.push(Target {
            dir: dir.clone(),
            source,
            destination,
        });
    }
    Ok(targets)
}

/// Strip `.` components and reject anything that could leave the base directory.
fn normalize_relative(dir: &Path) -> Result<PathBuf, CliError> {
    let mut out = PathBuf::new();
    for component in dir.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(CliError::invalid_input(format!(
                    "Directory {} must be relative to the mountpoint and stay inside it",
                    dir.display()
                )));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(CliError::invalid_input(
            "Dumping the mountpoint itself is not supported; name a directory inside it",
        ));
    }
    Ok(out)
}

/// Dump `targets` sequentially; the first failure stops the batch.
///
/// Each directory is relocked before the next one is unlocked, so a
/// failure leaves no key registered. Termination signals received while a
/// directory is unlocked stop the copy and relock it.
pub fn dump_all<K, M, P>(
    resolver: &PolicyResolver<K, M>,
    targets: &[Target],
    prompter: &mut P,
    ctx: &UiContext,
    interrupt: &Interrupt,
    quiet: bool,
) -> anyhow::Result<Vec<DumpReport>>
where
    K: Keyring,
    M: MetadataStore,
    P: Prompter,
{
    let say = |line: String| {
        if !quiet {
            println!("{}", line);
        }
    };

    let mut reports = Vec::with_capacity(targets.len());
    for target in targets {
        let dir = target.dir.display();
        let result = resolver.with_unlocked(&target.source, prompter, |unlocked| {
            let _armed = interrupt
                .arm()
                .context("Failed to install signal handlers")?;
            let note = match unlocked.add_status() {
                AddKeyStatus::Added => String::new(),
                AddKeyStatus::AlreadyPresent => " (key was already present)".to_string(),
            };
            say(badge(
                ctx,
                Badge::Ok,
                &format!("Directory {} has been unlocked{}", dir, note),
            ));
            say(badge(
                ctx,
                Badge::Info,
                &format!("Copying content of {} to {}...", dir, target.destination.display()),
            ));
            let stats = copy_tree(&target.source, &target.destination, interrupt)
                .with_context(|| {
                    format!(
                        "Failed to copy {} to {}",
                        target.source.display(),
                        target.destination.display()
                    )
                })?;
            say(badge(
                ctx,
                Badge::Ok,
                &format!(
                    "Finished copying of {}: {} files, {} directories, {} symlinks",
                    dir, stats.files, stats.dirs, stats.symlinks
                ),
            ));
            Ok::<_, anyhow::Error>(stats)
        });

        let (stats, removal) = match result {
            Ok(done) => done,
            Err(err) => {
                say(badge(ctx, Badge::Err, &format!("Dump of {} stopped", dir)));
                return Err(err);
            }
        };

        match removal {
            RemovalStatus::Removed => say(badge(ctx, Badge::Ok, &format!("{} locked.", dir))),
            RemovalStatus::FilesBusy => {
                say(badge(
                    ctx,
                    Badge::Warn,
                    &format!("{} locked, but some files are still in use.", dir),
                ));
                say(hint(ctx, "Close the open files and remount to lock them fully."));
            }
            RemovalStatus::OtherUsers => say(badge(
                ctx,
                Badge::Warn,
                &format!("{} stays unlocked for other users who added the key.", dir),
            )),
        }

        reports.push(DumpReport {
            target: target.clone(),
            stats,
            removal,
        });
    }
    Ok(reports)
}
