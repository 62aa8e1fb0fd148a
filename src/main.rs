use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cast::apply::{SyncOptions, sync_vaults};
use cast::error::CastError;
use cast::index::{self, BuildMode};
use cast::lock::VaultLock;
use cast::peer::PeerJournal;
use cast::vault::Vault;

/// Decentralized sync engine for Markdown vaults
///
/// cast keeps collections of Markdown documents ("vaults") in sync
/// peer-to-peer, without a central server. Documents carry a stable
/// identifier in their header block; files converge in body content while
/// each vault keeps its own local header keys.
///
/// QUICK START:
///
///   # Build (or refresh) a vault's index, assigning ids to new files:
///   cast index ~/vaults/home --fix
///
///   # Preview what a sync would do:
///   cast sync ~/vaults/home ~/vaults/laptop --dry-run
///
///   # Sync for real:
///   cast sync ~/vaults/home ~/vaults/laptop
///
/// Unresolved merges never overwrite your files: they are written to
/// timestamped *.conflicted-* siblings for you to resolve.
#[derive(Parser)]
#[command(name = "cast")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'cast <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or refresh a vault's index
    ///
    /// Scans the vault for tracked documents, reusing digests for files
    /// whose size and mtime are unchanged. With --fix, header-bearing
    /// files that lack an identifier get one injected.
    Index {
        /// Path to the vault root
        vault: PathBuf,
        /// Re-digest everything instead of reusing the prior snapshot
        #[arg(long)]
        rebuild: bool,
        /// Inject missing identifiers into eligible files
        #[arg(long)]
        fix: bool,
    },

    /// Sync one vault into another
    ///
    /// Indexes both vaults, plans one action per document, and applies
    /// the plan atomically under the destination's lock. Exit code 3
    /// means the sync completed but left unresolved conflict files.
    Sync {
        /// Path to the source vault root
        source: PathBuf,
        /// Path to the destination vault root
        dest: PathBuf,
        /// Force mirror mode: destination becomes a copy of source
        #[arg(long)]
        mirror: bool,
        /// Plan only; print actions without applying them
        #[arg(long)]
        dry_run: bool,
        /// Do not inject missing identifiers while indexing
        #[arg(long)]
        no_fix: bool,
    },

    /// Show a vault's index and peer summary
    Status {
        /// Path to the vault root
        vault: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Index {
            vault,
            rebuild,
            fix,
        } => run_index(&vault, rebuild, fix),
        Commands::Sync {
            source,
            dest,
            mirror,
            dry_run,
            no_fix,
        } => run_sync(&source, &dest, mirror, dry_run, no_fix),
        Commands::Status { vault } => run_status(&vault),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn run_index(root: &Path, rebuild: bool, fix: bool) -> i32 {
    let result = (|| -> Result<i32, CastError> {
        let vault = Vault::open(root)?;
        let lock = VaultLock::acquire_default(&vault.lock_path())?;
        let mode = if rebuild {
            BuildMode::Rebuild
        } else {
            BuildMode::Incremental
        };
        let build = index::build(&vault, mode, fix)?;
        build.snapshot.save(&vault.index_path())?;
        lock.release();

        println!(
            "indexed {}: {} document(s), {} re-digested, {} reused",
            vault.id(),
            build.snapshot.entries.len(),
            build.digested,
            build.reused
        );
        for (id, path) in &build.injected {
            println!("  assigned {id} to {path}");
        }
        for skipped in &build.skipped {
            println!("  skipped {}: {}", skipped.path, skipped.reason);
        }
        Ok(0)
    })();

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

fn run_sync(source: &Path, dest: &Path, mirror: bool, dry_run: bool, no_fix: bool) -> i32 {
    let options = SyncOptions {
        mirror,
        dry_run,
        auto_fix: !no_fix,
        ..SyncOptions::default()
    };
    match sync_vaults(source, dest, &options) {
        Ok(report) => {
            println!("{report}");
            report.exit_code()
        }
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

fn run_status(root: &Path) -> i32 {
    let result = (|| -> Result<(), CastError> {
        let vault = Vault::open(root)?;
        let snapshot = cast::index::IndexSnapshot::load(&vault.index_path())?;

        match snapshot {
            Some(snapshot) => {
                println!("vault {}: {} document(s) indexed", vault.id(), snapshot.entries.len());
            }
            None => {
                println!(
                    "vault {}: no index yet (run: cast index {})",
                    vault.id(),
                    root.display()
                );
            }
        }

        let peers_dir = vault.peers_dir();
        if let Ok(entries) = std::fs::read_dir(&peers_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(peer_name) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| cast::model::types::VaultId::new(s).ok())
                else {
                    continue;
                };
                let journal = PeerJournal::load(&path, vault.id().clone(), peer_name.clone())?;
                println!("  peer {peer_name}: {} document(s) tracked", journal.len());
            }
        }
        Ok(())
    })();

    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}
