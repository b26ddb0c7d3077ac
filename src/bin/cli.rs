//! skipfile CLI
//!
//! Command-line tool for inspecting and modifying skipfile databases:
//! point lookups and updates, prefix listing, structural dumps,
//! consistency checking, compaction, and a tab-separated batch mode for
//! scripting multi-command transactions.

use std::io::{self, BufRead, Write as _};
use std::process::exit;

use clap::{Parser, Subcommand};
use skipfile::{Db, OpenOptions, Precondition, Result, SkipError, Txn, TxnMode};
use tracing_subscriber::{fmt, EnvFilter};

/// skipfile CLI
#[derive(Parser, Debug)]
#[command(name = "skipfile-cli")]
#[command(about = "Inspect and modify skipfile databases")]
#[command(version)]
struct Args {
    /// Database file path
    file: String,

    /// Create the database if it does not exist
    #[arg(long)]
    create: bool,

    /// Open read-only (shared lock only)
    #[arg(long)]
    shared: bool,

    /// Skip fsync on commit (fast but unsafe)
    #[arg(long)]
    nosync: bool,

    /// Skip checksum verification on reads
    #[arg(long)]
    nocheck: bool,

    /// Fail instead of waiting when the file is locked
    #[arg(long)]
    nonblocking: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print key/value pairs, optionally restricted to a prefix
    Show {
        /// Key prefix to match (defaults to everything)
        prefix: Option<String>,
    },

    /// Print the value stored under a key
    Get {
        /// The key to look up
        key: String,
    },

    /// Set a key to a value
    Set {
        /// The key to set
        key: String,

        /// The value to store
        value: String,
    },

    /// Delete a key (succeeds even if absent)
    Delete {
        /// The key to delete
        key: String,
    },

    /// Print file structure (level 0: header summary, level 1: records)
    Dump {
        /// Detail level
        #[arg(default_value = "0")]
        level: u8,
    },

    /// Check index and checksum consistency
    Consistent,

    /// Compact the file, dropping tombstones and superseded versions
    Repack,

    /// Run tab-separated commands from stdin
    ///
    /// One command per line: BEGIN, COMMIT, ABORT, SET\tkey\tvalue,
    /// GET\tkey, DELETE\tkey, SHOW\t[prefix]. Stops on the first error,
    /// aborting any open transaction.
    Batch,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,skipfile=info"));

    fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();

    let opts = OpenOptions::new()
        .create(args.create)
        .shared(args.shared)
        .nosync(args.nosync)
        .nochecksum(args.nocheck)
        .nonblocking(args.nonblocking);

    let db = match Db::open(&args.file, opts) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("failed to open {}: {}", args.file, e);
            exit(1);
        }
    };

    let result = match args.command {
        Commands::Show { prefix } => show(&db, prefix.as_deref().unwrap_or("")),
        Commands::Get { key } => get(&db, &key),
        Commands::Set { key, value } => {
            db.store(key.as_bytes(), Some(value.as_bytes()), Precondition::None)
        }
        Commands::Delete { key } => db.delete(key.as_bytes()),
        Commands::Dump { level } => db.dump(level),
        Commands::Consistent => consistent(&db, &args.file),
        Commands::Repack => db.repack(),
        Commands::Batch => batch(&db),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        exit(1);
    }
}

fn show(db: &Db, prefix: &str) -> Result<()> {
    db.foreach(
        prefix.as_bytes(),
        None,
        |key, value| {
            print_pair(key, value);
            Ok(true)
        },
        false,
    )?;
    Ok(())
}

fn get(db: &Db, key: &str) -> Result<()> {
    match db.fetch(key.as_bytes())? {
        Some(value) => {
            let mut out = io::stdout();
            out.write_all(&value)?;
            out.write_all(b"\n")?;
            Ok(())
        }
        None => Err(SkipError::NotFound),
    }
}

fn consistent(db: &Db, file: &str) -> Result<()> {
    db.check_consistency()?;
    println!("{}: consistent", file);
    Ok(())
}

// =============================================================================
// Batch Mode
// =============================================================================

fn batch(db: &Db) -> Result<()> {
    let stdin = io::stdin();
    let mut txn: Option<Txn> = None;

    for line in stdin.lock().lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let cmd = parts.next().unwrap_or("");
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");

        if let Err(e) = batch_command(db, &mut txn, cmd, key, value) {
            eprintln!("batch command {:?} failed: {}", cmd, e);
            if let Some(open) = txn.take() {
                let _ = open.abort();
            }
            return Err(e);
        }
    }

    // an unterminated transaction commits, matching an implicit COMMIT
    if let Some(open) = txn.take() {
        open.commit()?;
    }
    Ok(())
}

fn batch_command(
    db: &Db,
    txn: &mut Option<Txn>,
    cmd: &str,
    key: &str,
    value: &str,
) -> Result<()> {
    match cmd {
        "BEGIN" => {
            if txn.is_some() {
                return Err(SkipError::Internal("BEGIN inside a transaction".into()));
            }
            *txn = Some(db.begin(TxnMode::Exclusive)?);
        }
        "COMMIT" => match txn.take() {
            Some(open) => open.commit()?,
            None => return Err(SkipError::Internal("COMMIT without BEGIN".into())),
        },
        "ABORT" => match txn.take() {
            Some(open) => open.abort()?,
            None => return Err(SkipError::Internal("ABORT without BEGIN".into())),
        },
        "SET" => match txn.as_mut() {
            Some(open) => open.store(key.as_bytes(), Some(value.as_bytes()), Precondition::None)?,
            None => db.store(key.as_bytes(), Some(value.as_bytes()), Precondition::None)?,
        },
        "DELETE" => match txn.as_mut() {
            Some(open) => open.delete(key.as_bytes())?,
            None => db.delete(key.as_bytes())?,
        },
        "GET" => {
            let found = match txn.as_ref() {
                Some(open) => open.fetch(key.as_bytes())?,
                None => db.fetch(key.as_bytes())?,
            };
            match found {
                Some(value) => print_pair(key.as_bytes(), &value),
                None => return Err(SkipError::NotFound),
            }
        }
        "SHOW" => match txn.as_mut() {
            Some(open) => {
                open.foreach(
                    key.as_bytes(),
                    None,
                    |_, k, v| {
                        print_pair(k, v);
                        Ok(true)
                    },
                    false,
                )?;
            }
            None => show(db, key)?,
        },
        other => {
            return Err(SkipError::Internal(format!(
                "unknown batch command {:?}",
                other
            )))
        }
    }
    Ok(())
}

fn print_pair(key: &[u8], value: &[u8]) {
    println!("{}\t{}", key.escape_ascii(), value.escape_ascii());
}
