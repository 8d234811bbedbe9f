use log::LevelFilter;
use serde::Serialize;
use std::io::Write;

use crate::error::{Error, Result};

use gcfs::config::Config;
use gcfs::disk::Disk;
use gcfs::tree::EntryId;

/// True if `name` was given either before or after the subcommand.
pub fn flag(matches: &clap::ArgMatches, cmd: &clap::ArgMatches, name: &str) -> bool {
    matches.is_present(name) || cmd.is_present(name)
}

pub fn initialize_logging_from_args(matches: &clap::ArgMatches) {
    let debug = matches.is_present("debug")
        || matches
            .subcommand()
            .1
            .is_some_and(|cmd| cmd.is_present("debug"));
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

pub fn required<'a>(cmd: &'a clap::ArgMatches, name: &str) -> Result<&'a str> {
    cmd.value_of(name)
        .ok_or_else(|| Error::CliInputError(format!("{} is required.", name)))
}

pub fn load_config(matches: &clap::ArgMatches, cmd: &clap::ArgMatches) -> Result<Config> {
    match cmd.value_of("config").or_else(|| matches.value_of("config")) {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}

/// Open the image named by the subcommand's IMAGE argument.
pub fn open_disk(matches: &clap::ArgMatches, cmd: &clap::ArgMatches) -> Result<Disk> {
    let path = required(cmd, "IMAGE")?;
    let config = load_config(matches, cmd)?;
    let disk = Disk::open_with_config(path, config)?;
    if flag(matches, cmd, "progress") {
        disk.progress().set_listener(|snapshot| {
            let percent = match snapshot.bytes_total {
                0 => 100,
                total => snapshot.bytes_done * 100 / total,
            };
            let entry = snapshot.current_entry.as_deref().unwrap_or("");
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "\r\x1b[K{:>3}% {}", percent, entry);
            let _ = stderr.flush();
        });
    }
    Ok(disk)
}

pub fn resolve(disk: &Disk, path: &str) -> Result<EntryId> {
    Ok(disk.tree().resolve(path)?)
}

/// Write the disk's pending edits in place.
pub fn commit(disk: &mut Disk, show_progress: bool) -> Result<()> {
    let plan = disk.plan()?;
    if plan.noop {
        log::debug!("no changes to write");
        return Ok(());
    }
    let result = disk.commit(&plan);
    end_progress(show_progress);
    Ok(result?)
}

/// Terminate the progress line printed by the listener `open_disk` sets.
pub fn end_progress(show_progress: bool) {
    if show_progress {
        eprintln!();
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
