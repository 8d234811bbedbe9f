extern crate gcedit;

use std::path::Path;

use gcedit::error::{Error, Result};
use gcedit::utils::{self, flag, required};
use gcfs::host::ExtractOptions;
use gcfs::search::SearchOptions;

fn run(matches: &clap::ArgMatches) -> Result<()> {
    let (name, cmd) = match matches.subcommand() {
        (name, Some(cmd)) => (name, cmd),
        _ => {
            return Err(Error::CliInputError(
                "No command specified. Use --help for available commands.".to_string(),
            ))
        }
    };
    let progress = flag(matches, cmd, "progress");
    let mut disk = utils::open_disk(matches, cmd)?;

    match name {
        "info" => gcedit::info::show(&disk, cmd.is_present("json"))?,
        "ls" => gcedit::tree::list(
            &disk,
            cmd.value_of("PATH").unwrap_or("/"),
            cmd.is_present("recursive"),
            cmd.is_present("json"),
        )?,
        "search" => {
            let options = SearchOptions {
                case_sensitive: cmd.is_present("case-sensitive"),
                whole_name: cmd.is_present("whole-name"),
                regex: cmd.is_present("regex"),
                files: !cmd.is_present("dirs-only"),
                directories: !cmd.is_present("files-only"),
            };
            gcedit::tree::search(&disk, required(cmd, "PATTERN")?, &options, cmd.is_present("json"))?
        }
        "mkdir" => {
            gcedit::edit::mkdir(&mut disk, required(cmd, "PATH")?, cmd.is_present("parents"))?;
            utils::commit(&mut disk, progress)?
        }
        "mv" => {
            gcedit::edit::move_entry(&mut disk, required(cmd, "SOURCE")?, required(cmd, "DEST")?)?;
            utils::commit(&mut disk, progress)?
        }
        "rename" => {
            gcedit::edit::rename(&mut disk, required(cmd, "PATH")?, required(cmd, "NAME")?)?;
            utils::commit(&mut disk, progress)?
        }
        "rm" => {
            gcedit::edit::remove(&mut disk, required(cmd, "PATH")?)?;
            utils::commit(&mut disk, progress)?
        }
        "import" => {
            gcedit::edit::import(
                &mut disk,
                Path::new(required(cmd, "HOST_PATH")?),
                cmd.value_of("DEST").unwrap_or("/"),
                cmd.is_present("replace"),
            )?;
            utils::commit(&mut disk, progress)?
        }
        "dump" => {
            let path = required(cmd, "PATH")?;
            let dest = Path::new(required(cmd, "DEST")?);
            if cmd.is_present("system") {
                gcedit::dump::dump_system_file(&disk, path, dest, cmd.is_present("overwrite"))?
            } else {
                let options = ExtractOptions {
                    overwrite: cmd.is_present("overwrite"),
                    decode: cmd.is_present("decode"),
                };
                gcedit::dump::dump(&disk, path, dest, &options)?
            }
        }
        "compact" => gcedit::edit::compact(&mut disk, cmd.value_of("output"), progress)?,
        "pad" => gcedit::edit::pad(&mut disk, progress)?,
        other => {
            return Err(Error::CliInputError(format!(
                "Unknown command '{}'. Use --help for available commands.",
                other
            )))
        }
    }
    Ok(())
}

fn main() {
    let matches = gcedit::cli::parse_flags();

    utils::initialize_logging_from_args(&matches);

    if let Err(err) = run(&matches) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
