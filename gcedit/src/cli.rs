use clap;

pub fn parse_flags<'a>() -> clap::ArgMatches<'a> {
    app().get_matches()
}

pub fn app<'a, 'b>() -> clap::App<'a, 'b> {
    clap::App::new("gcedit")
        .version(clap::crate_version!())
        .author(clap::crate_authors!())
        .about("Inspect and edit the filesystem of GameCube disk images")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(clap::Arg::from_usage("-d --debug 'Enable debug output'").global(true))
        .arg(clap::Arg::from_usage("-p --progress 'Show commit progress on stderr'").global(true))
        .arg(clap::Arg::from_usage("--config [config] 'JSON file with engine settings'").global(true))
        .subcommand(
            clap::SubCommand::with_name("info")
                .about("Show the disk header, file counts and banners")
                .args_from_usage(
                    "<IMAGE>  'Disk image'
                     --json   'Print JSON'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("ls")
                .about("List a directory on the disk")
                .args_from_usage(
                    "<IMAGE>          'Disk image'
                     [PATH]           'Directory or file to list (default /)'
                     -r --recursive   'List everything below PATH'
                     --json           'Print JSON'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("search")
                .about("Find entries by name")
                .args_from_usage(
                    "<IMAGE>               'Disk image'
                     <PATTERN>             'Text or regular expression to look for'
                     -c --case-sensitive   'Match case'
                     -w --whole-name       'Match whole names only'
                     -e --regex            'PATTERN is a regular expression'
                     --files-only          'Only report files'
                     --dirs-only           'Only report directories'
                     --json                'Print JSON'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("mkdir")
                .about("Create a directory")
                .args_from_usage(
                    "<IMAGE>        'Disk image'
                     <PATH>         'Directory to create'
                     -P --parents   'Create missing parent directories'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("mv")
                .about("Move an entry into another directory")
                .args_from_usage(
                    "<IMAGE>    'Disk image'
                     <SOURCE>   'Entry to move'
                     <DEST>     'Directory to move it into'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("rename")
                .about("Rename an entry")
                .args_from_usage(
                    "<IMAGE>   'Disk image'
                     <PATH>    'Entry to rename'
                     <NAME>    'New name'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("rm")
                .about("Delete an entry and everything below it")
                .args_from_usage(
                    "<IMAGE>   'Disk image'
                     <PATH>    'Entry to delete'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("import")
                .about("Copy a host file or directory onto the disk")
                .args_from_usage(
                    "<IMAGE>       'Disk image'
                     <HOST_PATH>   'File or directory on the host'
                     [DEST]        'Directory on the disk (default /)'
                     --replace     'Replace an existing file of the same name'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("dump")
                .about("Extract an entry or system file to the host")
                .args_from_usage(
                    "<IMAGE>          'Disk image'
                     <PATH>           'Entry on the disk, or system file name with --system'
                     <DEST>           'Host path to create'
                     -o --overwrite   'Replace existing host files'
                     --decode         'Decompress Yaz0 files'
                     -s --system      'PATH names boot.bin, bi2.bin, appldr.bin or main.dol'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("compact")
                .about("Rewrite the image without free space")
                .args_from_usage(
                    "<IMAGE>                'Disk image'
                     -o --output [output]   'Write the compacted image here instead'",
                ),
        )
        .subcommand(
            clap::SubCommand::with_name("pad")
                .about("Extend the image to the size of a full disc")
                .args_from_usage("<IMAGE> 'Disk image'"),
        )
}
