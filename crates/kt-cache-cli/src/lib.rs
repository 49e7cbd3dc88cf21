//! ktcache - command line tool for auto-tuning cache files
//!
//! Subcommands:
//! - `convert`: migrate a cache file to a target schema version
//! - `t4`: export a cache file to the T4 results format
//! - `delete-line`: remove one line by key
//! - `get-line`: print one line as JSON
//! - `merge`: merge two or more compatible cache files

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use kt_cache::{
    merge_files, read_cache_file, to_t4_validated, write_cache_file, Cache, CacheConfig,
    ConvertOptions, SchemaVersion,
};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Build the command tree
#[must_use]
pub fn command() -> Command {
    Command::new("ktcache")
        .version(kt_cache::VERSION)
        .about("Convert, export, inspect and merge auto-tuning cache files")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("schemas-dir")
                .long("schemas-dir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Load schemas from this directory instead of the built-in set"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Increase log verbosity (repeatable)"),
        )
        .subcommand(
            Command::new("convert")
                .about("Convert a cache file from one version to another")
                .arg(infile_arg().required(true))
                .arg(outfile_arg().help("Output file; defaults to overwriting the input"))
                .arg(
                    Arg::new("target")
                        .short('T')
                        .long("target")
                        .value_parser(value_parser!(SchemaVersion))
                        .help("Destination version; defaults to the latest"),
                )
                .arg(
                    Arg::new("allow-version-absence")
                        .long("allow-version-absence")
                        .action(ArgAction::SetTrue)
                        .help("Infer the version of files without schema_version"),
                ),
        )
        .subcommand(
            Command::new("t4")
                .about("Convert a cache file to the T4 auto-tuning format")
                .arg(infile_arg().required(true))
                .arg(outfile_arg().required(true).help("T4 output file")),
        )
        .subcommand(
            Command::new("delete-line")
                .about("Delete a line from a cache file")
                .arg(positional_infile())
                .arg(key_arg())
                .arg(
                    outfile_arg().help("Output file; defaults to overwriting the input"),
                ),
        )
        .subcommand(
            Command::new("get-line")
                .about("Print a line of a cache file as JSON")
                .arg(positional_infile())
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("merge")
                .about("Merge two or more cache files with equal metadata")
                .arg(
                    Arg::new("files")
                        .required(true)
                        .num_args(2..)
                        .value_parser(value_parser!(PathBuf))
                        .help("Cache files to merge, in order"),
                )
                .arg(
                    outfile_arg()
                        .required(true)
                        .help("Merged output file"),
                ),
        )
}

fn infile_arg() -> Arg {
    Arg::new("infile")
        .short('i')
        .long("in")
        .visible_alias("infile")
        .value_parser(value_parser!(PathBuf))
        .help("Input cache file")
}

fn outfile_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("out")
        .visible_alias("output")
        .value_parser(value_parser!(PathBuf))
}

fn positional_infile() -> Arg {
    Arg::new("infile")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Input cache file")
}

fn key_arg() -> Arg {
    Arg::new("key")
        .long("key")
        .required(true)
        .help("Composite key of the line")
}

/// Verbosity requested with `-v`
#[must_use]
pub fn verbosity(matches: &ArgMatches) -> u8 {
    matches.get_one::<u8>("verbose").copied().unwrap_or(0)
}

/// Configuration from the environment, overridden by `--schemas-dir`
#[must_use]
pub fn config_from(matches: &ArgMatches) -> CacheConfig {
    let config = CacheConfig::from_env();
    match matches.get_one::<PathBuf>("schemas-dir") {
        Some(dir) => config.with_schemas_dir(dir),
        None => config,
    }
}

/// Parse arguments and run, printing command output to `out`
///
/// # Errors
/// Argument errors and any failure of the selected command.
pub fn run<I, T>(args: I, out: &mut impl Write) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    run_matches(&matches, out)
}

/// Run an already parsed command line
///
/// # Errors
/// Any failure of the selected command.
pub fn run_matches(matches: &ArgMatches, out: &mut impl Write) -> Result<()> {
    let config = config_from(matches);
    match matches.subcommand() {
        Some(("convert", args)) => convert(&config, args),
        Some(("t4", args)) => t4(&config, args),
        Some(("delete-line", args)) => delete_line(&config, args),
        Some(("get-line", args)) => get_line(&config, args, out),
        Some(("merge", args)) => merge(&config, args),
        Some((other, _)) => bail!("unknown subcommand '{other}'"),
        None => bail!("no subcommand given"),
    }
}

fn path_arg<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a Path> {
    args.get_one::<PathBuf>(name)
        .map(PathBuf::as_path)
        .with_context(|| format!("missing argument '{name}'"))
}

fn key(args: &ArgMatches) -> Result<&str> {
    args.get_one::<String>("key")
        .map(String::as_str)
        .context("missing argument 'key'")
}

fn convert(config: &CacheConfig, args: &ArgMatches) -> Result<()> {
    let infile = path_arg(args, "infile")?;
    let output = args
        .get_one::<PathBuf>("output")
        .map_or(infile, PathBuf::as_path);

    let chain = config.migration_chain()?;
    let document = read_cache_file(infile)
        .with_context(|| format!("cannot read {}", infile.display()))?;
    let mut options =
        ConvertOptions::new().allow_unversioned(args.get_flag("allow-version-absence"));
    if let Some(target) = args.get_one::<SchemaVersion>("target") {
        options = options.with_target(target.clone());
    }

    let converted = chain
        .convert(document, &options)
        .with_context(|| format!("cannot convert {}", infile.display()))?;
    write_cache_file(&converted, output, config.write_mode)
        .with_context(|| format!("cannot write {}", output.display()))?;
    tracing::info!(input = %infile.display(), output = %output.display(), "converted cache file");
    Ok(())
}

fn t4(config: &CacheConfig, args: &ArgMatches) -> Result<()> {
    let infile = path_arg(args, "infile")?;
    let output = path_arg(args, "output")?;

    let chain = config.migration_chain()?;
    let document = read_cache_file(infile)
        .with_context(|| format!("cannot read {}", infile.display()))?;
    let latest = chain
        .convert_to_latest(document)
        .with_context(|| format!("cannot convert {}", infile.display()))?;
    let exported = to_t4_validated(&latest, chain.validator())
        .with_context(|| format!("cannot export {} to T4", infile.display()))?;

    let mut text = serde_json::to_string_pretty(&exported)?;
    text.push('\n');
    std::fs::write(output, text).with_context(|| format!("cannot write {}", output.display()))?;
    tracing::info!(input = %infile.display(), output = %output.display(), "exported T4 results");
    Ok(())
}

fn delete_line(config: &CacheConfig, args: &ArgMatches) -> Result<()> {
    let infile = path_arg(args, "infile")?;
    let output = args
        .get_one::<PathBuf>("output")
        .map_or(infile, PathBuf::as_path);
    let key = key(args)?;

    let chain = config.migration_chain()?;
    let mut cache = Cache::read(infile, &chain, &ConvertOptions::new())
        .with_context(|| format!("cannot read {}", infile.display()))?;
    cache.delete(key)?;
    cache
        .save_as(output, config.write_mode)
        .with_context(|| format!("cannot write {}", output.display()))?;
    tracing::info!(key, output = %output.display(), "deleted line");
    Ok(())
}

fn get_line(config: &CacheConfig, args: &ArgMatches, out: &mut impl Write) -> Result<()> {
    let infile = path_arg(args, "infile")?;
    let key = key(args)?;

    let chain = config.migration_chain()?;
    let cache = Cache::read(infile, &chain, &ConvertOptions::new())
        .with_context(|| format!("cannot read {}", infile.display()))?;
    let line = cache
        .get(key)
        .with_context(|| format!("no line with key '{key}' in {}", infile.display()))?;
    serde_json::to_writer_pretty(&mut *out, line.as_map())?;
    writeln!(out)?;
    Ok(())
}

fn merge(config: &CacheConfig, args: &ArgMatches) -> Result<()> {
    let files: Vec<&PathBuf> = args
        .get_many::<PathBuf>("files")
        .context("missing argument 'files'")?
        .collect();
    let output = path_arg(args, "output")?;

    let chain = config.migration_chain()?;
    let merged = merge_files(&files, &chain, config.duplicate_policy)?;
    write_cache_file(&merged, output, config.write_mode)
        .with_context(|| format!("cannot write {}", output.display()))?;
    Ok(())
}
