use depverify::checksum::{digest_reader, ChecksumKind};
use depverify::keyring::{describe_key, Keyring};
use depverify::policy::ArtifactRef;
use depverify::verifier::{ArtifactInput, CancellationToken, MetadataStore, Mode, VerifierConfig};
use depverify::DVError;

use depverify::reexports::log;

use clap::{crate_description, crate_name, crate_version, Arg, ArgAction, ArgMatches, Command};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extensions of files that accompany artifacts rather than being artifacts.
const SIDECAR_EXTENSIONS: &[&str] = &["asc", "sig", "md5", "sha1", "sha256", "sha512"];

/// Helper function to open a file with better error messages
fn open_file(path: impl AsRef<Path>) -> Result<File, DVError> {
    let path = path.as_ref();
    File::open(path).map_err(|e| {
        DVError::InternalError(format!("Failed to open file '{}': {}", path.display(), e))
    })
}

fn read_file(path: impl AsRef<Path>) -> Result<Vec<u8>, DVError> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        DVError::InternalError(format!("Failed to read file '{}': {}", path.display(), e))
    })
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), DVError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        DVError::InternalError(format!("Failed to read directory '{}': {}", dir.display(), e))
    })?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn is_sidecar(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SIDECAR_EXTENSIONS.contains(&e))
}

fn detached_signature(path: &Path) -> Result<Option<Vec<u8>>, DVError> {
    for extension in ["asc", "sig"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(extension);
        let candidate = PathBuf::from(candidate);
        if candidate.is_file() {
            return read_file(&candidate).map(Some);
        }
    }
    Ok(None)
}

/// Artifacts of a Maven-layout repository, each paired with its
/// `.asc` or `.sig` detached signature when one exists.
fn scan_repository(root: &Path) -> Result<Vec<ArtifactInput>, DVError> {
    let mut files = vec![];
    collect_files(root, &mut files)?;
    files.sort();

    let mut inputs = vec![];
    for path in files.iter().filter(|p| !is_sidecar(p)) {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let Some(artifact) = ArtifactRef::from_repository_path(relative) else {
            log::debug!("Skipping {}, not in repository layout", path.display());
            continue;
        };
        let mut input = ArtifactInput::new(artifact, read_file(path)?);
        input.signature = detached_signature(path)?;
        inputs.push(input);
    }
    Ok(inputs)
}

fn run_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("metadata_dir")
                .value_name("dir")
                .long("metadata-dir")
                .short('m')
                .default_value(".")
                .help("Directory holding verification-metadata.xml and exported keyrings"),
        )
        .arg(
            Arg::new("repository")
                .value_name("dir")
                .long("repository")
                .short('r')
                .required(true)
                .help("Repository directory in group/name/version/file layout"),
        )
        .arg(
            Arg::new("keyring")
                .value_name("keyring_file")
                .long("keyring")
                .short('k')
                .action(ArgAction::Append)
                .help("Additional keyring to look up signing keys in"),
        )
        .arg(
            Arg::new("offline")
                .long("offline")
                .action(ArgAction::SetTrue)
                .help("Never contact key servers"),
        )
        .arg(
            Arg::new("workers")
                .value_name("count")
                .long("workers")
                .short('w')
                .help("Number of worker threads (default: 4)"),
        )
        .arg(
            Arg::new("timeout")
                .value_name("seconds")
                .long("timeout")
                .help("Key server timeout in seconds (default: 30)"),
        )
        .arg(
            Arg::new("export_keys")
                .long("export-keys")
                .action(ArgAction::SetTrue)
                .help("Export the keys used for verification next to the metadata"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
}

fn parse_number<T: std::str::FromStr>(
    matches: &ArgMatches,
    name: &str,
) -> Result<Option<T>, DVError> {
    matches
        .get_one::<String>(name)
        .map(|s| s.parse::<T>().map_err(|_| DVError::InvalidArgument))
        .transpose()
}

fn run_config(matches: &ArgMatches, mut config: VerifierConfig) -> Result<VerifierConfig, DVError> {
    config = config
        .with_offline(matches.get_flag("offline"))
        .with_export_keys(matches.get_flag("export_keys"));
    if let Some(workers) = parse_number::<usize>(matches, "workers")? {
        config = config.with_workers(workers);
    }
    if let Some(timeout) = parse_number::<u64>(matches, "timeout")? {
        config = config.with_key_server_timeout(Duration::from_secs(timeout));
    }
    if let Some(keyrings) = matches.get_many::<String>("keyring") {
        for keyring in keyrings {
            config = config.with_keyring(keyring);
        }
    }
    Ok(config)
}

/// The first interrupt cancels the run, so nothing is written; a second
/// one exits immediately.
fn cancel_on_signal(token: &CancellationToken) -> Result<(), DVError> {
    for &signal in TERM_SIGNALS {
        flag::register_conditional_shutdown(signal, 1, token.flag())?;
        flag::register(signal, token.flag())?;
    }
    Ok(())
}

fn run(matches: &ArgMatches, config: VerifierConfig, verbose: bool) -> Result<(), DVError> {
    let repository = matches
        .get_one::<String>("repository")
        .ok_or(DVError::UsageError("Missing repository directory"))?;
    let metadata_dir = matches
        .get_one::<String>("metadata_dir")
        .ok_or(DVError::UsageError("Missing metadata directory"))?;

    let inputs = scan_repository(Path::new(repository))?;
    if inputs.is_empty() {
        return Err(DVError::UsageError("No artifacts found in the repository"));
    }
    log::debug!("Found {} artifact(s) in {}", inputs.len(), repository);

    let store = MetadataStore::new(metadata_dir);
    let cancel = CancellationToken::new();
    cancel_on_signal(&cancel)?;
    let summary = store.execute(&inputs, &config, &cancel)?;
    if matches.get_flag("json") {
        println!("{}", summary.report.to_json()?);
    } else {
        if verbose {
            for outcome in &summary.report.outcomes {
                println!("{}: {}", outcome.artifact, outcome.verdict);
            }
        }
        print!("{}", summary.report.render());
        for path in &summary.written {
            println!("Wrote [{}]", path.display());
        }
    }
    summary.report.check()?;
    if config.mode == Mode::Verify {
        println!("Verification succeeded.");
    }
    Ok(())
}

fn start() -> Result<(), DVError> {
    let matches = Command::new(crate_name!())
        .version(crate_version!())
        .about(crate_description!())
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Verbose output"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Prints debugging information"),
        )
        .subcommand(run_args(
            Command::new("verify").about("Verify artifacts against the verification metadata"),
        ))
        .subcommand(
            run_args(
                Command::new("generate")
                    .about("Verify artifacts and record the results in the verification metadata"),
            )
            .arg(
                Arg::new("checksums")
                    .value_name("algorithms")
                    .long("checksums")
                    .short('c')
                    .default_value("sha256")
                    .help("Comma-separated checksum algorithms to record (md5, sha1, sha256, sha512)"),
            )
            .arg(
                Arg::new("pgp")
                    .long("pgp")
                    .action(ArgAction::SetTrue)
                    .help("Enable signature verification in the generated metadata"),
            ),
        )
        .subcommand(
            Command::new("show-keyring")
                .about("Print the keys of a keyring file")
                .arg(
                    Arg::new("in")
                        .value_name("input_file")
                        .long("input-file")
                        .short('i')
                        .required(true)
                        .help("Keyring file (binary or armored)"),
                ),
        )
        .subcommand(
            Command::new("checksum")
                .about("Print the checksum of a file")
                .arg(
                    Arg::new("in")
                        .value_name("input_file")
                        .long("input-file")
                        .short('i')
                        .required(true)
                        .help("Input file"),
                )
                .arg(
                    Arg::new("algorithm")
                        .value_name("algorithm")
                        .long("algorithm")
                        .short('a')
                        .default_value("sha256")
                        .help("Checksum algorithm (md5, sha1, sha256, sha512)"),
                ),
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let debug = matches.get_flag("debug");

    env_logger::builder()
        .format_timestamp(None)
        .format_level(false)
        .format_module_path(false)
        .format_target(false)
        .filter_level(if debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    if let Some(matches) = matches.subcommand_matches("verify") {
        let config = run_config(matches, VerifierConfig::verify())?;
        run(matches, config, verbose)?;
    } else if let Some(matches) = matches.subcommand_matches("generate") {
        let checksums = matches
            .get_one::<String>("checksums")
            .ok_or(DVError::UsageError("Missing checksum algorithms"))?
            .split(',')
            .map(|s| s.trim().parse::<ChecksumKind>())
            .collect::<Result<Vec<_>, _>>()?;
        let config = run_config(matches, VerifierConfig::generate())?
            .with_generated_checksums(checksums)
            .with_signature_verification(matches.get_flag("pgp"));
        run(matches, config, verbose)?;
    } else if let Some(matches) = matches.subcommand_matches("show-keyring") {
        let input_file = matches.get_one::<String>("in").map(|s| s.as_str());
        let input_file = input_file.ok_or(DVError::UsageError("Missing input file"))?;
        let keyring = Keyring::from_file(input_file)?;
        println!("{} key(s) in [{}]", keyring.len(), input_file);
        for key in keyring.iter() {
            println!();
            print!("{}", describe_key(key));
            if verbose {
                println!("id     {}", key.key_id());
            }
        }
    } else if let Some(matches) = matches.subcommand_matches("checksum") {
        let input_file = matches.get_one::<String>("in").map(|s| s.as_str());
        let input_file = input_file.ok_or(DVError::UsageError("Missing input file"))?;
        let kind: ChecksumKind = matches
            .get_one::<String>("algorithm")
            .ok_or(DVError::UsageError("Missing algorithm"))?
            .parse()?;
        let mut reader = BufReader::new(open_file(input_file)?);
        println!("{}  {}", digest_reader(&mut reader, kind)?, input_file);
    } else {
        return Err(DVError::UsageError("No subcommand specified"));
    }
    Ok(())
}

fn main() -> Result<(), DVError> {
    let res = start();
    match res {
        Ok(_) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
    Ok(())
}
