use clap::{Parser, Subcommand};
use satchel::entry::unix_seconds;
use satchel::plan::{entry_name, output_path, regional_name};
use satchel::{
    plan_for, AtcError, CodecId, DetectedMode, FileEntry, FormatVersion, Locker, LockerOptions, Plan, Unlocker,
};
use std::error::Error;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info};
use zeroize::Zeroizing;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "satchel", version, about = "Password-protected .atc containers")]
struct Cli {
    /// Log session milestones to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Password; prompted for when absent
    #[arg(long, global = true, env = "SATCHEL_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lock files and directories into one container
    Lock {
        /// Output container (default: `<first input>.atc`)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Wrong passwords tolerated (1-10)
        #[arg(long, default_value = "3")]
        try_limit: u8,
        /// Destroy the container once the attempt budget is spent
        #[arg(long)]
        self_destruct: bool,
        /// Write an AttacheCase 2.x compatible (v105) container
        #[arg(long)]
        legacy: bool,
        /// Chunk codec: zstd (default), none
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Compression level (zstd 1-22; zlib 0-9 with --legacy)
        #[arg(short, long)]
        level: Option<i32>,
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Extract every entry of a container
    Unlock {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// List container entries
    List {
        input: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the plain header without a password
    Probe {
        input: PathBuf,
    },
    /// Lock a plain file or directory, or unlock a container, in place
    Drop {
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(if cli.verbose { "debug" } else { "warn" });

    match run(cli) {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<AtcError>() {
            Some(atc) => {
                eprintln!("error: {atc}");
                std::process::exit(exit_code(atc));
            }
            None => Err(e),
        },
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let password = cli.password;
    match cli.command {

        // ── Lock ─────────────────────────────────────────────────────────────
        Commands::Lock { output, try_limit, self_destruct, legacy, codec, level, inputs } => {
            let output = match output {
                Some(o) => o,
                None => default_output(&inputs[0])?,
            };
            let options = LockerOptions {
                passwd_try_limit: try_limit,
                self_destruction: self_destruct,
                format:           if legacy { FormatVersion::LegacyRijndaelGuarded } else { FormatVersion::Current },
                codec:            parse_codec(&codec)?,
                level,
                ..LockerOptions::default()
            };
            let password = read_password(password, true)?;
            lock(&inputs, &output, password.as_bytes(), options)?;
        }

        // ── Unlock ───────────────────────────────────────────────────────────
        Commands::Unlock { input, output_dir } => {
            let password = read_password(password, false)?;
            unlock(&input, &output_dir, password.as_bytes())?;
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let password = read_password(password, false)?;
            let mut file = OpenOptions::new().read(true).write(true).open(&input)?;
            let info = Unlocker::probe(&mut file)?;
            let unlocker = Unlocker::open(&mut file, password.as_bytes())?;

            if json {
                let doc = serde_json::json!({
                    "container": info,
                    "created":   unlocker.created(),
                    "entries":   unlocker.entries(),
                });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                println!("Container: {}", input.display());
                println!("{:<40} {:>12} {:>20}", "Name", "Size", "Modified");
                for entry in unlocker.entries() {
                    let size = if entry.is_directory() { "<dir>".to_string() } else { entry.size.to_string() };
                    println!("{:<40} {:>12} {:>20}", entry.display_name(), size, format_time(entry.change_time));
                }
            }
        }

        // ── Probe ────────────────────────────────────────────────────────────
        Commands::Probe { input } => {
            let mut file = File::open(&input)?;
            let info = Unlocker::probe(&mut file)?;
            println!("── .atc Container ───────────────────────────────────────");
            println!("  Path             {}", input.display());
            println!("  Format           {}", info.format.name());
            println!("  Data version     {}", info.data_version);
            println!("  Sub version      {}", info.sub_version);
            println!("  Offset           {} B", info.offset);
            println!("  Self-extracting  {}", info.self_extracting);
            println!("  Attempts left    {}", info.passwd_try_limit);
            println!("  Self-destruct    {}", info.self_destruction);
        }

        // ── Drop ─────────────────────────────────────────────────────────────
        Commands::Drop { path } => {
            let mode = detect_mode(&path)?;
            debug!(path = %path.display(), ?mode, "drop detected");
            match plan_for(&path, mode) {
                Plan::Lock { source, output } => {
                    let password = read_password(password, true)?;
                    lock(&[source], &output, password.as_bytes(), LockerOptions::default())?;
                }
                Plan::Unlock { container, output_dir } => {
                    let password = read_password(password, false)?;
                    unlock(&container, &output_dir, password.as_bytes())?;
                }
                Plan::Reject { reason } => return Err(reason.into()),
            }
        }
    }

    Ok(())
}

// ── Lock / unlock ────────────────────────────────────────────────────────────

fn lock(inputs: &[PathBuf], output: &Path, password: &[u8], options: LockerOptions) -> CliResult<()> {
    let mut sources = Vec::new();
    for input in inputs {
        collect(input, &mut sources)?;
    }

    let mut locker = Locker::open(BufWriter::new(File::create(output)?), password, options)?;
    for (_, entry) in &sources {
        locker.add_file_entry(entry.clone())?;
    }
    locker.write_encrypted_header()?;
    for (path, entry) in &sources {
        if entry.is_directory() {
            continue;
        }
        locker.write_file_data(BufReader::new(File::open(path)?), entry.data_len())?;
        println!("  locked  {}", path.display());
    }
    locker.close()?;
    println!("Created: {}", output.display());
    Ok(())
}

fn unlock(input: &Path, output_dir: &Path, password: &[u8]) -> CliResult<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(input)?;
    let mut unlocker = Unlocker::open(&mut file, password)?;
    let entries = unlocker.entries().to_vec();

    for (index, entry) in entries.iter().enumerate() {
        let target = output_path(output_dir, &entry.display_name())?;
        if entry.is_directory() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = File::create(&target)?;
        unlocker.extract_entry(index, BufWriter::new(&out))?;
        if entry.change_time > 0 {
            out.set_modified(UNIX_EPOCH + Duration::from_secs(entry.change_time as u64))?;
        }
        println!("  unlocked  {}", target.display());
    }
    println!("Unlocked to: {}", output_dir.display());
    Ok(())
}

/// Flatten `root` into entries named relative to its parent.  Directories
/// precede their contents; symlinks are skipped.
fn collect(root: &Path, out: &mut Vec<(PathBuf, FileEntry)>) -> CliResult<()> {
    let base = root.parent().unwrap_or(Path::new(""));
    walk(root, base, out)
}

fn walk(path: &Path, base: &Path, out: &mut Vec<(PathBuf, FileEntry)>) -> CliResult<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        info!(path = %path.display(), "skipping symlink");
        return Ok(());
    }
    let relative = path.strip_prefix(base).unwrap_or(path);
    let is_dir = meta.is_dir();
    let name = entry_name(relative, is_dir);
    let created = meta.created().map(unix_seconds).unwrap_or(0);
    let modified = meta.modified().map(unix_seconds).unwrap_or(0);

    let mut entry = if is_dir {
        FileEntry::directory(&name)
    } else {
        FileEntry::file(&name, meta.len())?
    };
    entry.name_sjis = regional_name(&name);
    out.push((path.to_path_buf(), entry.with_times(created, modified)));

    if is_dir {
        let mut children = fs::read_dir(path)?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort();
        for child in children {
            walk(&child, base, out)?;
        }
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_password(given: Option<String>, confirm: bool) -> CliResult<Zeroizing<String>> {
    if let Some(pw) = given {
        return Ok(Zeroizing::new(pw));
    }
    let password = Zeroizing::new(rpassword::prompt_password("Password: ")?);
    if confirm {
        let again = Zeroizing::new(rpassword::prompt_password("Confirm password: ")?);
        if *password != *again {
            return Err("Passwords do not match".into());
        }
    }
    Ok(password)
}

fn detect_mode(path: &Path) -> CliResult<DetectedMode> {
    if path.is_dir() {
        return Ok(DetectedMode::Directory);
    }
    let mut file = File::open(path)?;
    match Unlocker::probe(&mut file) {
        Ok(_)                          => Ok(DetectedMode::Container),
        Err(AtcError::NotAContainer)   => Ok(DetectedMode::PlainFile),
        Err(AtcError::SelfDestructed)  => Ok(DetectedMode::Destroyed),
        Err(e)                         => Err(e.into()),
    }
}

fn default_output(input: &Path) -> CliResult<PathBuf> {
    match plan_for(input, DetectedMode::PlainFile) {
        Plan::Lock { output, .. } => Ok(output),
        Plan::Unlock { .. }       => Err("cannot derive an output name".into()),
        Plan::Reject { reason }   => Err(reason.into()),
    }
}

fn parse_codec(s: &str) -> CliResult<CodecId> {
    CodecId::from_name(s).ok_or_else(|| format!("Unknown codec '{s}' (expected zstd or none)").into())
}

fn format_time(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}

fn exit_code(e: &AtcError) -> i32 {
    match e {
        AtcError::WrongKey { .. }         => 2,
        AtcError::SelfDestructed          => 3,
        AtcError::NotAContainer           => 4,
        AtcError::UnsupportedVersion(_)   => 5,
        _                                 => 1,
    }
}
