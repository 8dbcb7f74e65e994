use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;

use clap::{ArgAction, Args, Parser, Subcommand};
use icepack::bundle::read_framing;
use icepack::crypto::{DEFAULT_ITERATIONS, DEFAULT_SALT};
use icepack::{
    list, pack, unpack, CipherSettings, CompressKind, EncryptKind, PackOptions, ProgressState,
    UnpackOptions,
};

#[derive(Parser)]
#[command(name = "ipack", version, about = "Bundle your files securely")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct KeyArgs {
    /// Password for encrypting / decrypting
    #[arg(short, long, env = "IPACK_KEY", default_value = "", hide_env_values = true)]
    key: String,
    /// Key-derivation salt
    #[arg(long, default_value = DEFAULT_SALT)]
    salt: String,
    /// Key-derivation iterations (0 uses the key bytes verbatim)
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,
}

impl KeyArgs {
    fn cipher(&self) -> CipherSettings {
        CipherSettings {
            password:   self.key.clone(),
            salt:       self.salt.clone(),
            iterations: self.iterations,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a pack from SOURCE (directory or file) to TARGET
    Pack {
        source: PathBuf,
        target: PathBuf,
        /// Compression: none, gzip, zstd
        #[arg(short, long, default_value = "none")]
        compress: String,
        /// Encryption: none, aes
        #[arg(short, long, default_value = "none")]
        encrypt: String,
        /// Only pack paths matching this regular expression
        #[arg(long)]
        include: Option<String>,
        /// Skip paths matching this regular expression
        #[arg(long)]
        exclude: Option<String>,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Extract PACK ("-" for stdin) into DIR
    Unpack {
        pack: PathBuf,
        dir: PathBuf,
        #[arg(long)]
        include: Option<String>,
        #[arg(long)]
        exclude: Option<String>,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List files in PACK ("-" for stdin)
    List {
        pack: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// Show header and footer fields of PACK
    Info {
        pack: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {

        // ── Pack ─────────────────────────────────────────────────────────────
        Commands::Pack { source, target, compress, encrypt, include, exclude, key } => {
            let compression = CompressKind::from_name(&compress)
                .ok_or_else(|| format!("unknown compression '{compress}'"))?;
            let encryption = EncryptKind::from_name(&encrypt)
                .ok_or_else(|| format!("unknown encryption '{encrypt}'"))?;
            if encryption != EncryptKind::None && key.key.is_empty() {
                return Err("Please set the encryption key with --key".into());
            }
            if compression != CompressKind::None {
                println!("Compression: {}", compression.name());
            }
            if encryption != EncryptKind::None {
                println!("Encryption:  {}", encryption.name());
            }

            let opts = PackOptions { compression, encryption, cipher: key.cipher(), include, exclude };
            let start = Instant::now();
            let res = pack::spawn(source, target, opts).wait_with(|s| show_progress("Packing files", s))?;
            println!();
            println!("Pack size: {} B", res.byte_size);
            println!("File count: {}, skipped duplicate: {} ({} B)", res.file_count, res.dup_count, res.dup_size);
            println!("Elapsed time: {:?}", start.elapsed());
        }

        // ── Unpack ───────────────────────────────────────────────────────────
        Commands::Unpack { pack, dir, include, exclude, key } => {
            let opts = UnpackOptions { cipher: key.cipher(), include, exclude };
            let start = Instant::now();
            let res = unpack::spawn(pack, dir, opts).wait_with(|s| show_progress("Unpacking files", s))?;
            println!();
            println!("Total size: {} B", res.byte_size);
            println!("File count: {}", res.file_count);
            println!("Elapsed time: {:?}", start.elapsed());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { pack, key } => {
            let fat = list::spawn(pack, key.cipher()).wait()?;
            println!("Files in package:");
            for item in &fat.items {
                println!("  {} ({} B)", item.path, item.orig_size);
            }
            println!();
            println!("File count: {}", fat.count);
            println!("Total size: {} B", fat.size);
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { pack } => {
            let framing = read_framing(&mut File::open(&pack)?)?;
            let h = &framing.header;
            println!("── Package ──────────────────────────────────────────────");
            println!("  Path           {}", pack.display());
            println!("  Version        {}", h.version);
            println!("  Encryption     {}", h.encrypt.name());
            println!("  Compression    {}", h.compress.name());
            println!("  Created        {}", chrono::DateTime::<chrono::Utc>::from_timestamp(
                h.created.div_euclid(1_000_000_000),
                h.created.rem_euclid(1_000_000_000) as u32,
            ).map(|t| t.to_rfc3339()).unwrap_or_else(|| h.created.to_string()));
            println!("  Container at   {} B", framing.start);
            println!("  FAT size       {} B", h.fat_size);
            println!("  Pack size      {} B", framing.footer.pack_size);
            println!("  FAT checksum   {:08x}", framing.footer.checksum);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn show_progress(label: &str, state: ProgressState) {
    match state.error {
        Some(err) => eprintln!("\nERROR: {err} (file: {})", state.current_file),
        None if state.total > 0 => {
            let pct = 100.0 * state.index as f64 / state.total as f64;
            eprint!("\r{label}: {pct:6.2}%");
        }
        None => {}
    }
}
