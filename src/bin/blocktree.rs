//! # blocktree CLI Entry Point
//!
//! Interactive shell over a file-backed index.
//!
//! ## Usage
//!
//! ```bash
//! # Create a fresh device and open a shell on it
//! blocktree --create ./index.blk
//!
//! # Reopen an existing device
//! blocktree ./index.blk
//! ```
//!
//! Keys and values typed at the prompt are NUL-padded to the index widths;
//! input longer than a slot is rejected.

use std::env;
use std::io::Write;
use std::path::PathBuf;

use eyre::{bail, Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use blocktree::config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_KEYSIZE, DEFAULT_NUM_BLOCKS, DEFAULT_VALUESIZE,
};
use blocktree::{BTreeIndex, BlockCache, DisplayMode, MmapCache, TreeError};

const PROMPT: &str = "blocktree> ";

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

struct Options {
    path: PathBuf,
    create: bool,
    block_size: usize,
    num_blocks: u32,
    keysize: usize,
    valuesize: usize,
}

fn run() -> Result<()> {
    let options = match parse_args()? {
        Some(options) => options,
        None => return Ok(()),
    };

    let index = if options.create || !options.path.exists() {
        let cache = MmapCache::create(&options.path, options.block_size, options.num_blocks)
            .wrap_err_with(|| format!("failed to create device at {:?}", options.path))?;
        BTreeIndex::create(cache, options.keysize, options.valuesize)
            .wrap_err("failed to format index")?
    } else {
        let cache = MmapCache::open(&options.path, options.block_size)
            .wrap_err_with(|| format!("failed to open device at {:?}", options.path))?;
        BTreeIndex::open(cache).wrap_err("failed to attach index")?
    };

    println!(
        "blocktree {} ({} blocks of {} bytes, {}-byte keys, {}-byte values)",
        env!("CARGO_PKG_VERSION"),
        index.cache().num_blocks(),
        index.cache().block_size(),
        index.keysize(),
        index.valuesize(),
    );
    println!("Type 'help' for commands.");

    repl(index)
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = env::args().collect();

    let mut options = Options {
        path: PathBuf::new(),
        create: false,
        block_size: DEFAULT_BLOCK_SIZE,
        num_blocks: DEFAULT_NUM_BLOCKS,
        keysize: DEFAULT_KEYSIZE,
        valuesize: DEFAULT_VALUESIZE,
    };
    let mut path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(None);
            }
            "--version" | "-v" => {
                println!("blocktree {}", env!("CARGO_PKG_VERSION"));
                return Ok(None);
            }
            "--create" | "-c" => options.create = true,
            "--block-size" => options.block_size = parse_flag_value(&args, &mut i)?,
            "--blocks" => options.num_blocks = parse_flag_value(&args, &mut i)?,
            "--key-size" => options.keysize = parse_flag_value(&args, &mut i)?,
            "--value-size" => options.valuesize = parse_flag_value(&args, &mut i)?,
            arg if arg.starts_with('-') => bail!("unknown option: {}", arg),
            p => {
                if path.is_some() {
                    bail!("multiple device paths specified");
                }
                path = Some(PathBuf::from(p));
            }
        }
        i += 1;
    }

    match path {
        Some(p) => {
            options.path = p;
            Ok(Some(options))
        }
        None => {
            print_usage();
            Ok(None)
        }
    }
}

fn parse_flag_value<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Result<T> {
    let flag = &args[*i];
    *i += 1;
    let value = args
        .get(*i)
        .ok_or_else(|| eyre::eyre!("{} requires a value", flag))?;
    value
        .parse()
        .map_err(|_| eyre::eyre!("invalid value '{}' for {}", value, flag))
}

fn repl(mut index: BTreeIndex<MmapCache>) -> Result<()> {
    let mut editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                match dispatch(&mut index, trimmed) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => println!("error: {:#}", err),
                }
            }
            Err(ReadlineError::Interrupted) => println!("^C"),
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("error reading input: {}", err);
                break;
            }
        }
    }

    index.detach().wrap_err("failed to detach index")?;
    println!("Bye");
    Ok(())
}

fn dispatch(index: &mut BTreeIndex<MmapCache>, line: &str) -> Result<bool> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match command {
        "insert" => {
            let (key, value) = two_args(&args, "insert <key> <value>")?;
            index.insert(&pad(key, index.keysize())?, &pad(value, index.valuesize())?)?;
            println!("ok");
        }
        "lookup" => {
            let key = one_arg(&args, "lookup <key>")?;
            match index.lookup(&pad(key, index.keysize())?) {
                Ok(value) => println!("{}", render(&value)),
                Err(err) if err.downcast_ref::<TreeError>() == Some(&TreeError::NotFound) => {
                    println!("not found")
                }
                Err(err) => return Err(err),
            }
        }
        "update" => {
            let (key, value) = two_args(&args, "update <key> <value>")?;
            index.update(&pad(key, index.keysize())?, &pad(value, index.valuesize())?)?;
            println!("ok");
        }
        "delete" => {
            let key = one_arg(&args, "delete <key>")?;
            index.delete(&pad(key, index.keysize())?)?;
        }
        "display" => {
            let mode = match args.first().copied() {
                None | Some("depth") => DisplayMode::Depth,
                Some("dot") => DisplayMode::DepthDot,
                Some("sorted") => DisplayMode::SortedKeyVal,
                Some(other) => bail!("unknown display mode '{}'", other),
            };
            let mut out = std::io::stdout().lock();
            index.display(&mut out, mode)?;
            out.flush()?;
        }
        "check" => {
            index.sanity_check()?;
            println!("ok");
        }
        "help" => print_help(),
        "quit" | "exit" => return Ok(false),
        other => bail!("unknown command '{}', try 'help'", other),
    }
    Ok(true)
}

fn one_arg<'a>(args: &[&'a str], usage: &str) -> Result<&'a str> {
    match args {
        &[a] => Ok(a),
        _ => bail!("usage: {}", usage),
    }
}

fn two_args<'a>(args: &[&'a str], usage: &str) -> Result<(&'a str, &'a str)> {
    match args {
        &[a, b] => Ok((a, b)),
        _ => bail!("usage: {}", usage),
    }
}

fn pad(field: &str, width: usize) -> Result<Vec<u8>> {
    let bytes = field.as_bytes();
    if bytes.len() > width {
        bail!("'{}' is {} bytes, the slot holds {}", field, bytes.len(), width);
    }
    let mut padded = vec![0u8; width];
    padded[..bytes.len()].copy_from_slice(bytes);
    Ok(padded)
}

fn render(value: &[u8]) -> String {
    let end = value
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |last| last + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

fn print_help() {
    println!("Commands:");
    println!("  insert <key> <value>     Insert a new key");
    println!("  lookup <key>             Fetch the value stored for a key");
    println!("  update <key> <value>     Overwrite an existing key's value");
    println!("  delete <key>             Not implemented");
    println!("  display [depth|dot|sorted]  Render the tree");
    println!("  check                    Audit the on-disk structure");
    println!("  quit                     Detach and exit");
}

fn print_usage() {
    println!("blocktree - disk-backed B+-tree index shell");
    println!();
    println!("USAGE:");
    println!("    blocktree [OPTIONS] <DEVICE_PATH>");
    println!();
    println!("OPTIONS:");
    println!("    -c, --create           Format a fresh device (default if path is new)");
    println!("        --block-size <N>   Block size in bytes (default {})", DEFAULT_BLOCK_SIZE);
    println!("        --blocks <N>       Device size in blocks (default {})", DEFAULT_NUM_BLOCKS);
    println!("        --key-size <N>     Key width in bytes (default {})", DEFAULT_KEYSIZE);
    println!("        --value-size <N>   Value width in bytes (default {})", DEFAULT_VALUESIZE);
    println!("    -h, --help             Print help information");
    println!("    -v, --version          Print version information");
}
