//! Purpose: `firehose-sipper` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON lines on stdout.
//! Invariants: Every decoded value is written as one compact JSON line on stdout.
//! Invariants: Errors are emitted as one JSON line on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
#![allow(clippy::result_large_err)]
use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use firehose_sipper::api::{
    DecodeOptions, DirStore, Error, ErrorKind, GzipMode, HttpStore, ObjectBody, ObjectStore,
    Sip, SipOptions, SipTarget, infer_meta, list_keys, open_object, select_encoding,
    to_exit_code,
};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "firehose-sipper",
    version,
    about = "Stream concatenated JSON records out of object-store exports",
    long_about = None,
    after_help = r#"EXAMPLES
  $ firehose-sipper sip --endpoint http://localhost:9000 --bucket exports --prefix 2024/01/
  $ firehose-sipper sip --dir ./mirror --bucket exports --key 2024/01/part-0001.gz
  $ firehose-sipper list --dir ./mirror --bucket exports --prefix 2024/
  $ firehose-sipper decode part-0001.json.gz

Each decoded record is printed as one JSON line. Set RUST_LOG=debug to trace
listing pages and object fetches on stderr."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream every record from one object or from every object under a prefix.
    Sip {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, help = "Bucket to read from")]
        bucket: String,
        #[arg(long, help = "Read exactly this object")]
        key: Option<String>,
        #[arg(long, help = "Read every object whose key starts with this prefix")]
        prefix: Option<String>,
        #[command(flatten)]
        decode: DecodeArgs,
    },
    /// List object keys under a prefix, one per line.
    List {
        #[command(flatten)]
        store: StoreArgs,
        #[arg(long, help = "Bucket to list")]
        bucket: String,
        #[arg(long, default_value = "", help = "Key prefix (empty lists the whole bucket)")]
        prefix: String,
    },
    /// Decode a local file (or stdin) of concatenated JSON values.
    Decode {
        #[arg(value_hint = ValueHint::FilePath, help = "Input file, or - for stdin")]
        input: Option<PathBuf>,
        #[command(flatten)]
        decode: DecodeArgs,
    },
}

#[derive(Args)]
struct StoreArgs {
    #[arg(
        long,
        value_hint = ValueHint::DirPath,
        help = "Serve buckets from sub-directories of this local directory (wins over --endpoint)"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        env = "FIREHOSE_SIPPER_ENDPOINT",
        value_hint = ValueHint::Url,
        help = "S3-compatible endpoint URL (path-style addressing)"
    )]
    endpoint: Option<String>,
    #[arg(long, env = "FIREHOSE_SIPPER_TOKEN", hide_env_values = true, help = "Bearer token")]
    token: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath, help = "PEM CA bundle for TLS")]
    tls_ca: Option<PathBuf>,
    #[arg(long, help = "Skip TLS certificate verification (testing only)")]
    tls_skip_verify: bool,
    #[arg(long, help = "Listing page size hint")]
    max_keys: Option<u32>,
}

#[derive(Args)]
struct DecodeArgs {
    #[arg(long, default_value = "auto", value_enum, help = "Gzip handling: auto|on|off")]
    gzip: GzipArg,
    #[arg(long, help = "Bytes requested per read (default 65536)")]
    chunk_size: Option<usize>,
    #[arg(long, help = "Fail when a single value grows past this many bytes")]
    max_value_bytes: Option<usize>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum GzipArg {
    Auto,
    On,
    Off,
}

impl From<GzipArg> for GzipMode {
    fn from(value: GzipArg) -> Self {
        match value {
            GzipArg::Auto => GzipMode::Auto,
            GzipArg::On => GzipMode::On,
            GzipArg::Off => GzipMode::Off,
        }
    }
}

impl DecodeArgs {
    fn options(&self) -> DecodeOptions {
        let mut options = DecodeOptions::new();
        if let Some(chunk_size) = self.chunk_size {
            options = options.with_chunk_size(chunk_size);
        }
        if let Some(max_value_bytes) = self.max_value_bytes {
            options = options.with_max_value_bytes(max_value_bytes);
        }
        options
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(err) => {
            let exit_code = match err.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => 0,
                ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => 2,
                _ => {
                    return Err(Error::new(ErrorKind::InvalidArgument)
                        .with_message(usage_message(&err))
                        .with_hint("Try `firehose-sipper --help`."));
                }
            };
            err.print().map_err(|io_err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to write help")
                    .with_source(io_err)
            })?;
            return Ok(exit_code);
        }
    };
    dispatch(cli.command).map(|()| 0)
}

fn dispatch(command: Command) -> Result<(), Error> {
    match command {
        Command::Sip {
            store,
            bucket,
            key,
            prefix,
            decode,
        } => {
            let target = SipTarget::from_parts(prefix.as_deref(), key.as_deref())?;
            let store = open_store(&store)?;
            let options = SipOptions::new()
                .with_gzip(decode.gzip.into())
                .with_decode(decode.options());
            let values: Sip<_, Value> = Sip::new(store, &bucket, target, options);
            write_values(values)
        }
        Command::List {
            store,
            bucket,
            prefix,
        } => {
            let store = open_store(&store)?;
            let mut out = BufWriter::new(io::stdout().lock());
            let mut keys = list_keys(store, &bucket, &prefix);
            let result = keys.try_for_each(|key| {
                let key = key?;
                writeln!(out, "{key}").map_err(write_error)
            });
            finish_output(&mut out, result)
        }
        Command::Decode { input, decode } => {
            let (name, body, meta) = match input.filter(|path| path.as_os_str() != "-") {
                Some(path) => {
                    let name = path.display().to_string();
                    let file = File::open(&path).map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message(format!("failed to open {name}"))
                            .with_source(err)
                    })?;
                    let meta = infer_meta(&name);
                    (name, Box::new(file) as ObjectBody, meta)
                }
                None => (
                    "-".to_string(),
                    Box::new(io::stdin()) as ObjectBody,
                    Default::default(),
                ),
            };
            let encoding = select_encoding(&meta, decode.gzip.into());
            tracing::debug!(input = %name, ?encoding, "decoding local input");
            let values = open_object::<Value>(body, encoding, &name, decode.options())
                .map_err(|err| err.or_key(&name))?
                .map(move |value| value.map_err(|err| err.or_key(&name)));
            write_values(values)
        }
    }
}

fn open_store(args: &StoreArgs) -> Result<Box<dyn ObjectStore>, Error> {
    if let Some(dir) = &args.dir {
        return Ok(Box::new(DirStore::new(dir)));
    }
    let mut store = match &args.endpoint {
        Some(endpoint) => HttpStore::new(endpoint.as_str())?,
        None => HttpStore::from_env()?,
    };
    if let Some(token) = &args.token {
        store = store.with_token(token.as_str());
    }
    if let Some(max_keys) = args.max_keys {
        store = store.with_max_keys(max_keys);
    }
    if let Some(ca) = &args.tls_ca {
        store = store.with_tls_ca_file(ca)?;
    } else if args.tls_skip_verify {
        store = store.with_tls_skip_verify();
    }
    Ok(Box::new(store))
}

fn write_values<I>(values: I) -> Result<(), Error>
where
    I: Iterator<Item = Result<Value, Error>>,
{
    let mut out = BufWriter::new(io::stdout().lock());
    let interactive = io::stdout().is_terminal();
    let mut values = values;
    let result = values.try_for_each(|value| {
        let value = value?;
        serde_json::to_writer(&mut out, &value).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to encode output")
                .with_source(err)
        })?;
        out.write_all(b"\n").map_err(write_error)?;
        if interactive {
            out.flush().map_err(write_error)?;
        }
        Ok(())
    });
    finish_output(&mut out, result)
}

/// Flush what was written before surfacing `result`; a closed pipe ends output quietly.
fn finish_output(out: &mut impl Write, result: Result<(), Error>) -> Result<(), Error> {
    let flushed = out.flush().map_err(write_error);
    let result = result.and(flushed);
    match result {
        Err(err) if is_broken_pipe(&err) => Ok(()),
        other => other,
    }
}

fn write_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

fn is_broken_pipe(err: &Error) -> bool {
    use std::error::Error as _;
    err.kind() == ErrorKind::Io
        && err
            .source()
            .and_then(|source| source.downcast_ref::<io::Error>())
            .is_some_and(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
}

fn emit_error(err: &Error) {
    match serde_json::to_string(&error_json(err)) {
        Ok(line) => eprintln!("{line}"),
        Err(_) => eprintln!(r#"{{"error":{{"kind":"Internal","message":"json encode failed"}}}}"#),
    }
}

fn error_message(err: &Error) -> String {
    let fallback = match err.kind() {
        ErrorKind::Internal => "internal error",
        ErrorKind::InvalidArgument => "invalid argument",
        ErrorKind::Truncated => "input ended inside a value",
        ErrorKind::Malformed => "malformed input",
        ErrorKind::Oversize => "value exceeds size limit",
        ErrorKind::Transport => "object store request failed",
        ErrorKind::Io => "i/o error",
    };
    err.message().unwrap_or(fallback).to_string()
}

fn error_causes(err: &Error) -> Vec<String> {
    use std::error::Error as _;
    std::iter::successors(err.source(), |source| (*source).source())
        .map(|source| source.to_string())
        .collect()
}

/// `{"error":{kind,message,hint?,key?,offset?,causes?}}`
fn error_json(err: &Error) -> Value {
    let causes = error_causes(err);
    let optional = [
        ("hint", err.hint().map(Value::from)),
        ("key", err.key().map(Value::from)),
        ("offset", err.offset().map(Value::from)),
        ("causes", (!causes.is_empty()).then(|| Value::from(causes))),
    ];
    let mut fields = Map::new();
    fields.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    fields.insert("message".to_string(), json!(error_message(err)));
    fields.extend(
        optional
            .into_iter()
            .filter_map(|(name, value)| Some((name.to_string(), value?))),
    );
    json!({ "error": fields })
}

/// First non-empty line of clap's report, minus its `error:` label.
fn usage_message(err: &clap::Error) -> String {
    let report = err.to_string();
    report
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}
