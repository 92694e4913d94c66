use std::fmt::Display;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Once;

use anyhow::{Context, anyhow, bail, ensure};
use clap::{Parser, Subcommand, ValueEnum};
use pushcode_core::EncoderOptions;
use pushcode_core::bytecode::{
    BytecodeBuilder, BytecodeInfo, DEFAULT_HEX_DUMP_BYTES, decompress, disassemble, hex_dump, verify_bytecode,
};
use tracing::debug;


static TRACE_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "pushcode_core=debug,pushcode=info";

#[derive(Debug, Parser)]
#[command(
    name = "pushcode",
    author,
    version,
    about = "Build, validate and inspect push-value bytecode modules",
    long_about = None
)]
struct CliArgs {
    /// TOML file with header options (`flags`, `typesize`, `numbersize`)
    #[arg(long, global = true, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PushKind {
    Nil,
    Boolean,
    Number,
    Integer,
    String,
    Table,
    Array,
    Dictionary,
    Multiple,
    Call,
    Vector2,
    Vector3,
    Color3,
    Udim,
    Udim2,
    Cframe,
    BrickColor,
    Instance,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a module that pushes one value.
    Push {
        #[arg(value_enum)]
        kind: PushKind,
        /// Values for the kind; `KEY=VALUE` for dictionary entries and
        /// instance properties, `NAME ARGS...` for calls
        #[arg(value_name = "VALUES", allow_negative_numbers = true)]
        values: Vec<String>,
        /// Result count expected from `call`
        #[arg(long, default_value_t = 1)]
        returns: u8,
        /// Write the raw module here instead of printing a hex dump
        #[arg(short, long, value_parser = parse_sanitized_path)]
        output: Option<PathBuf>,
    },
    /// Translate `return <literal>` into a module.
    Compile {
        source: String,
        /// Fail on unsupported input instead of emitting nil
        #[arg(long)]
        strict: bool,
        #[arg(short, long, value_parser = parse_sanitized_path)]
        output: Option<PathBuf>,
    },
    /// Check header, size and checksum; exits with status 1 when invalid.
    Validate {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
    /// Summarise a module.
    Info {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print the leading bytes of a file in hex.
    Hexdump {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_HEX_DUMP_BYTES)]
        max: usize,
    },
    /// List constants and instructions.
    Disasm {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
    /// Remove a signing wrapper, if any.
    Strip {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[arg(short, long, value_parser = parse_sanitized_path)]
        output: PathBuf,
    },
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            bail!("Parent directory components ('..') are not allowed in file paths.");
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    !(trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("0")
        || trimmed.eq_ignore_ascii_case("false")
        || trimmed.eq_ignore_ascii_case("off"))
}

/// A value other than a plain on-switch is taken as a filter expression.
fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let plain_switch =
        trimmed.eq_ignore_ascii_case("1") || trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("on");
    (!trimmed.is_empty() && !plain_switch).then(|| trimmed.to_string())
}

fn maybe_init_tracing() {
    let Ok(raw) = std::env::var("PUSHCODE_TRACE") else {
        return;
    };
    if !env_toggle_enabled(&raw) {
        return;
    }

    TRACE_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;

        let filter_expr = filter_expr_from(&raw).or_else(|| std::env::var("RUST_LOG").ok());
        let builder = fmt().with_writer(std::io::stderr);
        let builder = match filter_expr.and_then(|expr| EnvFilter::try_new(expr).ok()) {
            Some(filter) => builder.with_env_filter(filter),
            None => builder.with_env_filter(DEFAULT_TRACE_FILTER),
        };
        let _ = builder.try_init();
    });
}

fn load_builder(config: Option<&Path>) -> anyhow::Result<BytecodeBuilder> {
    let options = match config {
        Some(path) => EncoderOptions::load(path)?,
        None => EncoderOptions::default(),
    };
    debug!(?options, "encoder options");
    Ok(BytecodeBuilder::new(options))
}

fn read_module(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn write_module(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory for {}", path.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write bytecode to {}", path.display()))?;
    eprintln!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn emit(bytes: &[u8], output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => write_module(path, bytes),
        None => {
            print!("{}", hex_dump(bytes, bytes.len()));
            Ok(())
        }
    }
}

fn parse_value<T>(what: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>().map_err(|e| anyhow!("invalid {} value '{}': {}", what, raw, e))
}

/// Parse exactly `count` values of one type.
fn parse_values<T>(what: &str, values: &[String], count: usize) -> anyhow::Result<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    ensure!(
        values.len() == count,
        "{} takes {} value(s), got {}",
        what,
        count,
        values.len()
    );
    values.iter().map(|v| parse_value(what, v)).collect()
}

fn parse_pair(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{}'", raw))
}

fn build_push(builder: &BytecodeBuilder, kind: PushKind, values: &[String], returns: u8) -> anyhow::Result<Vec<u8>> {
    Ok(match kind {
        PushKind::Nil => {
            ensure!(values.is_empty(), "nil takes no values");
            builder.push_nil()
        }
        PushKind::Boolean => builder.push_boolean(parse_values::<bool>("boolean", values, 1)?[0]),
        PushKind::Number => builder.push_number(parse_values::<f64>("number", values, 1)?[0]),
        PushKind::Integer => builder.push_integer(parse_values::<i64>("integer", values, 1)?[0]),
        PushKind::String => {
            ensure!(values.len() == 1, "string takes 1 value(s), got {}", values.len());
            builder.push_string(values[0].as_str())
        }
        PushKind::Table => {
            ensure!(values.len() <= 2, "table takes at most 2 values (array and hash sizes)");
            let array = values.first().map(|v| parse_value::<u16>("array size", v)).transpose()?;
            let hash = values.get(1).map(|v| parse_value::<u8>("hash size", v)).transpose()?;
            builder.push_table(array.unwrap_or(0), hash.unwrap_or(0))
        }
        PushKind::Array => builder.push_array(values)?,
        PushKind::Dictionary => {
            let pairs = values.iter().map(|v| parse_pair(v)).collect::<anyhow::Result<Vec<_>>>()?;
            builder.push_dictionary(&pairs)?
        }
        PushKind::Multiple => builder.push_multiple(values)?,
        PushKind::Call => {
            let Some((name, args)) = values.split_first() else {
                bail!("call needs a function name");
            };
            builder.function_call(name, args, returns)?
        }
        PushKind::Vector2 => {
            let v = parse_values::<f32>("Vector2", values, 2)?;
            builder.push_vector2(v[0], v[1])
        }
        PushKind::Vector3 => {
            let v = parse_values::<f32>("Vector3", values, 3)?;
            builder.push_vector3(v[0], v[1], v[2])
        }
        PushKind::Color3 => {
            let v = parse_values::<f32>("Color3", values, 3)?;
            builder.push_color3(v[0], v[1], v[2])
        }
        PushKind::Udim => {
            ensure!(values.len() == 2, "UDim takes scale and offset");
            builder.push_udim(parse_value("UDim scale", &values[0])?, parse_value("UDim offset", &values[1])?)
        }
        PushKind::Udim2 => {
            ensure!(values.len() == 4, "UDim2 takes x scale, x offset, y scale, y offset");
            builder.push_udim2(
                (parse_value("UDim2 scale", &values[0])?, parse_value("UDim2 offset", &values[1])?),
                (parse_value("UDim2 scale", &values[2])?, parse_value("UDim2 offset", &values[3])?),
            )
        }
        PushKind::Cframe => {
            ensure!(
                values.len() == 3 || values.len() == 7,
                "CFrame takes a position (3 values) and optionally a quaternion (4 more)"
            );
            let v = parse_values::<f32>("CFrame", values, values.len())?;
            let rotation = if v.len() == 7 { [v[3], v[4], v[5], v[6]] } else { [0.0, 0.0, 0.0, 1.0] };
            builder.push_cframe([v[0], v[1], v[2]], rotation)
        }
        PushKind::BrickColor => builder.push_brick_color(parse_values::<i32>("BrickColor", values, 1)?[0]),
        PushKind::Instance => {
            let Some((class_name, props)) = values.split_first() else {
                bail!("instance needs a class name");
            };
            let props = props.iter().map(|v| parse_pair(v)).collect::<anyhow::Result<Vec<_>>>()?;
            builder.push_instance(class_name, &props)
        }
    })
}

fn main() -> anyhow::Result<()> {
    maybe_init_tracing();

    let CliArgs { config, command } = CliArgs::parse();

    match command {
        Commands::Push {
            kind,
            values,
            returns,
            output,
        } => {
            let builder = load_builder(config.as_deref())?;
            let bytes = build_push(&builder, kind, &values, returns)?;
            emit(&bytes, output.as_deref())?;
        }
        Commands::Compile { source, strict, output } => {
            let builder = load_builder(config.as_deref())?;
            let bytes = if strict {
                builder.compile_strict(&source)?
            } else {
                builder.compile(&source)
            };
            emit(&bytes, output.as_deref())?;
        }
        Commands::Validate { file } => {
            let bytes = read_module(&file)?;
            match verify_bytecode(decompress(&bytes)) {
                Ok(_) => println!("valid"),
                Err(err) => {
                    println!("invalid: {}", err);
                    std::process::exit(1);
                }
            }
        }
        Commands::Info { file, json } => {
            let bytes = read_module(&file)?;
            let info = BytecodeInfo::inspect(&bytes).with_context(|| format!("Failed to inspect {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{}", info);
            }
        }
        Commands::Hexdump { file, max } => {
            let bytes = read_module(&file)?;
            print!("{}", hex_dump(&bytes, max));
        }
        Commands::Disasm { file } => {
            let bytes = read_module(&file)?;
            let listing = disassemble(&bytes).with_context(|| format!("Failed to decode {}", file.display()))?;
            print!("{}", listing);
        }
        Commands::Strip { file, output } => {
            let bytes = read_module(&file)?;
            let stripped = decompress(&bytes);
            if stripped.len() == bytes.len() {
                eprintln!("{} has no signing wrapper", file.display());
            }
            write_module(&output, stripped)?;
        }
    }

    Ok(())
}
