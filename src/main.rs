use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ntnx::config::Config;
use ntnx::schema::{get_data_source_schema, get_registry, get_resource_schema};
use ntnx::{Provider, ProviderError};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Nutanix resource provider
#[derive(Parser, Debug)]
#[command(name = "ntnx", version = ntnx::VERSION, about, long_about = None)]
struct Args {
    /// Prism Central endpoint (host or IP)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Prism Central port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Accept self-signed certificates
    #[arg(long, global = true)]
    insecure: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Output format for state documents
    #[arg(short, long, value_enum, default_value = "json", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the schema registry, or the schema of one type
    Schema { type_name: Option<String> },
    /// Create a resource from a JSON or YAML document
    Create {
        type_name: String,
        /// Document path, `-` for stdin
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print a resource's state, or null when it is gone
    Read { type_name: String, id: String },
    /// Update a resource in place
    Update {
        type_name: String,
        id: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Delete a resource
    Delete {
        type_name: String,
        id: String,
        /// Configuration document; supplies wait budgets such as
        /// `wait_timeout_minutes`
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Query a data source
    Data {
        type_name: String,
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Poll a Prism task to a terminal state
    WaitTask { task_uuid: String },
    /// Save connection settings (never the password) to the config file
    Configure {
        #[arg(long)]
        foundation_endpoint: Option<String>,
        #[arg(long)]
        foundation_port: Option<u16>,
        /// Provider-wide Prism task timeout in minutes
        #[arg(long)]
        wait_timeout: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    let file = match open_log_file(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(tracing_level.as_str().to_ascii_lowercase())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("ntnx {} started with log level: {:?}", ntnx::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

/// Open the log file for appending, creating its directory first
fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("ntnx").join("ntnx.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".ntnx").join("ntnx.log");
    }
    PathBuf::from("ntnx.log")
}

/// File > environment > CLI flags, last one wins
fn resolve_config(args: &Args) -> Config {
    let mut config = Config::load();
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(username) = &args.username {
        config.username = Some(username.clone());
    }
    if let Some(password) = &args.password {
        config.password = Some(password.clone());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if args.insecure {
        config.insecure = true;
    }
    config
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Read a JSON or YAML document; stdin is sniffed by its first character
fn read_document(path: &Path) -> Result<Value> {
    let (content, yaml) = if path.as_os_str() == "-" {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("reading document from stdin")?;
        let yaml = !content.trim_start().starts_with('{');
        (content, yaml)
    } else {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading document {:?}", path))?;
        (content, is_yaml(path))
    };

    if yaml {
        serde_yaml::from_str(&content).with_context(|| format!("parsing YAML document {:?}", path))
    } else {
        serde_json::from_str(&content).with_context(|| format!("parsing JSON document {:?}", path))
    }
}

fn print_value<T: serde::Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

/// Render an error chain, listing per-item diagnostics of failed operations
fn format_error(err: &anyhow::Error) -> String {
    let mut text = format!("Error: {}", err);
    for cause in err.chain().skip(1) {
        text.push_str(&format!("\n  caused by: {}", cause));
    }
    if let Some(provider_err) = err.downcast_ref::<ProviderError>() {
        for diagnostic in provider_err.diagnostics() {
            text.push_str(&format!("\n  - {}", diagnostic));
        }
    }
    text
}

async fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args);
    let format = args.output;

    match args.command {
        Command::Schema { type_name: None } => print_value(get_registry(), format),
        Command::Schema {
            type_name: Some(type_name),
        } => {
            let schema = get_resource_schema(&type_name)
                .or_else(|| get_data_source_schema(&type_name))
                .with_context(|| format!("unknown type: {}", type_name))?;
            print_value(schema, format)
        }
        Command::Create { type_name, file } => {
            let document = read_document(&file)?;
            Provider::check_config(&config, &type_name)?;
            let provider = Provider::new(&config)?;
            let state = provider.create(&type_name, &document).await?;
            print_value(&state, format)
        }
        Command::Read { type_name, id } => {
            Provider::check_config(&config, &type_name)?;
            let provider = Provider::new(&config)?;
            let state = provider.read(&type_name, &id).await?;
            print_value(&state, format)
        }
        Command::Update {
            type_name,
            id,
            file,
        } => {
            let document = read_document(&file)?;
            Provider::check_config(&config, &type_name)?;
            let provider = Provider::new(&config)?;
            let state = provider.update(&type_name, &id, &document).await?;
            print_value(&state, format)
        }
        Command::Delete { type_name, id, file } => {
            let document = file.map(|file| read_document(&file)).transpose()?;
            Provider::check_config(&config, &type_name)?;
            let provider = Provider::new(&config)?;
            provider.delete(&type_name, &id, document.as_ref()).await?;
            eprintln!("Deleted {} {}", type_name, id);
            Ok(())
        }
        Command::Data { type_name, file } => {
            let document = match file {
                Some(file) => read_document(&file)?,
                None => Value::Object(Default::default()),
            };
            Provider::check_config(&config, &type_name)?;
            let provider = Provider::new(&config)?;
            let state = provider.read_data_source(&type_name, &document).await?;
            print_value(&state, format)
        }
        Command::WaitTask { task_uuid } => {
            config.validate_prism()?;
            let provider = Provider::new(&config)?;
            let task = provider.wait_task(&task_uuid).await?;
            print_value(&task, format)
        }
        Command::Configure {
            foundation_endpoint,
            foundation_port,
            wait_timeout,
        } => {
            let mut config = config;
            if foundation_endpoint.is_some() {
                config.foundation_endpoint = foundation_endpoint;
            }
            if foundation_port.is_some() {
                config.foundation_port = foundation_port;
            }
            if let Some(minutes) = wait_timeout {
                config.wait_timeout = minutes;
            }
            config.save().context("saving configuration")?;
            if let Some(path) = Config::config_path() {
                eprintln!("Saved configuration to {}", path.display());
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    if let Err(err) = run(args).await {
        tracing::error!("{:#}", err);
        eprintln!("{}", format_error(&err));
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ntnx").join("ntnx.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_log_file_reports_blocked_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("ntnx");
        std::fs::write(&blocker, "not a directory").unwrap();
        assert!(open_log_file(&blocker.join("ntnx.log")).is_err());
    }
}
