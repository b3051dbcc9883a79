use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use das_engine::{ClientConfig, ConfigError, LocalProviders, Pipeline, PipelineError, ProviderError};
use das_registry::{RegistryConfig, RegistryError};
use das_types::{DEFAULT_INSTANCE, ErrorCode, QueryError, StructuredQuery};
use das_util::HttpFetcher;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Federated query client for the DAS data services.
///
/// The query is a structured query document (JSON or YAML) with `fields`,
/// `spec`, and optionally `system`, `instance`, `filters`, `aggregators` and
/// `detail`.
#[derive(Debug, Parser)]
#[command(name = "das-client", version)]
struct Cli {
    /// Inline query document.
    #[arg(long, conflicts_with = "query_file")]
    query: Option<String>,

    /// Path to a query document; stdin is read when neither source is given.
    #[arg(long, value_name = "PATH")]
    query_file: Option<PathBuf>,

    /// Service map document (JSON or YAML).
    #[arg(long, value_name = "PATH", env = "DAS_MAPS")]
    maps: Option<String>,

    /// Client configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database instance, overriding the query and configuration.
    #[arg(long)]
    inst: Option<String>,

    /// Restrict the query to one backend system.
    #[arg(long)]
    system: Option<String>,

    /// Print every record, error records included, as one JSON array.
    #[arg(long, conflicts_with = "envelope")]
    json: bool,

    /// Print the JSON status envelope.
    #[arg(long)]
    envelope: bool,

    /// Output separator for multi-value lines.
    #[arg(long)]
    sep: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Total attempts per request.
    #[arg(long)]
    retry: Option<u32>,

    /// Keep every record instead of unique sorted lines.
    #[arg(long)]
    detail: bool,

    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("das-client: {error:#}");
            exit_code_for(&error)
        }
    };
    let _ = io::stdout().flush();
    std::process::exit(code as i32);
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<i64> {
    let config = load_config(&cli)?;
    let query = apply_overrides(read_query(&cli)?, &cli, &config);
    debug!(query = %query.to_document(), "query loaded");

    let maps = RegistryConfig::resolve(cli.maps.as_deref())
        .load_maps()
        .context("failed to load service maps")?;
    let providers = LocalProviders::with_builtins(maps.das_keys())?;
    providers.validate(&maps.services)?;

    let fetcher = HttpFetcher::new(config.retry_policy(), config.user_agent.as_deref())?;
    let separator = config.separator.clone();
    let pipeline = Pipeline::new(Arc::new(maps), Arc::new(fetcher), providers, config);
    let outcome = pipeline.run(&query).await?;

    let mut stdout = io::stdout().lock();
    if cli.envelope {
        writeln!(stdout, "{}", serde_json::to_string(&outcome.envelope(&query))?)?;
    } else if cli.json {
        writeln!(stdout, "{}", serde_json::to_string(&outcome.to_json())?)?;
    } else {
        for line in outcome.lines(&query, &separator) {
            writeln!(stdout, "{line}")?;
        }
    }

    if !outcome.status.is_ok() {
        warn!(
            code = outcome.status.code,
            message = outcome.status.message.as_deref().unwrap_or_default(),
            "query returned an error"
        );
    }
    Ok(outcome.status.code)
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    if let Some(retry) = cli.retry {
        config.retry = retry;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(separator) = &cli.sep {
        config.separator = separator.clone();
    }
    Ok(config)
}

fn read_query(cli: &Cli) -> Result<StructuredQuery> {
    let text = match (&cli.query, &cli.query_file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => read_file(path)?,
        (None, None) => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).context("failed to read query from stdin")?;
            buffer
        }
    };
    parse_query(&text)
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read query file {}", path.display()))
}

/// Parses a query document. JSON is tried first; anything else is read as YAML.
fn parse_query(text: &str) -> Result<StructuredQuery> {
    let text = text.trim();
    if text.is_empty() {
        bail!("empty query document");
    }
    if text.starts_with('{') {
        return serde_json::from_str(text).context("invalid JSON query");
    }
    serde_yaml::from_str(text).context("invalid YAML query")
}

/// Command line flags win over the query; the configured instance only
/// replaces the default one.
fn apply_overrides(mut query: StructuredQuery, cli: &Cli, config: &ClientConfig) -> StructuredQuery {
    if let Some(instance) = &cli.inst {
        query = query.with_instance(instance.clone());
    } else if query.instance() == DEFAULT_INSTANCE {
        query = query.with_instance(config.default_instance.clone());
    }
    if let Some(system) = &cli.system {
        query = query.with_system(system.clone());
    }
    if cli.detail {
        query = query.with_detail(true);
    }
    query
}

fn exit_code_for(error: &anyhow::Error) -> i64 {
    let code = if let Some(error) = error.downcast_ref::<PipelineError>() {
        error.code()
    } else if error.is::<QueryError>() || error.chain().any(|cause| cause.is::<serde_json::Error>() || cause.is::<serde_yaml::Error>()) {
        ErrorCode::DasQuery
    } else if error.is::<RegistryError>() || error.is::<ProviderError>() {
        ErrorCode::Registry
    } else if error.is::<ConfigError>() {
        ErrorCode::Validation
    } else {
        ErrorCode::DasServerError
    };
    code.code()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("das-client").chain(args.iter().copied()))
    }

    #[test]
    fn parses_json_and_yaml_queries() {
        let json = parse_query(r#"{"fields": ["file"], "spec": {"dataset": "/A/B/C"}}"#).unwrap();
        assert_eq!(json.fields(), ["file"]);
        assert_eq!(json.constraint("dataset").unwrap().values(), vec!["/A/B/C"]);

        let yaml = parse_query("fields: [run]\nspec:\n  run: [100, 200]\ndetail: true\n").unwrap();
        assert_eq!(yaml.fields(), ["run"]);
        assert!(yaml.is_detail());
        assert!(yaml.constraint("run").unwrap().is_list());
    }

    #[test]
    fn rejects_empty_and_duplicate_field_queries() {
        assert!(parse_query("  ").is_err());
        let error = parse_query(r#"{"fields": ["file", "file"]}"#).unwrap_err();
        assert_eq!(exit_code_for(&error), ErrorCode::DasQuery.code());
    }

    #[test]
    fn reads_query_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.yaml");
        std::fs::write(&path, "fields: [dataset]\nspec:\n  dataset: /A/*\n").unwrap();
        let args = cli(&["--query-file", path.to_str().unwrap()]);
        let query = read_query(&args).unwrap();
        assert_eq!(query.fields(), ["dataset"]);
    }

    #[test]
    fn flags_override_query_and_configuration() {
        let config = ClientConfig {
            default_instance: "prod/phys03".into(),
            ..ClientConfig::default()
        };
        let query = parse_query(r#"{"fields": ["file"]}"#).unwrap();

        let defaulted = apply_overrides(query.clone(), &cli(&[]), &config);
        assert_eq!(defaulted.instance(), "prod/phys03");

        let explicit = apply_overrides(query.clone(), &cli(&["--inst", "int/global", "--system", "dbs3", "--detail"]), &config);
        assert_eq!(explicit.instance(), "int/global");
        assert_eq!(explicit.system(), Some("dbs3"));
        assert!(explicit.is_detail());

        let pinned = parse_query(r#"{"fields": ["file"], "instance": "prod/phys01"}"#).unwrap();
        assert_eq!(apply_overrides(pinned, &cli(&[]), &config).instance(), "prod/phys01");
    }

    #[test]
    fn configuration_flags_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"retry": 5, "separator": ","}"#).unwrap();
        let args = cli(&["--config", path.to_str().unwrap(), "--retry", "1", "--timeout", "10"]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.retry, 1);
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.separator, ",");
    }

    #[test]
    fn pipeline_errors_keep_their_code() {
        let error = anyhow::Error::new(PipelineError::Runtime("no runtime".into()));
        assert_eq!(exit_code_for(&error), 1);
        let error = anyhow::Error::new(ProviderError::Missing(vec!["phedex:file4dataset".into()]));
        assert_eq!(exit_code_for(&error), 17);
    }
}
