use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub pdf: PdfConfig,
    pub stockage: StockageConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PdfConfig {
    pub template_dir: String,
    /// Explicit wkhtmltopdf path; `None` resolves through PATH.
    pub wkhtmltopdf_path: Option<String>,
    pub rendus_simultanes: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct StockageConfig {
    pub mode: StockageMode,
    pub base_url: Option<String>,
    pub bucket: String,
    pub api_key: Option<SecretString>,
    pub repertoire: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockageMode {
    Desactive,
    Local,
    Bucket,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub health_check_port: Option<u16>,
    pub stockage_mode: Option<StockageMode>,
    pub stockage_repertoire: Option<String>,
    pub pdf_template_dir: Option<String>,
    pub pdf_wkhtmltopdf_path: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://facturo.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8090,
                health_check_port: 8091,
                graceful_shutdown_secs: 15,
            },
            pdf: PdfConfig {
                template_dir: "templates/factures".to_string(),
                wkhtmltopdf_path: None,
                rendus_simultanes: 2,
                timeout_secs: 30,
            },
            stockage: StockageConfig {
                mode: StockageMode::Local,
                base_url: None,
                bucket: "factures".to_string(),
                api_key: None,
                repertoire: Some("storage".to_string()),
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for StockageMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "desactive" => Ok(Self::Desactive),
            "local" => Ok(Self::Local),
            "bucket" => Ok(Self::Bucket),
            other => Err(ConfigError::Validation(format!(
                "unsupported storage mode `{other}` (expected desactive|local|bucket)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("facturo.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(pdf) = patch.pdf {
            if let Some(template_dir) = pdf.template_dir {
                self.pdf.template_dir = template_dir;
            }
            if let Some(wkhtmltopdf_path) = pdf.wkhtmltopdf_path {
                self.pdf.wkhtmltopdf_path = Some(wkhtmltopdf_path);
            }
            if let Some(rendus_simultanes) = pdf.rendus_simultanes {
                self.pdf.rendus_simultanes = rendus_simultanes;
            }
            if let Some(timeout_secs) = pdf.timeout_secs {
                self.pdf.timeout_secs = timeout_secs;
            }
        }

        if let Some(stockage) = patch.stockage {
            if let Some(mode) = stockage.mode {
                self.stockage.mode = mode;
            }
            if let Some(base_url) = stockage.base_url {
                self.stockage.base_url = Some(base_url);
            }
            if let Some(bucket) = stockage.bucket {
                self.stockage.bucket = bucket;
            }
            if let Some(api_key_value) = stockage.api_key {
                self.stockage.api_key = Some(api_key_value.into());
            }
            if let Some(repertoire) = stockage.repertoire {
                self.stockage.repertoire = Some(repertoire);
            }
            if let Some(timeout_secs) = stockage.timeout_secs {
                self.stockage.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FACTURO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FACTURO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FACTURO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FACTURO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FACTURO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FACTURO_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FACTURO_SERVER_PORT") {
            self.server.port = parse_u16("FACTURO_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FACTURO_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("FACTURO_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("FACTURO_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FACTURO_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FACTURO_PDF_TEMPLATE_DIR") {
            self.pdf.template_dir = value;
        }
        if let Some(value) = read_env("FACTURO_PDF_WKHTMLTOPDF_PATH") {
            self.pdf.wkhtmltopdf_path = Some(value);
        }
        if let Some(value) = read_env("FACTURO_PDF_RENDUS_SIMULTANES") {
            self.pdf.rendus_simultanes = parse_u32("FACTURO_PDF_RENDUS_SIMULTANES", &value)?;
        }
        if let Some(value) = read_env("FACTURO_PDF_TIMEOUT_SECS") {
            self.pdf.timeout_secs = parse_u64("FACTURO_PDF_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FACTURO_STOCKAGE_MODE") {
            self.stockage.mode = value.parse()?;
        }
        if let Some(value) = read_env("FACTURO_STOCKAGE_BASE_URL") {
            self.stockage.base_url = Some(value);
        }
        if let Some(value) = read_env("FACTURO_STOCKAGE_BUCKET") {
            self.stockage.bucket = value;
        }
        if let Some(value) = read_env("FACTURO_STOCKAGE_API_KEY") {
            self.stockage.api_key = Some(value.into());
        }
        if let Some(value) = read_env("FACTURO_STOCKAGE_REPERTOIRE") {
            self.stockage.repertoire = Some(value);
        }
        if let Some(value) = read_env("FACTURO_STOCKAGE_TIMEOUT_SECS") {
            self.stockage.timeout_secs = parse_u64("FACTURO_STOCKAGE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("FACTURO_LOGGING_LEVEL").or_else(|| read_env("FACTURO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FACTURO_LOGGING_FORMAT").or_else(|| read_env("FACTURO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(port) = overrides.health_check_port {
            self.server.health_check_port = port;
        }
        if let Some(mode) = overrides.stockage_mode {
            self.stockage.mode = mode;
        }
        if let Some(repertoire) = overrides.stockage_repertoire {
            self.stockage.repertoire = Some(repertoire);
        }
        if let Some(template_dir) = overrides.pdf_template_dir {
            self.pdf.template_dir = template_dir;
        }
        if let Some(wkhtmltopdf_path) = overrides.pdf_wkhtmltopdf_path {
            self.pdf.wkhtmltopdf_path = Some(wkhtmltopdf_path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_pdf(&self.pdf)?;
        validate_stockage(&self.stockage)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("facturo.toml"), PathBuf::from("config/facturo.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_pdf(pdf: &PdfConfig) -> Result<(), ConfigError> {
    if pdf.template_dir.trim().is_empty() {
        return Err(ConfigError::Validation("pdf.template_dir must not be empty".to_string()));
    }

    if pdf.rendus_simultanes == 0 {
        return Err(ConfigError::Validation(
            "pdf.rendus_simultanes must be greater than zero".to_string(),
        ));
    }

    if pdf.timeout_secs == 0 || pdf.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "pdf.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_stockage(stockage: &StockageConfig) -> Result<(), ConfigError> {
    match stockage.mode {
        StockageMode::Desactive => {}
        StockageMode::Local => {
            let missing = stockage
                .repertoire
                .as_ref()
                .map(|value| value.trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "stockage.repertoire is required for local storage mode".to_string(),
                ));
            }
        }
        StockageMode::Bucket => {
            let base_url = stockage.base_url.as_deref().unwrap_or("");
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::Validation(
                    "stockage.base_url must start with http:// or https:// for bucket mode"
                        .to_string(),
                ));
            }

            let missing_key = stockage
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "stockage.api_key is required for bucket mode".to_string(),
                ));
            }

            if stockage.bucket.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "stockage.bucket must not be empty".to_string(),
                ));
            }
        }
    }

    if stockage.timeout_secs == 0 || stockage.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "stockage.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    pdf: Option<PdfPatch>,
    stockage: Option<StockagePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PdfPatch {
    template_dir: Option<String>,
    wkhtmltopdf_path: Option<String>,
    rendus_simultanes: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StockagePatch {
    mode: Option<StockageMode>,
    base_url: Option<String>,
    bucket: Option<String>,
    api_key: Option<String>,
    repertoire: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
