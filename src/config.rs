//! Configuration — CLI flags, environment variables, config file.

use clap::Parser;
use std::fs;
use std::path::Path;

/// Passwdd — SASL password authentication daemon
#[derive(Parser, Debug)]
#[command(name = "passwdd", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(long, short = 'c', default_value = "/etc/passwdd.conf")]
    pub config: String,

    /// Primary TCP listen port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Alternate TCP/UDP listen port
    #[arg(long)]
    pub alt_port: Option<u16>,

    /// Bind address
    #[arg(long)]
    pub listen_host: Option<String>,

    /// Path to the PEM RSA private key
    #[arg(long)]
    pub private_key: Option<String>,

    /// Path to the credential database
    #[arg(long)]
    pub database: Option<String>,

    /// Hostname advertised in the key thumbprint
    #[arg(long)]
    pub hostname: Option<String>,

    /// Primary IP address (informational)
    #[arg(long)]
    pub ipaddress: Option<String>,

    /// Log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// Max concurrent client connections
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Hash MS-CHAPv2 passwords as UTF-16-LE per RFC 2759
    #[arg(long)]
    pub mschap_rfc_unicode: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub port: u16,
    pub alt_port: u16,
    pub private_key: String,
    pub database: String,
    pub hostname: Option<String>,
    pub ipaddress: Option<String>,
    pub log_level: String,
    pub max_clients: usize,
    pub mschap_rfc_unicode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".into(),
            port: 106,
            alt_port: 3659,
            private_key: "/etc/passwdd.key".into(),
            database: "/etc/passwdd.users".into(),
            hostname: None,
            ipaddress: None,
            log_level: "info".into(),
            max_clients: 64,
            mschap_rfc_unicode: false,
        }
    }
}

impl Config {
    /// Load configuration: defaults → config file → env vars → CLI flags.
    pub fn load() -> Self {
        let cli = Cli::parse();
        let mut config = Config::default();

        // 1. Config file
        let config_path = Path::new(&cli.config);
        if config_path.exists()
            && let Ok(content) = fs::read_to_string(config_path)
        {
            apply_config_file(&mut config, &content);
        }

        // 2. Environment variables
        apply_env(&mut config);

        // 3. CLI flags (highest priority)
        if let Some(v) = cli.port {
            config.port = v;
        }
        if let Some(v) = cli.alt_port {
            config.alt_port = v;
        }
        if let Some(v) = cli.listen_host {
            config.listen_host = v;
        }
        if let Some(v) = cli.private_key {
            config.private_key = v;
        }
        if let Some(v) = cli.database {
            config.database = v;
        }
        if let Some(v) = cli.hostname {
            config.hostname = Some(v);
        }
        if let Some(v) = cli.ipaddress {
            config.ipaddress = Some(v);
        }
        if let Some(v) = cli.log_level {
            config.log_level = v;
        }
        if let Some(v) = cli.max_clients {
            config.max_clients = v;
        }
        if cli.mschap_rfc_unicode {
            config.mschap_rfc_unicode = true;
        }

        config
    }

    /// Validate configuration. Returns an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_clients == 0 {
            return Err("max_clients must be > 0".into());
        }
        if self.private_key.is_empty() {
            return Err("private_key must be set".into());
        }
        if self.database.is_empty() {
            return Err("database must be set".into());
        }
        if self.port == self.alt_port {
            return Err("port and alt_port must differ".into());
        }
        Ok(())
    }

    /// Hostname used in the key thumbprint: configured value, else the
    /// system hostname, else "localhost".
    pub fn resolve_hostname(&self) -> String {
        if let Some(name) = &self.hostname {
            return name.clone();
        }
        fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "localhost".into())
    }
}

fn apply_config_file(config: &mut Config, content: &str) {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let Some(eq_pos) = trimmed.find('=') else {
            continue;
        };

        let key = trimmed[..eq_pos].trim();
        let mut value = trimmed[eq_pos + 1..].trim().to_string();

        // Strip quotes
        if (value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\''))
        {
            value = value[1..value.len() - 1].to_string();
        }

        match key {
            "port" | "listen_port" => {
                if let Ok(v) = value.parse() {
                    config.port = v;
                }
            }
            "alt_port" => {
                if let Ok(v) = value.parse() {
                    config.alt_port = v;
                }
            }
            "listen_host" | "host" => config.listen_host = value,
            "private_key" => config.private_key = value,
            "database" => config.database = value,
            "hostname" => config.hostname = Some(value),
            "ipaddress" => config.ipaddress = Some(value),
            "log_level" => config.log_level = value,
            "max_clients" => {
                if let Ok(v) = value.parse() {
                    config.max_clients = v;
                }
            }
            "mschap_rfc_unicode" => {
                config.mschap_rfc_unicode = value == "1" || value.eq_ignore_ascii_case("true");
            }
            _ => {}
        }
    }
}

fn apply_env(config: &mut Config) {
    if let Ok(v) = std::env::var("PASSWDD_PORT")
        && let Ok(port) = v.parse()
    {
        config.port = port;
    }
    if let Ok(v) = std::env::var("PASSWDD_LISTEN_HOST") {
        config.listen_host = v;
    }
    if let Ok(v) = std::env::var("PASSWDD_PRIVATE_KEY") {
        config.private_key = v;
    }
    if let Ok(v) = std::env::var("PASSWDD_DATABASE") {
        config.database = v;
    }
    if let Ok(v) = std::env::var("PASSWDD_LOG_LEVEL") {
        config.log_level = v;
    }
}
