//! CLI command implementations

use std::io::{self, BufRead, Write};
use std::path::Path;

use super::args::Command;
use super::errors::{CliError, CliResult};
use crate::auth::password::{hash_password, validate_password};
use crate::config::AppConfig;
use crate::http_server::HttpServer;
use crate::observability::init_tracing;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve { config, port } => serve(config.as_deref(), port),
        Command::CheckConfig { config } => check_config(&config),
        Command::HashPassword => hash_password_from_stdin(),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    Ok(match path {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?,
    })
}

pub fn serve(config_path: Option<&Path>, port: Option<u16>) -> CliResult<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    init_tracing(config.logging.json, &config.logging.level);

    for line in describe(&config) {
        tracing::info!("{}", line);
    }
    let server = HttpServer::new(config)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("Failed to create tokio runtime: {}", e)))?;
    rt.block_on(server.start())?;
    Ok(())
}

pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = AppConfig::load(config_path)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}: ok", config_path.display())?;
    for line in describe(&config) {
        writeln!(out, "  {}", line)?;
    }
    Ok(())
}

/// One line per setting an operator usually wants confirmed
fn describe(config: &AppConfig) -> Vec<String> {
    let mut providers = Vec::new();
    if config.oauth.google.is_some() {
        providers.push("google");
    }
    if config.oauth.microsoft.is_some() {
        providers.push("microsoft");
    }
    let providers = if providers.is_empty() {
        "none".to_string()
    } else {
        providers.join(", ")
    };

    vec![
        format!("listen: {}:{}", config.server.host, config.server.port),
        format!(
            "sessions: cookie '{}', {} days, secure={}",
            config.session.cookie_name, config.session.lifetime_days, config.session.secure_cookie
        ),
        format!(
            "authorization: fail_closed={}, ability cache {}s, audit={}",
            config.security.fail_closed_mode,
            config.security.ability_cache_ttl_secs,
            config.security.audit_decisions
        ),
        format!(
            "rate limits: enabled={}, global {}/{}s, auth {}/{}s",
            config.rate_limit.enabled,
            config.rate_limit.global.max_requests,
            config.rate_limit.global.window_secs,
            config.rate_limit.auth.max_requests,
            config.rate_limit.auth.window_secs
        ),
        format!("oauth providers: {}", providers),
    ]
}

/// Read one line from stdin and print its PHC hash
pub fn hash_password_from_stdin() -> CliResult<()> {
    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;
    let hash = hash_line(&line)?;
    writeln!(io::stdout().lock(), "{}", hash)?;
    Ok(())
}

fn hash_line(line: &str) -> CliResult<String> {
    let password = line.trim_end_matches(['\r', '\n']);
    validate_password(password)?;
    Ok(hash_password(password)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use std::io::Write as _;

    #[test]
    fn test_check_config_accepts_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 8080\n").unwrap();
        assert!(check_config(file.path()).is_ok());
    }

    #[test]
    fn test_check_config_reports_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 0\n").unwrap();
        let err = check_config(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_describe_lists_providers() {
        let mut config = AppConfig::default();
        assert!(describe(&config).iter().any(|l| l == "oauth providers: none"));

        config.oauth.google = Some(crate::config::OAuthClientSettings {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://example.com/cb".to_string(),
            tenant: None,
        });
        assert!(describe(&config).iter().any(|l| l == "oauth providers: google"));
    }

    #[test]
    fn test_hash_line_strips_newline_only() {
        let hash = hash_line("  spaced secret  \n").unwrap();
        assert!(verify_password("  spaced secret  ", &hash));
        assert!(hash_line("short\n").is_err());
    }
}
