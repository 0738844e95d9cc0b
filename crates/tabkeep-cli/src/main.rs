//! Tabkeep CLI - secrets vault, session lock and backups

mod input;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use tabkeep_core::Error;
use tabkeep_core::config::Config;
use tabkeep_core::domain::backup::{
    ExportOptions, Exporter, Importer, Section, suggested_filename,
};
use tabkeep_core::domain::security::{SecureString, SecurityService};
use tabkeep_core::infrastructure::storage::SqliteKeyValueStore;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tabkeep")]
#[command(author, version, about = "Secrets vault and backups for the Tabkeep dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show protection and session state
    Status,

    /// Unlock the vault with your password
    Unlock,

    /// Lock the vault
    Lock,

    /// Manage password protection
    Protect {
        #[command(subcommand)]
        action: ProtectAction,
    },

    /// Manage stored API keys
    Secrets {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Write a backup file
    Export {
        /// Sections to include (settings, notes, habits, widgets); defaults to all of them
        #[arg(short, long = "section", value_delimiter = ',')]
        sections: Vec<String>,
        /// Include API keys (always encrypted)
        #[arg(long)]
        include_api_keys: bool,
        /// Additional sections to encrypt
        #[arg(short, long, value_delimiter = ',')]
        encrypt: Vec<String>,
        /// Encrypt every included section
        #[arg(long, conflicts_with = "encrypt")]
        encrypt_all: bool,
        /// Output file (defaults to a timestamped name in export.default_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Restore a backup file
    Import {
        /// Backup file
        file: PathBuf,
    },

    /// Show security events from this session
    Events,

    /// Check a candidate password against the strength rules
    CheckPassword {
        /// Password to check (prompted when omitted)
        password: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Interactive shell that keeps the session unlocked between commands
    Shell,
}

#[derive(Subcommand)]
enum ProtectAction {
    /// Set a password and encrypt the vault with it
    Enable,
    /// Remove the password and fall back to the device key
    Disable,
    /// Change the password
    Change,
}

#[derive(Subcommand)]
enum SecretAction {
    /// List stored secrets (redacted)
    List,
    /// Print a secret
    Get { name: String },
    /// Store a secret (value read from stdin or a prompt when omitted)
    Set { name: String, value: Option<String> },
    /// Delete a secret
    Remove { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

/// Per-command output settings
#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

/// Open vault and the settings it was opened with
struct App {
    config: Config,
    service: SecurityService,
    interactive: bool,
}

impl App {
    async fn open() -> anyhow::Result<Self> {
        let config = Config::load()?;
        let database_path = config.database_path()?;
        debug!(path = %database_path.display(), "Opening vault");

        let store = SqliteKeyValueStore::connect(&database_path).await?;
        let service = SecurityService::open(Arc::new(store), config.security_settings()).await?;

        Ok(Self {
            config,
            service,
            interactive: input::is_interactive(),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tabkeep=warn".parse()?),
        )
        .init();

    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    // Commands that never touch the vault
    match cli.command {
        Commands::Config { action } => return cmd_config(action, out),
        Commands::CheckPassword { password } => return cmd_check_password(password, out),
        command => {
            let app = App::open().await?;
            match command {
                Commands::Shell => cmd_shell(&app).await,
                command => execute(&app, command, out).await,
            }
        }
    }
}

/// Print an error with its code and a suggested fix
fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<Error>() {
        Some(error) => {
            eprintln!("Error [{}]: {}", error.code(), error);
            if let Some(suggestion) = error.suggestion() {
                eprintln!("  Try: {}", suggestion);
            }
        }
        None => eprintln!("Error: {:#}", err),
    }
}

async fn execute(app: &App, command: Commands, out: Output) -> anyhow::Result<()> {
    match command {
        Commands::Status => cmd_status(app, out).await,
        Commands::Unlock => cmd_unlock(app, out).await,
        Commands::Lock => {
            app.service.lock_session();
            if !out.quiet {
                println!("Session locked.");
            }
            Ok(())
        }
        Commands::Protect { action } => cmd_protect(app, action, out).await,
        Commands::Secrets { action } => cmd_secrets(app, action, out).await,
        Commands::Export {
            sections,
            include_api_keys,
            encrypt,
            encrypt_all,
            output,
        } => {
            let request = ExportRequest {
                sections,
                include_api_keys,
                encrypt,
                encrypt_all,
                output,
            };
            cmd_export(app, request, out).await
        }
        Commands::Import { file } => cmd_import(app, file, out).await,
        Commands::Events => cmd_events(app, out),
        Commands::CheckPassword { password } => cmd_check_password(password, out),
        Commands::Config { action } => cmd_config(action, out),
        Commands::Shell => {
            println!("Already in the shell.");
            Ok(())
        }
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Unlock with TABKEEP_PASSWORD or a prompt if protection requires it
async fn ensure_unlocked(app: &App) -> anyhow::Result<()> {
    if !app.service.is_password_protection_enabled() || app.service.is_session_unlocked() {
        return Ok(());
    }
    let password = input::prompt_password(app.interactive)?;
    if !app.service.unlock_with_password(password.as_str()).await? {
        return Err(Error::WrongKeyOrCorrupted.into());
    }
    Ok(())
}

async fn cmd_status(app: &App, out: Output) -> anyhow::Result<()> {
    let status = app.service.status().await?;

    if out.json() {
        let value = json!({
            "protectionEnabled": status.protection_enabled,
            "unlocked": status.unlocked,
            "unlockedAt": status.unlocked_at.map(|t| t.to_rfc3339()),
            "expiresAt": status.expires_at.map(|t| t.to_rfc3339()),
            "timeoutMinutes": status.timeout_minutes,
            "hasSecrets": status.has_secrets,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if status.protection_enabled {
        println!("Password protection: enabled");
        if status.unlocked {
            println!("Session: unlocked");
        } else {
            println!("Session: locked");
        }
        if let Some(expires_at) = status.expires_at {
            println!("  Expires: {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        if let Some(minutes) = status.timeout_minutes {
            println!("  Timeout: {} minutes", minutes);
        }
    } else {
        println!("Password protection: disabled (device key)");
    }
    println!(
        "Secrets stored: {}",
        if status.has_secrets { "yes" } else { "no" }
    );
    Ok(())
}

async fn cmd_unlock(app: &App, out: Output) -> anyhow::Result<()> {
    if !app.service.is_password_protection_enabled() {
        return Err(Error::ProtectionNotEnabled.into());
    }
    if app.service.is_session_unlocked() {
        if !out.quiet {
            println!("Session already unlocked.");
        }
        return Ok(());
    }

    ensure_unlocked(app).await?;
    if !out.quiet {
        println!(
            "Session unlocked for {} minutes.",
            app.service.settings().session_timeout_minutes
        );
    }
    Ok(())
}

async fn cmd_protect(app: &App, action: ProtectAction, out: Output) -> anyhow::Result<()> {
    match action {
        ProtectAction::Enable => {
            if app.service.is_password_protection_enabled() {
                return Err(Error::ProtectionAlreadyEnabled.into());
            }
            let password = input::prompt_new_password(app.interactive)?;
            check_new_password(password.as_str(), out)?;

            app.service.setup_password(password.as_str()).await?;
            info!("Password protection enabled from CLI");
            if !out.quiet {
                println!("Password protection enabled.");
            }
        }
        ProtectAction::Disable => {
            if !app.service.is_password_protection_enabled() {
                return Err(Error::ProtectionNotEnabled.into());
            }
            ensure_unlocked(app).await?;
            app.service.disable_password_protection().await?;
            if !out.quiet {
                println!("Password protection disabled. Secrets are sealed with the device key.");
            }
        }
        ProtectAction::Change => {
            if !app.service.is_password_protection_enabled() {
                return Err(Error::ProtectionNotEnabled.into());
            }
            let current = input::prompt_password(app.interactive)?;
            let password = input::prompt_new_password(app.interactive)?;
            check_new_password(password.as_str(), out)?;

            if !app
                .service
                .change_password(current.as_str(), password.as_str())
                .await?
            {
                return Err(Error::WrongKeyOrCorrupted.into());
            }
            if !out.quiet {
                println!("Password changed.");
            }
        }
    }
    Ok(())
}

/// Reject invalid passwords and warn about weak ones
fn check_new_password(password: &str, out: Output) -> anyhow::Result<()> {
    let strength = SecurityService::validate_password_strength(password);
    if !strength.valid {
        return Err(Error::InvalidInput(strength.message).into());
    }
    if !strength.strong && !out.quiet {
        eprintln!("Warning: {}", strength.message);
    }
    Ok(())
}

async fn cmd_secrets(app: &App, action: SecretAction, out: Output) -> anyhow::Result<()> {
    ensure_unlocked(app).await?;

    match action {
        SecretAction::List => {
            let secrets = app.service.list_secret_names().await?;
            if out.json() {
                let items: Vec<_> = secrets
                    .iter()
                    .map(|s| json!({ "name": s.name, "preview": s.preview }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if secrets.is_empty() {
                if !out.quiet {
                    println!("No secrets stored.");
                }
            } else {
                for secret in secrets {
                    println!("{:<12} {}", secret.name, secret.preview);
                }
            }
        }
        SecretAction::Get { name } => match app.service.get_secret(&name).await? {
            Some(value) => println!("{}", value.as_str()),
            None => return Err(anyhow::anyhow!("No secret named '{}'", name)),
        },
        SecretAction::Set { name, value } => {
            let value = input::read_secret_value(&name, value, app.interactive)?;
            app.service.set_secret(&name, value.as_str()).await?;
            if !out.quiet {
                println!("Stored {} ({}).", name, value.preview());
            }
        }
        SecretAction::Remove { name } => {
            if app.service.remove_secret(&name).await? {
                if !out.quiet {
                    println!("Removed {}.", name);
                }
            } else {
                return Err(anyhow::anyhow!("No secret named '{}'", name));
            }
        }
    }
    Ok(())
}

struct ExportRequest {
    sections: Vec<String>,
    include_api_keys: bool,
    encrypt: Vec<String>,
    encrypt_all: bool,
    output: Option<PathBuf>,
}

fn parse_sections(names: &[String]) -> anyhow::Result<Vec<Section>> {
    names
        .iter()
        .map(|name| name.parse::<Section>().map_err(anyhow::Error::from))
        .collect()
}

async fn cmd_export(app: &App, request: ExportRequest, out: Output) -> anyhow::Result<()> {
    let mut sections = if request.sections.is_empty() {
        Section::ALL.iter().copied().filter(|s| !s.is_secret()).collect()
    } else {
        parse_sections(&request.sections)?
    };
    if request.include_api_keys {
        sections.push(Section::ApiKeys);
    }
    let encrypt = if request.encrypt_all {
        sections.clone()
    } else {
        parse_sections(&request.encrypt)?
    };

    let mut options = ExportOptions::new(sections).encrypt(encrypt);
    if !options.sealed_sections().is_empty() {
        let password = match input::backup_password_from_env() {
            Some(password) => Some(password),
            None if app.interactive => Some(input::prompt_backup_password(true)?),
            None => None,
        };
        if let Some(password) = password {
            options = options.with_password(password.as_str());
        }
    }
    // Reject before prompting for the vault password or touching storage
    options.validate()?;

    if options.sections.contains(&Section::ApiKeys) {
        ensure_unlocked(app).await?;
    }

    let path = match request.output {
        Some(path) => path,
        None => app.config.export_dir().join(suggested_filename(Utc::now())),
    };
    let bundle = Exporter::new(&app.service)
        .export_to_file(&options, &path)
        .await?;

    let included = bundle.sections();
    let names: Vec<&str> = included.iter().map(Section::as_str).collect();
    let sealed: Vec<&str> = bundle
        .encrypted_sections
        .keys()
        .map(Section::as_str)
        .collect();

    if out.json() {
        let value = json!({
            "path": path.display().to_string(),
            "sections": names,
            "encryptedSections": sealed,
            "hash": bundle.hash,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !out.quiet {
        println!("Exported {} section(s) to {}", names.len(), path.display());
        if names.is_empty() {
            println!("  (no stored data for the selected sections)");
        } else {
            println!("  Sections: {}", names.join(", "));
        }
        if bundle.encrypted {
            println!("  Encrypted: {}", sealed.join(", "));
        }
    }
    Ok(())
}

async fn cmd_import(app: &App, file: PathBuf, out: Output) -> anyhow::Result<()> {
    let importer = Importer::new(&app.service);
    let mut password = input::backup_password_from_env();

    // Nothing is written on error, so retrying after a prompt is safe.
    let report = loop {
        let attempt = importer
            .import_file(&file, password.as_ref().map(|p| p.as_str()))
            .await;
        match attempt {
            Err(Error::PasswordRequired(_)) if password.is_none() && app.interactive => {
                password = Some(input::prompt_backup_password(false)?);
            }
            Err(Error::Locked) if !app.service.is_session_unlocked() => {
                ensure_unlocked(app).await?;
            }
            result => break result?,
        }
    };

    let names: Vec<&str> = report
        .applied_sections
        .iter()
        .map(Section::as_str)
        .collect();

    if out.json() {
        let value = json!({
            "appliedSections": names,
            "secretsImported": report.secrets_imported,
            "legacyFormat": report.legacy_format,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !out.quiet {
        println!("Imported {} section(s) from {}", names.len(), file.display());
        if !names.is_empty() {
            println!("  Sections: {}", names.join(", "));
        }
        if report.secrets_imported > 0 {
            println!("  API keys: {}", report.secrets_imported);
        }
        if report.legacy_format {
            println!("  (older backup format)");
        }
    }
    Ok(())
}

fn cmd_events(app: &App, out: Output) -> anyhow::Result<()> {
    let events = app.service.recent_events();
    if out.json() {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        if !out.quiet {
            println!("No security events in this session.");
        }
        return Ok(());
    }
    for event in events {
        println!(
            "{}  {}",
            event.created_at.format("%H:%M:%S"),
            event.event_type
        );
    }
    Ok(())
}

fn cmd_check_password(password: Option<String>, out: Output) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => SecureString::new(password),
        None => input::prompt_password(input::is_interactive())?,
    };
    let strength = SecurityService::validate_password_strength(password.as_str());

    if out.json() {
        println!("{}", serde_json::to_string_pretty(&strength)?);
    } else {
        let grade = match (strength.valid, strength.strong) {
            (true, true) => "strong",
            (true, false) => "acceptable",
            _ => "rejected",
        };
        println!("{}: {}", grade, strength.message);
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::String(value)))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (key, value) in items {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_shell(app: &App) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Tabkeep shell. Type `help` for commands, `exit` to quit.");

    loop {
        let prompt =
            if app.service.is_password_protection_enabled() && !app.service.is_session_unlocked() {
                "tabkeep (locked)> "
            } else {
                "tabkeep> "
            };

        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        let _ = editor.add_history_entry(line);

        let words = std::iter::once("tabkeep").chain(line.split_whitespace());
        match Cli::try_parse_from(words) {
            Ok(cli) => {
                let out = Output {
                    format: cli.format,
                    quiet: cli.quiet,
                };
                if let Err(err) = execute(app, cli.command, out).await {
                    report_error(&err);
                }
                // A command counts as activity.
                app.service.refresh_session();
            }
            Err(err) => {
                let _ = err.print();
            }
        }
    }

    app.service.lock_session();
    Ok(())
}
