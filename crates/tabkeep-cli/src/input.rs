//! Password and secret input from the environment or the terminal

use std::io::{self, IsTerminal, Read};

use dialoguer::Password;
use tabkeep_core::domain::security::SecureString;

/// Current vault password
pub const PASSWORD_ENV: &str = "TABKEEP_PASSWORD";

/// Password being set by `protect enable` or `protect change`
pub const NEW_PASSWORD_ENV: &str = "TABKEEP_NEW_PASSWORD";

/// Password sealing or opening a backup file
pub const EXPORT_PASSWORD_ENV: &str = "TABKEEP_EXPORT_PASSWORD";

/// True when prompts can be shown
pub fn is_interactive() -> bool {
    io::stdin().is_terminal()
}

fn from_env(var: &str) -> Option<SecureString> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(SecureString::new)
}

fn no_tty(var: &str) -> anyhow::Error {
    anyhow::anyhow!("No password provided and no TTY available. Set {}.", var)
}

/// Prompt for the vault password, or read it from TABKEEP_PASSWORD
pub fn prompt_password(interactive: bool) -> anyhow::Result<SecureString> {
    if let Some(value) = from_env(PASSWORD_ENV) {
        return Ok(value);
    }
    if !interactive {
        return Err(no_tty(PASSWORD_ENV));
    }
    Password::new()
        .with_prompt("Password")
        .interact()
        .map(SecureString::new)
        .map_err(|e| anyhow::anyhow!("Failed to read password: {}", e))
}

/// Prompt for a new vault password with confirmation, or read TABKEEP_NEW_PASSWORD
pub fn prompt_new_password(interactive: bool) -> anyhow::Result<SecureString> {
    if let Some(value) = from_env(NEW_PASSWORD_ENV) {
        return Ok(value);
    }
    if !interactive {
        return Err(no_tty(NEW_PASSWORD_ENV));
    }
    Password::new()
        .with_prompt("New password")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()
        .map(SecureString::new)
        .map_err(|e| anyhow::anyhow!("Failed to read password: {}", e))
}

/// Backup password from TABKEEP_EXPORT_PASSWORD, if set
pub fn backup_password_from_env() -> Option<SecureString> {
    from_env(EXPORT_PASSWORD_ENV)
}

/// Prompt for a backup password; exports ask twice
pub fn prompt_backup_password(confirm: bool) -> anyhow::Result<SecureString> {
    let mut prompt = Password::new().with_prompt("Backup password");
    if confirm {
        prompt = prompt.with_confirmation("Confirm backup password", "Passwords do not match");
    }
    prompt
        .interact()
        .map(SecureString::new)
        .map_err(|e| anyhow::anyhow!("Failed to read password: {}", e))
}

/// Secret value from the argument, piped stdin, or a hidden prompt
pub fn read_secret_value(
    name: &str,
    value: Option<String>,
    interactive: bool,
) -> anyhow::Result<SecureString> {
    if let Some(value) = value {
        return Ok(SecureString::new(value));
    }

    if !interactive {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| anyhow::anyhow!("Failed to read stdin: {}", e))?;
        let value = SecureString::new(buffer.trim().to_string());
        // Wipe the untrimmed copy.
        drop(SecureString::new(buffer));
        if value.as_str().is_empty() {
            return Err(anyhow::anyhow!("No value provided on stdin"));
        }
        return Ok(value);
    }

    Password::new()
        .with_prompt(format!("Value for {}", name))
        .interact()
        .map(SecureString::new)
        .map_err(|e| anyhow::anyhow!("Failed to read value: {}", e))
}
