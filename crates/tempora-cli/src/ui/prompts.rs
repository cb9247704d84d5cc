//! Interactive prompt utilities.

use dialoguer::{Confirm, Password, theme::ColorfulTheme};
use tempora_core::validation::validate_secret;

fn theme() -> ColorfulTheme {
    ColorfulTheme::default()
}

/// Prompt for confirmation (yes/no).
pub fn confirm(prompt: &str) -> Result<bool, dialoguer::Error> {
    Confirm::with_theme(&theme())
        .with_prompt(prompt)
        .default(false)
        .interact()
}

/// Prompt twice for a new secret and check its strength.
pub fn new_secret(prompt: &str) -> Result<String, dialoguer::Error> {
    Password::with_theme(&theme())
        .with_prompt(prompt)
        .with_confirmation("Repeat secret", "Secrets do not match")
        .validate_with(|input: &String| validate_secret(input).map_err(|e| e.to_string()))
        .interact()
}
