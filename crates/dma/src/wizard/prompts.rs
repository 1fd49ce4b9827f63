//! Terminal prompts backed by `dialoguer`.

use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password, Select};

use super::Prompter;
use crate::config::EngineKind;
use crate::error::{Error, Result};

/// Prompts on the attached terminal.
pub struct DialoguerPrompter {
    theme: ColorfulTheme,
}

impl Default for DialoguerPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl DialoguerPrompter {
    /// Creates a prompter with the colorful theme.
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

fn cancelled(e: dialoguer::Error) -> Error {
    Error::Config(format!("Input cancelled: {e}"))
}

impl Prompter for DialoguerPrompter {
    fn is_interactive(&self) -> bool {
        console::user_attended_stderr()
    }

    fn select_engine(&self, engines: &[EngineKind]) -> Result<EngineKind> {
        let items: Vec<&str> = engines.iter().map(EngineKind::display_name).collect();

        let selection = Select::with_theme(&self.theme)
            .with_prompt("Source database type")
            .items(&items)
            .default(0)
            .interact()
            .map_err(cancelled)?;

        engines
            .get(selection)
            .copied()
            .ok_or_else(|| Error::Config("no database type selected".to_string()))
    }

    fn input(&self, prompt: &str, default: Option<&str>) -> Result<String> {
        let mut input = Input::<String>::with_theme(&self.theme).with_prompt(prompt);
        if let Some(default) = default {
            input = input.default(default.to_string());
        }
        input.interact_text().map_err(cancelled)
    }

    fn password(&self, prompt: &str) -> Result<String> {
        Password::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(cancelled)
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(cancelled)
    }
}
