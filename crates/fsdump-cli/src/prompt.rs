//! Passphrase and protector prompts backed by dialoguer.

use dialoguer::{Password, Select};
use zeroize::Zeroizing;

use fsdump_core::{FsdumpError, ProtectorChoice, Prompter, Result};

use crate::constants::env_vars;
use crate::errors::CliError;

/// Answers unlock prompts from the environment, falling back to the terminal.
pub struct DialoguerPrompter {
    interactive: bool,
    protector_index: Option<usize>,
}

impl DialoguerPrompter {
    /// Read `FSDUMP_PROTECTOR_INDEX` once; the passphrase is read per prompt.
    pub fn from_env(interactive: bool) -> std::result::Result<Self, CliError> {
        let protector_index = parse_protector_index(std::env::var(env_vars::PROTECTOR_INDEX).ok())?;
        Ok(Self {
            interactive,
            protector_index,
        })
    }
}

/// Parse a 1-based protector index; range checks happen once the count is known.
pub fn parse_protector_index(value: Option<String>) -> std::result::Result<Option<usize>, CliError> {
    let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    value.trim().parse::<usize>().map(Some).map_err(|_| {
        CliError::invalid_input(format!(
            "{} must be a positive number, got \"{}\"",
            env_vars::PROTECTOR_INDEX,
            value
        ))
    })
}

/// One selectable line per protector, numbered from 1.
pub fn choice_labels(choices: &[ProtectorChoice]) -> Vec<String> {
    choices
        .iter()
        .enumerate()
        .map(|(i, choice)| {
            if choice.name.is_empty() {
                format!("{}: {} (type {})", i + 1, choice.descriptor, choice.source)
            } else {
                format!(
                    "{}: {} \"{}\" (type {})",
                    i + 1,
                    choice.descriptor,
                    choice.name,
                    choice.source
                )
            }
        })
        .collect()
}

impl Prompter for DialoguerPrompter {
    fn select_protector(&mut self, policy: &str, choices: &[ProtectorChoice]) -> Result<usize> {
        if let Some(index) = self.protector_index {
            tracing::debug!(policy, index, "protector chosen from environment");
            return Ok(index);
        }
        if !self.interactive {
            return Err(FsdumpError::Prompt(format!(
                "Policy {} has {} protectors and no TTY is available. Set {}.",
                policy,
                choices.len(),
                env_vars::PROTECTOR_INDEX
            )));
        }

        let selection = Select::new()
            .with_prompt(format!(
                "Policy {} has more than 1 protector. Choose which one to use",
                policy
            ))
            .items(&choice_labels(choices))
            .default(0)
            .interact()
            .map_err(|e| FsdumpError::Prompt(format!("Failed to read selection: {}", e)))?;
        Ok(selection + 1)
    }

    fn password(&mut self, protector: &ProtectorChoice) -> Result<Zeroizing<String>> {
        if let Ok(value) = std::env::var(env_vars::PASSPHRASE) {
            if !value.trim().is_empty() {
                return Ok(Zeroizing::new(value));
            }
        }
        if !self.interactive {
            return Err(FsdumpError::Prompt(format!(
                "No passphrase provided and no TTY available. Set {}.",
                env_vars::PASSPHRASE
            )));
        }
        Password::new()
            .with_prompt(format!(
                "Enter key to unlock protector {}",
                protector.descriptor
            ))
            .interact()
            .map(Zeroizing::new)
            .map_err(|e| FsdumpError::Prompt(format!("Failed to read passphrase: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fsdump_core::SourceType;

    #[test]
    fn test_parse_protector_index() {
        assert_eq!(parse_protector_index(None).unwrap(), None);
        assert_eq!(parse_protector_index(Some("  ".to_string())).unwrap(), None);
        assert_eq!(parse_protector_index(Some("2".to_string())).unwrap(), Some(2));
        assert!(parse_protector_index(Some("two".to_string())).is_err());
        assert!(parse_protector_index(Some("-1".to_string())).is_err());
    }

    #[test]
    fn test_choice_labels_are_one_based() {
        let choices = vec![
            ProtectorChoice {
                descriptor: "0123456789abcdef".to_string(),
                source: SourceType::PamPassphrase,
                name: String::new(),
            },
            ProtectorChoice {
                descriptor: "fedcba9876543210".to_string(),
                source: SourceType::CustomPassphrase,
                name: "backup".to_string(),
            },
        ];
        let labels = choice_labels(&choices);
        assert_eq!(labels[0], "1: 0123456789abcdef (type pam_passphrase)");
        assert_eq!(
            labels[1],
            "2: fedcba9876543210 \"backup\" (type custom_passphrase)"
        );
    }
}
