//! Mnemonic generation, verification and wallet creation
//!
//! Generated path: `SelectMnemonic -> VerifyMnemonic -> SetPassphrase -> Done`.
//! Import path: `Import -> SetPassphrase -> Done`.
//!
//! The phrase and passphrases are held in [`Zeroizing`] buffers and are moved
//! out of the flow when `create_wallet` runs, so they are wiped once the
//! backend call returns whatever its outcome.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rand::seq::index::sample;
use serde::Serialize;
use zeroize::Zeroizing;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::gateway::Backend;
use crate::lock;
use crate::notifier::Notifier;
use crate::types::AvailableWallet;
use crate::Result;

pub const DEFAULT_WALLET_NAME: &str = "My Wallet";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    SelectMnemonic,
    VerifyMnemonic,
    SetPassphrase,
    Import,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    #[default]
    Generated,
    Imported,
}

/// Limits applied before anything reaches the backend
#[derive(Debug, Clone)]
struct Limits {
    verification_word_count: usize,
    min_words: usize,
    max_words: usize,
    word_granularity: usize,
    min_word_len: usize,
    min_passphrase_len: usize,
}

impl From<&ClientConfig> for Limits {
    fn from(config: &ClientConfig) -> Self {
        Self {
            verification_word_count: config.verification_word_count,
            min_words: config.min_mnemonic_words,
            max_words: config.max_mnemonic_words,
            word_granularity: config.mnemonic_word_granularity.max(1),
            min_word_len: config.min_word_len,
            min_passphrase_len: config.min_passphrase_len,
        }
    }
}

#[derive(Default)]
struct State {
    stage: Stage,
    kind: FlowKind,
    mnemonic: Zeroizing<Vec<String>>,
    /// Sorted ascending, chosen once per generated phrase
    verification_indices: Vec<usize>,
    answers: BTreeMap<usize, String>,
    verified: Option<bool>,
    wallet_name: String,
    passphrase: Zeroizing<String>,
    repeat_passphrase: Zeroizing<String>,
    generate_generation: u64,
    creating: bool,
    created: Option<AvailableWallet>,
}

#[derive(Clone)]
pub struct MnemonicFlow {
    backend: Arc<dyn Backend>,
    notifier: Notifier,
    limits: Limits,
    state: Arc<Mutex<State>>,
}

impl MnemonicFlow {
    pub fn new(backend: Arc<dyn Backend>, notifier: Notifier, config: &ClientConfig) -> Self {
        Self {
            backend,
            notifier,
            limits: Limits::from(config),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn stage(&self) -> Stage {
        lock(&self.state).stage
    }

    pub fn kind(&self) -> FlowKind {
        lock(&self.state).kind
    }

    /// Wipe everything and go back to the first generated-path stage
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        let generation = state.generate_generation + 1;
        *state = State {
            generate_generation: generation,
            ..State::default()
        };
    }

    // ========================================================================
    // Generated path
    // ========================================================================

    /// Fetch a new phrase, replacing the previous one and its verification state
    pub async fn generate(&self) -> Result<Vec<String>> {
        let generation = {
            let mut state = lock(&self.state);
            if matches!(state.stage, Stage::SetPassphrase | Stage::Done) || state.creating {
                return Err(ClientError::validation("Mnemonic can no longer be regenerated"));
            }
            state.generate_generation += 1;
            state.generate_generation
        };

        let result = self.backend.generate_mnemonic().await;

        let words = match result.into_result() {
            Ok(words) => Zeroizing::new(words),
            Err(e) => {
                self.notifier.err(format!("Failed to generate mnemonic: {}", e));
                return Err(e.into());
            }
        };
        if words.len() < self.limits.verification_word_count {
            return Err(ClientError::backend(format!(
                "Generated mnemonic has only {} words",
                words.len()
            )));
        }

        let mut state = lock(&self.state);
        if state.generate_generation != generation {
            return Err(ClientError::stale("generate mnemonic"));
        }

        let mut indices = sample(
            &mut rand::thread_rng(),
            words.len(),
            self.limits.verification_word_count,
        )
        .into_vec();
        indices.sort_unstable();

        state.stage = Stage::SelectMnemonic;
        state.kind = FlowKind::Generated;
        state.verification_indices = indices;
        state.answers.clear();
        state.verified = None;
        state.mnemonic = words;
        log::debug!("Generated a {}-word mnemonic", state.mnemonic.len());
        Ok(state.mnemonic.to_vec())
    }

    pub fn mnemonic(&self) -> Vec<String> {
        lock(&self.state).mnemonic.to_vec()
    }

    pub fn verification_indices(&self) -> Vec<usize> {
        lock(&self.state).verification_indices.clone()
    }

    pub fn proceed_to_verify(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.stage != Stage::SelectMnemonic || state.mnemonic.is_empty() {
            return Err(ClientError::validation("Generate a mnemonic first"));
        }
        state.stage = Stage::VerifyMnemonic;
        Ok(())
    }

    /// Record the user's word for a verification position
    pub fn set_answer(&self, position: usize, word: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.verification_indices.contains(&position) {
            return Err(ClientError::validation(format!(
                "Position {} is not being verified",
                position + 1
            )));
        }
        state.answers.insert(position, word.trim().to_lowercase());
        state.verified = None;
        Ok(())
    }

    pub fn answers(&self) -> BTreeMap<usize, String> {
        lock(&self.state).answers.clone()
    }

    /// `Ok(false)` keeps the stage, answers and indices as they were
    pub fn verify(&self) -> Result<bool> {
        let mut state = lock(&self.state);
        if state.stage != Stage::VerifyMnemonic {
            return Err(ClientError::validation("Nothing to verify"));
        }

        let ok = state.verification_indices.iter().all(|&i| {
            match (state.answers.get(&i), state.mnemonic.get(i)) {
                (Some(answer), Some(word)) => *answer == word.to_lowercase(),
                _ => false,
            }
        });
        state.verified = Some(ok);
        if ok {
            state.stage = Stage::SetPassphrase;
        } else {
            log::debug!("Mnemonic verification failed");
        }
        Ok(ok)
    }

    pub fn verified(&self) -> Option<bool> {
        lock(&self.state).verified
    }

    // ========================================================================
    // Import path
    // ========================================================================

    pub fn begin_import(&self) {
        let mut state = lock(&self.state);
        let generation = state.generate_generation + 1;
        *state = State {
            stage: Stage::Import,
            kind: FlowKind::Imported,
            generate_generation: generation,
            ..State::default()
        };
    }

    /// Check an entered phrase and move on to the passphrase stage
    pub fn import(&self, phrase: &str) -> Result<usize> {
        let words: Zeroizing<Vec<String>> = Zeroizing::new(
            phrase.split_whitespace().map(str::to_lowercase).collect(),
        );
        self.check_import_words(&words)?;

        let mut state = lock(&self.state);
        if state.stage != Stage::Import {
            return Err(ClientError::validation("Not importing a mnemonic"));
        }
        let count = words.len();
        state.mnemonic = words;
        state.stage = Stage::SetPassphrase;
        Ok(count)
    }

    fn check_import_words(&self, words: &[String]) -> Result<()> {
        let limits = &self.limits;
        let count = words.len();
        if count < limits.min_words
            || count > limits.max_words
            || count % limits.word_granularity != 0
        {
            return Err(ClientError::validation(format!(
                "Mnemonic must have between {} and {} words in steps of {}, got {}",
                limits.min_words, limits.max_words, limits.word_granularity, count
            )));
        }
        if let Some(pos) = words.iter().position(|w| w.chars().count() < limits.min_word_len) {
            return Err(ClientError::validation(format!(
                "Word {} is too short",
                pos + 1
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Passphrase and creation
    // ========================================================================

    pub fn set_wallet_name(&self, name: impl Into<String>) {
        lock(&self.state).wallet_name = name.into();
    }

    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        lock(&self.state).passphrase = Zeroizing::new(passphrase.into());
    }

    pub fn set_repeat_passphrase(&self, passphrase: impl Into<String>) {
        lock(&self.state).repeat_passphrase = Zeroizing::new(passphrase.into());
    }

    /// Repeat entered and different
    pub fn passphrase_mismatch(&self) -> bool {
        let state = lock(&self.state);
        !state.repeat_passphrase.is_empty() && *state.passphrase != *state.repeat_passphrase
    }

    pub fn passphrase_matched(&self) -> bool {
        let state = lock(&self.state);
        !state.passphrase.is_empty() && *state.passphrase == *state.repeat_passphrase
    }

    pub fn is_creating(&self) -> bool {
        lock(&self.state).creating
    }

    pub fn created(&self) -> Option<AvailableWallet> {
        lock(&self.state).created.clone()
    }

    pub async fn create_wallet(&self) -> Result<AvailableWallet> {
        let (phrase, passphrase, name, kind) = {
            let mut state = lock(&self.state);
            if state.stage != Stage::SetPassphrase || state.mnemonic.is_empty() {
                return Err(ClientError::validation("Mnemonic is not ready"));
            }
            if state.creating {
                return Err(ClientError::validation("Wallet creation already in progress"));
            }
            if *state.passphrase != *state.repeat_passphrase {
                return Err(ClientError::PassphraseMismatch);
            }
            if state.passphrase.chars().count() < self.limits.min_passphrase_len {
                return Err(ClientError::validation(format!(
                    "Passphrase must be at least {} characters",
                    self.limits.min_passphrase_len
                )));
            }

            state.creating = true;
            let words = std::mem::take(&mut state.mnemonic);
            let phrase = Zeroizing::new(words.join(" "));
            let passphrase = std::mem::take(&mut state.passphrase);
            state.repeat_passphrase = Zeroizing::new(String::new());
            state.answers.clear();
            let name = match state.wallet_name.trim() {
                "" => DEFAULT_WALLET_NAME.to_string(),
                n => n.to_string(),
            };
            (phrase, passphrase, name, state.kind)
        };

        log::info!("Creating wallet '{}'", name);
        let result = self.backend.create_wallet(&phrase, &passphrase, &name).await;
        drop(phrase);
        drop(passphrase);

        let mut state = lock(&self.state);
        state.creating = false;
        match result.into_result() {
            Ok(wallet) => {
                state.stage = Stage::Done;
                state.created = Some(wallet.clone());
                state.verification_indices.clear();
                drop(state);
                self.notifier.ok(format!("Wallet '{}' created", wallet.name));
                Ok(wallet)
            }
            Err(e) => {
                // secrets are gone, the phrase has to be entered or generated again
                state.stage = match kind {
                    FlowKind::Generated => Stage::SelectMnemonic,
                    FlowKind::Imported => Stage::Import,
                };
                state.verification_indices.clear();
                state.verified = None;
                drop(state);
                self.notifier.err(format!("Failed to create wallet: {}", e));
                Err(ClientError::WalletCreation(e.message().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_config() {
        let config = ClientConfig {
            mnemonic_word_granularity: 0,
            ..Default::default()
        };
        let limits = Limits::from(&config);
        assert_eq!(limits.word_granularity, 1);
        assert_eq!(limits.min_words, 12);
        assert_eq!(limits.verification_word_count, 3);
    }
}
