//! Per-directory unlock cycle.
//!
//! `PolicyResolver` drives one directory from Locked to Unlocked: it reads
//! the directory's policy identifier from the kernel, loads the policy and
//! protector records, unwraps the content key, and registers it. The
//! returned [`UnlockedDirectory`] removes the key again when relocked or
//! dropped, so a registered key never outlives the cycle that added it.

use std::path::{Path, PathBuf};

use zeroize::Zeroizing;

use crate::crypto::unlock_content_key;
use crate::error::{FsdumpError, Result};
use crate::kernel::{AddKeyStatus, Keyring, RemovalStatus};
use crate::metadata::{
    KeyIdentifier, MetadataStore, PolicyData, ProtectorData, SourceType, WrappedKeyData,
};

/// A protector offered to the caller when a policy has several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectorChoice {
    pub descriptor: String,
    pub source: SourceType,
    pub name: String,
}

impl ProtectorChoice {
    fn from_record(protector: &ProtectorData) -> Self {
        Self {
            descriptor: protector.protector_descriptor.clone(),
            source: protector.source(),
            name: protector.name.clone(),
        }
    }
}

/// Interactive capabilities the unlock cycle needs from its caller.
pub trait Prompter {
    /// Pick one of `choices` for `policy`, returning a 1-based index.
    fn select_protector(&mut self, policy: &str, choices: &[ProtectorChoice]) -> Result<usize>;

    /// Supply the password for `protector`.
    fn password(&mut self, protector: &ProtectorChoice) -> Result<Zeroizing<String>>;
}

/// Check a 1-based selection against `count` entries and convert it to an offset.
pub fn resolve_selection(index: usize, count: usize) -> Result<usize> {
    if index == 0 || index > count {
        return Err(FsdumpError::InvalidSelection { index, count });
    }
    Ok(index - 1)
}

/// Orchestrates unlocking directories on one filesystem.
pub struct PolicyResolver<K, M> {
    keyring: K,
    store: M,
    fs_root: PathBuf,
}

impl<K: Keyring, M: MetadataStore> PolicyResolver<K, M> {
    /// # Arguments
    ///
    /// * `keyring` - Kernel key-management backend
    /// * `store` - Source of policy and protector records
    /// * `fs_root` - Root of the filesystem that keys are registered with
    pub fn new(keyring: K, store: M, fs_root: impl Into<PathBuf>) -> Self {
        Self {
            keyring,
            store,
            fs_root: fs_root.into(),
        }
    }

    pub fn keyring(&self) -> &K {
        &self.keyring
    }

    pub fn fs_root(&self) -> &Path {
        &self.fs_root
    }

    /// Unlock `dir`, registering its content key with the kernel.
    ///
    /// # Errors
    ///
    /// - `FsdumpError::NotEncrypted` if `dir` has no policy
    /// - `FsdumpError::Configuration` if the chosen protector takes no password
    /// - `FsdumpError::InvalidSelection` if the prompter picks outside the list
    /// - `FsdumpError::Integrity` on a wrong password or tampered metadata
    /// - `FsdumpError::Ioctl` if the kernel refuses the key
    pub fn unlock<P: Prompter>(
        &self,
        dir: &Path,
        prompter: &mut P,
    ) -> Result<UnlockedDirectory<'_, K>> {
        let identifier = self.keyring.policy_identifier(dir)?;
        let policy = self.store.policy(&identifier.to_hex())?;
        if policy.key_identifier()? != identifier {
            return Err(FsdumpError::Metadata(format!(
                "Policy record {} does not describe directory key {}",
                policy.key_descriptor, identifier
            )));
        }

        let (protector, wrapped_policy_key) = self.select_protector(&policy, prompter)?;
        let choice = ProtectorChoice::from_record(&protector);
        tracing::info!(
            dir = %dir.display(),
            policy = %identifier,
            protector = %choice.descriptor,
            source = %choice.source,
            "unlocking directory"
        );

        if !choice.source.is_password_derived() {
            return Err(FsdumpError::Configuration(format!(
                "Protector {} ({}) is not unlocked with a password",
                choice.descriptor, choice.source
            )));
        }

        let password = prompter.password(&choice)?;
        let content_key = unlock_content_key(&password, &protector, &wrapped_policy_key)?;
        drop(password);

        let outcome = self
            .keyring
            .add_key(&content_key, &identifier, &self.fs_root)?;
        if outcome.status == AddKeyStatus::AlreadyPresent {
            tracing::info!(policy = %identifier, "key was already present");
        }

        Ok(UnlockedDirectory {
            keyring: &self.keyring,
            fs_root: &self.fs_root,
            path: dir.to_path_buf(),
            identifier: outcome.identifier,
            add_status: outcome.status,
            relocked: false,
        })
    }

    /// Unlock `dir`, run `f` against it, and relock whatever `f` returned.
    ///
    /// The key is removed even if `f` fails; `f`'s error then takes
    /// precedence over any removal error.
    pub fn with_unlocked<P, F, T, E>(
        &self,
        dir: &Path,
        prompter: &mut P,
        f: F,
    ) -> std::result::Result<(T, RemovalStatus), E>
    where
        P: Prompter,
        F: FnOnce(&UnlockedDirectory<'_, K>) -> std::result::Result<T, E>,
        E: From<FsdumpError>,
    {
        let unlocked = self.unlock(dir, prompter)?;
        let value = f(&unlocked)?;
        let status = unlocked.relock()?;
        Ok((value, status))
    }

    fn select_protector<P: Prompter>(
        &self,
        policy: &PolicyData,
        prompter: &mut P,
    ) -> Result<(ProtectorData, WrappedKeyData)> {
        let entries = &policy.wrapped_policy_keys;
        let offset = if entries.len() == 1 {
            0
        } else {
            let choices = entries
                .iter()
                .map(|entry| {
                    self.load_protector(&entry.protector_descriptor)
                        .map(|p| ProtectorChoice::from_record(&p))
                })
                .collect::<Result<Vec<_>>>()?;
            let index = prompter.select_protector(&policy.key_descriptor, &choices)?;
            resolve_selection(index, entries.len())?
        };

        let entry = entries.get(offset).ok_or_else(|| {
            FsdumpError::Metadata(format!("Policy {} has no protectors", policy.key_descriptor))
        })?;
        let protector = self.load_protector(&entry.protector_descriptor)?;
        Ok((protector, entry.wrapped_key()?.clone()))
    }

    fn load_protector(&self, descriptor: &str) -> Result<ProtectorData> {
        let protector = self.store.protector(descriptor)?;
        if !protector
            .protector_descriptor
            .eq_ignore_ascii_case(descriptor)
        {
            return Err(FsdumpError::Metadata(format!(
                "Protector record {} is stored as {}",
                protector.protector_descriptor, descriptor
            )));
        }
        Ok(protector)
    }
}

/// A directory whose content key is registered with the kernel.
///
/// Call [`relock`](Self::relock) to remove the key and observe the result.
/// If the value is dropped without relocking, removal is still attempted
/// and any failure is logged.
pub struct UnlockedDirectory<'a, K: Keyring> {
    keyring: &'a K,
    fs_root: &'a Path,
    path: PathBuf,
    identifier: KeyIdentifier,
    add_status: AddKeyStatus,
    relocked: bool,
}

impl<'a, K: Keyring> UnlockedDirectory<'a, K> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identifier(&self) -> &KeyIdentifier {
        &self.identifier
    }

    pub fn add_status(&self) -> AddKeyStatus {
        self.add_status
    }

    /// Remove the content key (Unlocked → Locked).
    pub fn relock(mut self) -> Result<RemovalStatus> {
        self.relocked = true;
        let status = self.keyring.remove_key(&self.identifier, self.fs_root)?;
        tracing::info!(
            dir = %self.path.display(),
            policy = %self.identifier,
            status = ?status,
            "directory locked"
        );
        Ok(status)
    }
}

impl<K: Keyring> Drop for UnlockedDirectory<'_, K> {
    fn drop(&mut self) {
        if self.relocked {
            return;
        }
        match self.keyring.remove_key(&self.identifier, self.fs_root) {
            Ok(status) => tracing::info!(
                dir = %self.path.display(),
                policy = %self.identifier,
                status = ?status,
                "directory locked on early exit"
            ),
            Err(err) => tracing::warn!(
                dir = %self.path.display(),
                policy = %self.identifier,
                error = %err,
                "failed to remove key; it stays registered until removed or unmounted"
            ),
        }
    }
}
