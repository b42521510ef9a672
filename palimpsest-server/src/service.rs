//! Version operations on top of the mediator.
//!
//! | Operation        | Mediator scope | Result                |
//! |------------------|----------------|-----------------------|
//! | `create_version` | write          | `VersionInfo`         |
//! | `get_version`    | read           | `VersionContent`      |
//! | `list_versions`  | read           | `Vec<VersionInfo>`    |
//! | `remove_edit`    | write          | `VersionInfo`         |
//!
//! A file that was never written reads as version 0 with empty content.
//! Every write compacts the history before it is stored.

use std::sync::Arc;

use palimpsest_core::{PatchCorrector, PatchError};
use thiserror::Error;

use crate::history::{FileHistory, HistoryConfig, HistoryError, VersionContent, VersionInfo};
use crate::key::FileKey;
use crate::mediator::{MediatorError, VersionedFileMediator};
use crate::protocol::ErrorCode;
use crate::storage::BlobStore;

/// Service errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Mediator(#[from] MediatorError),
}

impl ServiceError {
    /// Client-facing category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::History(HistoryError::VersionNotFound { .. }) => ErrorCode::NotFound,
            ServiceError::History(HistoryError::VersionCompacted { .. }) => ErrorCode::Compacted,
            ServiceError::History(HistoryError::Patch(PatchError::RebaseConflict { .. })) => {
                ErrorCode::RebaseConflict
            }
            ServiceError::History(_) => ErrorCode::Internal,
            ServiceError::Mediator(MediatorError::ConcurrencyConflict { .. }) => {
                ErrorCode::ConcurrencyConflict
            }
            ServiceError::Mediator(MediatorError::LockTimeout { .. }) => ErrorCode::Timeout,
            ServiceError::Mediator(_) => ErrorCode::Internal,
        }
    }
}

/// Versioned file operations. Cheap to clone; clones share one mediator.
pub struct VersionService<S> {
    mediator: Arc<VersionedFileMediator<S>>,
    corrector: PatchCorrector,
    history_config: HistoryConfig,
}

impl<S> Clone for VersionService<S> {
    fn clone(&self) -> Self {
        Self {
            mediator: self.mediator.clone(),
            corrector: self.corrector.clone(),
            history_config: self.history_config.clone(),
        }
    }
}

impl<S: BlobStore> VersionService<S> {
    pub fn new(mediator: VersionedFileMediator<S>, history_config: HistoryConfig) -> Self {
        Self {
            mediator: Arc::new(mediator),
            corrector: PatchCorrector::default(),
            history_config,
        }
    }

    /// Replace the corrector (and with it the patch options).
    pub fn with_corrector(mut self, corrector: PatchCorrector) -> Self {
        self.corrector = corrector;
        self
    }

    pub fn mediator(&self) -> &VersionedFileMediator<S> {
        &self.mediator
    }

    /// Store `content` as the next version of `key`.
    pub async fn create_version(
        &self,
        key: &FileKey,
        author: &str,
        content: &str,
    ) -> Result<VersionInfo, ServiceError> {
        let config = &self.history_config;
        let receipt = self
            .mediator
            .with_write_file(key, FileHistory::default(), |mut history: FileHistory| {
                let info = history.record(author, content);
                history.compact(config)?;
                Ok::<_, ServiceError>((history, info))
            })
            .await?;

        log::info!(
            "{key}: version {} by {author} ({} chars, generation {})",
            receipt.value.version,
            receipt.value.length,
            receipt.generation
        );
        Ok(receipt.value)
    }

    /// Read `version` of `key`, or the latest version when `None`.
    pub async fn get_version(
        &self,
        key: &FileKey,
        version: Option<u64>,
    ) -> Result<VersionContent, ServiceError> {
        self.mediator
            .with_read_file(key, FileHistory::default(), |history: FileHistory| {
                let version = version.unwrap_or_else(|| history.head_version());
                let content = history.text_at(version)?;
                let info = history.info(version)?;
                Ok::<_, ServiceError>(VersionContent { info, content })
            })
            .await
    }

    /// Metadata of every available version, oldest first.
    pub async fn list_versions(&self, key: &FileKey) -> Result<Vec<VersionInfo>, ServiceError> {
        self.mediator
            .with_read_file(key, FileHistory::default(), |history: FileHistory| {
                Ok::<_, ServiceError>(history.versions())
            })
            .await
    }

    /// Take the effect of `version` out of the latest content, as a new version.
    pub async fn remove_edit(
        &self,
        key: &FileKey,
        version: u64,
        author: &str,
    ) -> Result<VersionInfo, ServiceError> {
        let config = &self.history_config;
        let corrector = &self.corrector;
        let result = self
            .mediator
            .with_write_file(key, FileHistory::default(), |mut history: FileHistory| {
                let info = history.remove_edit(version, author, corrector)?;
                history.compact(config)?;
                Ok::<_, ServiceError>((history, info))
            })
            .await;

        match result {
            Ok(receipt) => {
                log::info!("{key}: version {version} removed as version {}", receipt.value.version);
                Ok(receipt.value)
            }
            Err(e) => {
                log::warn!("{key}: removing version {version} failed: {e}");
                Err(e)
            }
        }
    }
}
