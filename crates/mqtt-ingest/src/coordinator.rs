// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record writes and failure classification.

use crate::backend::{Backend, BackendError};
use crate::record::NormalizedRecord;
use crate::route::DataModelTarget;
use std::sync::Arc;
use thiserror::Error;

/// Classified write failure.
#[derive(Debug, Error)]
pub enum WriteError {
    /// A referenced record is not stored yet. Recovered by buffering.
    #[error("'{id}' references a missing record: {detail}")]
    DependencyMissing { id: String, detail: String },

    /// Network, rate limit or server failure. Replayed through the overflow
    /// queue when it is enabled.
    #[error("'{id}' failed transiently: {source}")]
    Transient {
        id: String,
        #[source]
        source: BackendError,
    },

    /// The backend refused the record itself.
    #[error("'{id}' rejected: {reason}")]
    Fatal { id: String, reason: String },
}

impl WriteError {
    pub fn is_dependency_missing(&self) -> bool {
        matches!(self, WriteError::DependencyMissing { .. })
    }
}

/// Persists normalized records through a [`Backend`].
#[derive(Debug)]
pub struct WriteCoordinator<B> {
    backend: Arc<B>,
    dependency_markers: Vec<String>,
}

impl<B: Backend> WriteCoordinator<B> {
    /// `dependency_markers` are message fragments recognized as a missing
    /// reference when the backend error carries no structured kind.
    pub fn new(backend: Arc<B>, dependency_markers: Vec<String>) -> Self {
        Self {
            backend,
            dependency_markers,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Upsert one record into its route's collection.
    pub async fn write(
        &self,
        record: &NormalizedRecord,
        target: &DataModelTarget,
    ) -> Result<(), WriteError> {
        if record.id.is_empty() {
            return Err(WriteError::Fatal {
                id: String::new(),
                reason: "empty identity".into(),
            });
        }

        match self
            .backend
            .upsert(&target.collection, &record.id, &record.fields)
            .await
        {
            Ok(()) => {
                tracing::debug!("wrote {} {} into {}", record.kind, record.id, target.collection);
                Ok(())
            }
            Err(e) => {
                let err = self.classify(&record.id, e);
                match &err {
                    WriteError::DependencyMissing { detail, .. } => {
                        tracing::debug!("{} waits on a missing record: {}", record.id, detail);
                    }
                    WriteError::Transient { source, .. } => {
                        tracing::warn!(
                            "write to {} failed ({}): {}",
                            target.collection,
                            source,
                            record.to_json()
                        );
                    }
                    WriteError::Fatal { reason, .. } => {
                        tracing::error!(
                            "write to {} rejected ({}): {}",
                            target.collection,
                            reason,
                            record.to_json()
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// Classify a backend error. Structured kinds win; message markers are a
    /// fallback for backends that only report text.
    pub fn classify(&self, id: &str, error: BackendError) -> WriteError {
        match error {
            BackendError::DependencyMissing(detail) => WriteError::DependencyMissing {
                id: id.to_string(),
                detail,
            },
            BackendError::Rejected { status, message }
                if self
                    .dependency_markers
                    .iter()
                    .any(|m| message.contains(m.as_str())) =>
            {
                WriteError::DependencyMissing {
                    id: id.to_string(),
                    detail: format!("{} ({})", message, status),
                }
            }
            e if e.is_retryable() => WriteError::Transient {
                id: id.to_string(),
                source: e,
            },
            e => WriteError::Fatal {
                id: id.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CollectionRef, MemoryBackend};
    use crate::record::{Fields, RecordKind};

    fn target() -> DataModelTarget {
        DataModelTarget {
            collection: CollectionRef {
                schema_space: "s".into(),
                name: "AlarmFrame".into(),
                version: None,
                instance_space: "sp".into(),
            },
            kind: RecordKind::Frame,
            normalize_timestamps: false,
        }
    }

    fn record(id: &str) -> NormalizedRecord {
        NormalizedRecord {
            id: id.into(),
            kind: RecordKind::Frame,
            fields: Fields::new(),
        }
    }

    fn coordinator(backend: Arc<MemoryBackend>) -> WriteCoordinator<MemoryBackend> {
        WriteCoordinator::new(backend, vec!["does not exist".into()])
    }

    #[test]
    fn test_classification() {
        let c = coordinator(Arc::new(MemoryBackend::new()));
        assert!(c
            .classify("a", BackendError::DependencyMissing("x".into()))
            .is_dependency_missing());
        assert!(c
            .classify(
                "a",
                BackendError::Rejected {
                    status: 400,
                    message: "node sp:f1 does not exist".into()
                }
            )
            .is_dependency_missing());
        assert!(matches!(
            c.classify("a", BackendError::Transport("timeout".into())),
            WriteError::Transient { .. }
        ));
        assert!(matches!(
            c.classify(
                "a",
                BackendError::Rejected {
                    status: 429,
                    message: "slow down".into()
                }
            ),
            WriteError::Transient { .. }
        ));
        assert!(matches!(
            c.classify(
                "a",
                BackendError::Rejected {
                    status: 422,
                    message: "bad type".into()
                }
            ),
            WriteError::Fatal { .. }
        ));
    }

    #[tokio::test]
    async fn test_write_success_and_failure() {
        let backend = Arc::new(MemoryBackend::new());
        let c = coordinator(backend.clone());

        c.write(&record("f1"), &target()).await.expect("write");
        assert!(backend.record("AlarmFrame", "sp", "f1").is_some());

        backend.fail_next(BackendError::Transport("reset".into()));
        let err = c.write(&record("f2"), &target()).await.expect_err("fail");
        assert!(matches!(err, WriteError::Transient { .. }));

        let err = c.write(&record(""), &target()).await.expect_err("fatal");
        assert!(matches!(err, WriteError::Fatal { .. }));
    }
}
