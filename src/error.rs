use std::{io, path::PathBuf};
use thiserror::Error;

use crate::deploy::DeployPhase;

#[derive(Debug, Error)]
pub enum ModError {
    #[error("environment error: {message} ({path:?})")]
    Environment {
        message: String,
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },
    #[error("extraction failed for {archive:?}: {message}")]
    Extraction {
        archive: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("invalid manifest in {folder:?}: {message}")]
    Manifest {
        folder: PathBuf,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("deployment failed while {phase}: {message} ({} mod(s) deployed)", deployed.len())]
    Deployment {
        phase: DeployPhase,
        message: String,
        deployed: Vec<String>,
        #[source]
        source: Option<io::Error>,
    },
    #[error("profile '{name}': {message}")]
    Profile {
        name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("mod not found: {0}")]
    NotFound(String),
    #[error("operation cancelled while {phase}")]
    Cancelled {
        phase: String,
        deployed: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, ModError>;

impl ModError {
    pub fn environment(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Environment {
            message: message.into(),
            path: path.into(),
            source: None,
        }
    }

    pub fn extraction(archive: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Extraction {
            archive: archive.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn extraction_source<E>(
        archive: impl Into<PathBuf>,
        message: impl Into<String>,
        source: E,
    ) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Extraction {
            archive: archive.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn manifest(folder: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            folder: folder.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn manifest_source<E>(folder: impl Into<PathBuf>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Manifest {
            folder: folder.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn profile(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Profile {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn profile_source<E>(name: impl Into<String>, message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Profile {
            name: name.into(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ModError::NotFound(_))
    }
}
