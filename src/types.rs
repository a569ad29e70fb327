use std::path::PathBuf;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("invalid_url: {url} ({reason})")]
    InvalidUrl { url: String, reason: String },
}

/// Failure to persist a single observed resource. Never fatal to a run.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("body_unavailable: {0}")]
    BodyUnavailable(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// The (start url, output directory) pair a run works on.
#[derive(Debug, Clone)]
pub struct CaptureTarget {
    start_url: Url,
    out_dir: PathBuf,
}

impl CaptureTarget {
    pub fn new(start_url: &str, out_dir: impl Into<PathBuf>) -> Result<Self, CaptureError> {
        let parsed = Url::parse(start_url).map_err(|e| CaptureError::InvalidUrl {
            url: start_url.into(),
            reason: e.to_string(),
        })?;
        Ok(CaptureTarget {
            start_url: parsed,
            out_dir: out_dir.into(),
        })
    }

    pub fn start_url(&self) -> &Url {
        &self.start_url
    }

    pub fn out_dir(&self) -> &PathBuf {
        &self.out_dir
    }
}

/// One network response that passed dedup and image classification.
#[derive(Debug)]
pub struct ObservedResponse {
    pub url: String,
    pub content_type: Option<String>,
    pub body: Result<Vec<u8>, ResourceError>,
}

/// What the collector did with a response event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Duplicate,
    NotImage,
    Queued,
    Closed,
}

#[derive(Debug, Default)]
pub struct SaveReport {
    pub saved: std::collections::HashSet<PathBuf>,
    pub failed: usize,
}
