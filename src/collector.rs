use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::{
    fs,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    types::{ObservedResponse, Observation, ResourceError, SaveReport},
    utils::{file_name_from_url, is_image_response},
};

/// Receives every network response of a run. Holds the seen-url set and the
/// sending half of the save queue; clones share both.
#[derive(Clone)]
pub struct ResponseCollector {
    seen: Arc<Mutex<HashSet<String>>>,
    tx: Arc<Mutex<Option<UnboundedSender<ObservedResponse>>>>,
}

impl ResponseCollector {
    pub fn new() -> (Self, UnboundedReceiver<ObservedResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ResponseCollector {
                seen: Arc::new(Mutex::new(HashSet::new())),
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deduplicates by url, classifies, and queues image responses for saving.
    /// `fetch_body` is only called for first-seen images.
    pub fn observe<F>(&self, url: &str, content_type: Option<&str>, fetch_body: F) -> Observation
    where
        F: FnOnce() -> Result<Vec<u8>, ResourceError>,
    {
        // the url is claimed before any body work so overlapping events can't both save it
        let first_seen = self
            .seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(url.to_string());
        if !first_seen {
            return Observation::Duplicate;
        }

        if !is_image_response(url, content_type) {
            return Observation::NotImage;
        }

        let record = ObservedResponse {
            url: url.to_string(),
            content_type: content_type.map(String::from),
            body: fetch_body(),
        };

        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        match tx.as_ref() {
            Some(tx) => match tx.send(record) {
                Ok(_) => Observation::Queued,
                Err(_) => Observation::Closed,
            },
            None => {
                debug!("collector closed, dropping {}", url);
                Observation::Closed
            }
        }
    }

    /// Stops accepting responses; workers finish once the queue is drained.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|p| p.into_inner()).take();
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub async fn save_resource(out_dir: &Path, record: ObservedResponse) -> Result<PathBuf, ResourceError> {
    let body = record.body?;
    let path = out_dir.join(file_name_from_url(&record.url));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ResourceError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    fs::write(&path, body)
        .await
        .map_err(|source| ResourceError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Consumes the save queue with up to `workers` concurrent writes. The handle
/// resolves once every sender is gone and the queue is empty.
pub fn spawn_save_workers(
    rx: UnboundedReceiver<ObservedResponse>,
    out_dir: PathBuf,
    workers: usize,
    resource_timeout: Duration,
) -> JoinHandle<SaveReport> {
    let saved = Arc::new(tokio::sync::Mutex::new(HashSet::new()));
    let failed = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        let saved_w = saved.clone();
        let failed_w = failed.clone();
        UnboundedReceiverStream::new(rx)
            .for_each_concurrent(workers.max(1), |record| {
                let saved = saved_w.clone();
                let failed = failed_w.clone();
                let out_dir = out_dir.clone();

                async move {
                    let url = record.url.clone();
                    let content_type = record.content_type.clone();
                    let outcome = match timeout(resource_timeout, save_resource(&out_dir, record)).await {
                        Ok(r) => r,
                        Err(_) => Err(ResourceError::Timeout(resource_timeout.as_secs())),
                    };
                    match outcome {
                        Ok(path) => {
                            debug!(
                                "saved {} ({}) to {:?}",
                                url,
                                content_type.as_deref().unwrap_or("no content-type"),
                                path
                            );
                            saved.lock().await.insert(path);
                        }
                        Err(e) => {
                            match &e {
                                ResourceError::Write { .. } => warn!("could not save {}: {}", url, e),
                                _ => debug!("skipping {}: {}", url, e),
                            }
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
            .await;

        let saved = std::mem::take(&mut *saved.lock().await);
        SaveReport {
            saved,
            failed: failed.load(Ordering::SeqCst),
        }
    })
}
