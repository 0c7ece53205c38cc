use std::{
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use tokio::{
    sync::{watch, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use common::data::{format_size, UploadedFile};

use crate::transport::{FileApi, TransportError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Bookkeeping for one submitted file.
#[derive(Clone, Debug)]
pub struct EntryState {
    pub name: String,
    pub size_bytes: u64,
    pub progress: u8,
    pub status: UploadStatus,
    pub error: Option<String>,
    pub response: Option<UploadedFile>,
}

struct UploadEntry {
    state: Arc<Mutex<EntryState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    pub success: usize,
    pub error: usize,
}

/// Splits a free-text tag string on commas; entries are trimmed and empty
/// ones dropped. The result is shared by every file in a submission.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Multi-file upload bookkeeping. Each submitted file gets its own entry
/// and its own transport request; uploads run concurrently and unordered,
/// with no cap unless one is configured. One entry's failure never touches
/// its siblings.
pub struct UploadQueue<T: FileApi + 'static> {
    api: Arc<T>,
    max_upload_bytes: u64,
    limiter: Option<Arc<Semaphore>>,
    entries: Vec<UploadEntry>,
}

impl<T: FileApi + 'static> UploadQueue<T> {
    pub fn new(api: Arc<T>, max_upload_bytes: u64) -> Self {
        Self {
            api,
            max_upload_bytes,
            limiter: None,
            entries: Vec::new(),
        }
    }

    /// Caps the number of uploads in flight at once; submissions past the
    /// cap wait for a slot. The default is no cap at all.
    pub fn with_max_concurrency(mut self, cap: usize) -> Self {
        self.limiter = Some(Arc::new(Semaphore::new(cap.max(1))));
        self
    }

    /// Validates and dispatches every path at once. Must be called from
    /// within a tokio runtime.
    pub fn submit(&mut self, paths: Vec<PathBuf>, tags: &[String]) {
        for path in paths {
            self.submit_one(path, tags.to_vec());
        }
    }

    fn submit_one(&mut self, path: PathBuf, tags: Vec<String>) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        // size validation happens before any transport call
        let size_bytes = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.push_rejected(name, 0, e.to_string());
                return;
            }
        };
        if size_bytes > self.max_upload_bytes {
            let message = format!("File size exceeds {}", format_size(self.max_upload_bytes));
            self.push_rejected(name, size_bytes, message);
            return;
        }

        let state = Arc::new(Mutex::new(EntryState {
            name,
            size_bytes,
            progress: 0,
            status: UploadStatus::Pending,
            error: None,
            response: None,
        }));
        let cancel = CancellationToken::new();
        let (tx, mut rx) = watch::channel(0u8);

        let api = self.api.clone();
        let limiter = self.limiter.clone();
        let task_state = state.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let _permit = match &limiter {
                Some(sem) => match sem.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            if task_cancel.is_cancelled() {
                return;
            }
            task_state.lock().unwrap().status = UploadStatus::Uploading;

            let watch_state = task_state.clone();
            let watch_cancel = task_cancel.clone();
            let watcher = tokio::spawn(async move {
                while rx.changed().await.is_ok() {
                    // a removed entry sees no further progress
                    if watch_cancel.is_cancelled() {
                        break;
                    }
                    let progress = *rx.borrow_and_update();
                    watch_state.lock().unwrap().progress = progress;
                }
            });

            let result = api.upload(&path, &tags, tx, task_cancel.clone()).await;
            let _ = watcher.await;

            let mut entry = task_state.lock().unwrap();
            match result {
                Ok(response) => {
                    entry.progress = 100;
                    entry.status = UploadStatus::Success;
                    entry.response = Some(response);
                }
                Err(TransportError::Cancelled) => {
                    // the entry has been removed; nothing left to record
                }
                Err(e) => {
                    let message = match e {
                        TransportError::Status {
                            title: Some(title), ..
                        } => title,
                        other => other.to_string(),
                    };
                    entry.status = UploadStatus::Error;
                    entry.progress = 0;
                    entry.error = Some(if message.is_empty() {
                        "Upload failed".to_string()
                    } else {
                        message
                    });
                }
            }
        });

        self.entries.push(UploadEntry {
            state,
            cancel,
            task: Some(task),
        });
    }

    fn push_rejected(&mut self, name: String, size_bytes: u64, message: String) {
        self.entries.push(UploadEntry {
            state: Arc::new(Mutex::new(EntryState {
                name,
                size_bytes,
                progress: 0,
                status: UploadStatus::Error,
                error: Some(message),
                response: None,
            })),
            cancel: CancellationToken::new(),
            task: None,
        });
    }

    /// Cancels any in-flight request for the entry, then drops it. Returns
    /// false when the index is out of range.
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.entries.len() {
            return false;
        }
        let entry = self.entries.remove(index);
        entry.cancel.cancel();
        true
    }

    /// Drops every terminal entry, keeping pending and uploading ones.
    pub fn clear_completed(&mut self) {
        self.entries
            .retain(|entry| !entry.state.lock().unwrap().status.is_terminal());
    }

    /// True iff the queue is non-empty and every entry has settled.
    pub fn all_complete(&self) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|entry| entry.state.lock().unwrap().status.is_terminal())
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total: self.entries.len(),
            ..Default::default()
        };
        for entry in &self.entries {
            match entry.state.lock().unwrap().status {
                UploadStatus::Pending => stats.pending += 1,
                UploadStatus::Uploading => stats.uploading += 1,
                UploadStatus::Success => stats.success += 1,
                UploadStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    /// Point-in-time snapshot of every entry, in submission order.
    pub fn entries(&self) -> Vec<EntryState> {
        self.entries
            .iter()
            .map(|entry| entry.state.lock().unwrap().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Waits for every dispatched upload task to settle.
    pub async fn wait_idle(&mut self) {
        for entry in &mut self.entries {
            if let Some(task) = entry.task.take() {
                let _ = task.await;
            }
        }
    }

    #[cfg(test)]
    fn state_handle(&self, index: usize) -> Arc<Mutex<EntryState>> {
        self.entries[index].state.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use chrono::Utc;

    use common::payloads::{ListPage, ListQuery};

    use super::*;

    enum Behavior {
        Succeed,
        FailNamed(&'static str, &'static str),
        Stall,
    }

    struct StubApi {
        calls: AtomicUsize,
        behavior: Behavior,
    }

    impl StubApi {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                behavior,
            })
        }
    }

    fn uploaded(name: &str) -> UploadedFile {
        UploadedFile {
            id: format!("id-{name}"),
            key: format!("2024/{name}"),
            original_name: name.to_string(),
            size_bytes: 3,
            content_type: "text/plain".to_string(),
            checksum: String::new(),
            tags: Vec::new(),
            created_at_utc: Utc::now(),
            version: None,
        }
    }

    #[async_trait]
    impl FileApi for StubApi {
        async fn list(&self, _query: &ListQuery) -> Result<ListPage, TransportError> {
            Ok(ListPage::default())
        }

        async fn upload(
            &self,
            path: &Path,
            _tags: &[String],
            progress: watch::Sender<u8>,
            cancel: CancellationToken,
        ) -> Result<UploadedFile, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.file_name().unwrap().to_str().unwrap();
            match self.behavior {
                Behavior::Succeed => {
                    for step in [25u8, 50, 75, 100] {
                        let _ = progress.send(step);
                    }
                    Ok(uploaded(name))
                }
                Behavior::FailNamed(bad, title) => {
                    if name.contains(bad) {
                        Err(TransportError::Status {
                            code: 500,
                            title: Some(title.to_string()),
                        })
                    } else {
                        let _ = progress.send(100);
                        Ok(uploaded(name))
                    }
                }
                Behavior::Stall => {
                    let _ = progress.send(10);
                    cancel.cancelled().await;
                    // a cancelled upload must not surface more progress
                    let _ = progress.send(99);
                    Err(TransportError::Cancelled)
                }
            }
        }
    }

    fn temp_files(dir: &tempfile::TempDir, names: &[&str]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                let mut file = fs::File::create(&path).unwrap();
                file.write_all(b"abc").unwrap();
                path
            })
            .collect()
    }

    async fn settle(queue: &UploadQueue<StubApi>, predicate: impl Fn(&EntryState) -> bool) {
        for _ in 0..100 {
            if queue.entries().iter().any(|e| predicate(e)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue never reached the expected state");
    }

    #[tokio::test]
    async fn oversize_file_never_reaches_the_transport() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_files(&dir, &["big.bin"]);
        let api = StubApi::new(Behavior::Succeed);
        // 3-byte file against a 2-byte limit
        let mut queue = UploadQueue::new(api.clone(), 2);
        queue.submit(paths, &[]);
        queue.wait_idle().await;

        let entries = queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, UploadStatus::Error);
        assert!(entries[0].error.as_ref().unwrap().contains("exceeds"));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_file_is_rejected_without_a_call() {
        let api = StubApi::new(Behavior::Succeed);
        let mut queue = UploadQueue::new(api.clone(), 1024);
        queue.submit(vec![PathBuf::from("/no/such/file")], &[]);
        queue.wait_idle().await;

        assert_eq!(queue.entries()[0].status, UploadStatus::Error);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_settle_independently() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_files(&dir, &["a.txt", "b.txt", "c.txt"]);
        let api = StubApi::new(Behavior::Succeed);
        let mut queue = UploadQueue::new(api.clone(), 1024);
        queue.submit(paths, &["shared".to_string()]);
        queue.wait_idle().await;

        let entries = queue.entries();
        assert_eq!(entries.len(), 3);
        for entry in &entries {
            assert_eq!(entry.status, UploadStatus::Success);
            assert_eq!(entry.progress, 100);
            assert!(entry.response.is_some());
        }
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        assert!(queue.all_complete());
    }

    #[tokio::test]
    async fn one_failure_never_touches_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_files(&dir, &["good.txt", "bad.txt"]);
        let api = StubApi::new(Behavior::FailNamed("bad", "Upload rejected"));
        let mut queue = UploadQueue::new(api, 1024);
        queue.submit(paths, &[]);
        queue.wait_idle().await;

        let entries = queue.entries();
        assert_eq!(entries[0].status, UploadStatus::Success);
        assert_eq!(entries[1].status, UploadStatus::Error);
        // the server title wins over the generic transport text
        assert_eq!(entries[1].error.as_deref(), Some("Upload rejected"));
        assert_eq!(entries[1].progress, 0);
    }

    #[tokio::test]
    async fn removal_cancels_and_silences_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_files(&dir, &["slow.txt"]);
        let api = StubApi::new(Behavior::Stall);
        let mut queue = UploadQueue::new(api, 1024);
        queue.submit(paths, &[]);
        settle(&queue, |e| e.progress == 10).await;

        let state = queue.state_handle(0);
        assert!(queue.remove(0));
        assert!(queue.is_empty());
        assert!(!queue.remove(0));

        // give the stub time to fire its post-cancel progress event
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.lock().unwrap().progress, 10);
    }

    #[tokio::test]
    async fn clear_completed_keeps_active_entries() {
        let dir = tempfile::tempdir().unwrap();
        let done = temp_files(&dir, &["done.txt"]);
        let stalled = temp_files(&dir, &["stalled.txt"]);

        let fast = StubApi::new(Behavior::Succeed);
        let mut queue = UploadQueue::new(fast, 1024);
        queue.submit(done, &[]);
        queue.wait_idle().await;
        assert!(queue.all_complete());

        // swap in a stalling transport for the second submission
        let mut stalled_queue = UploadQueue::new(StubApi::new(Behavior::Stall), 1024);
        stalled_queue.submit(stalled, &[]);
        settle(&stalled_queue, |e| e.progress == 10).await;

        queue.clear_completed();
        assert!(queue.is_empty());
        stalled_queue.clear_completed();
        assert_eq!(stalled_queue.len(), 1);
        stalled_queue.remove(0);
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_files(&dir, &["a.txt", "bad.txt"]);
        let api = StubApi::new(Behavior::FailNamed("bad", "nope"));
        let mut queue = UploadQueue::new(api, 1024);
        queue.submit(paths, &[]);
        queue.wait_idle().await;

        let stats = queue.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.pending + stats.uploading, 0);
    }

    #[tokio::test]
    async fn concurrency_cap_still_finishes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let paths = temp_files(&dir, &["a.txt", "b.txt", "c.txt", "d.txt"]);
        let api = StubApi::new(Behavior::Succeed);
        let mut queue = UploadQueue::new(api.clone(), 1024).with_max_concurrency(2);
        queue.submit(paths, &[]);
        queue.wait_idle().await;

        assert!(queue.all_complete());
        assert_eq!(api.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn tag_parsing() {
        assert_eq!(parse_tags(" a, b ,, c "), vec!["a", "b", "c"]);
        assert!(parse_tags("").is_empty());
        assert!(parse_tags(" , ,").is_empty());
    }

    #[test]
    fn empty_queue_is_not_complete() {
        let api = StubApi::new(Behavior::Succeed);
        let queue = UploadQueue::new(api, 1024);
        assert!(!queue.all_complete());
    }
}
