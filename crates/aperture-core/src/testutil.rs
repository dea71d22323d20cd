//! In-memory collaborator fakes and a mock catalog server for tests.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use aperture_types::{ProcessKind, Result, UploadError};

use crate::collab::{
    CollectionsService, Connection, ConnectivityProbe, FilesDb, LocalSyncTracker, MediaExtractor,
    MediaUploadData,
};
use crate::config::{ConcurrencyConfig, HttpConfig, LockConfig, RetryConfig, UploadConfig};
use crate::events::EventBus;
use crate::model::{FileRecord, MediaKind};
use crate::queue::{StopSignal, Uploader, UploaderDeps};
use crate::store::StateStore;

/// Spin until `condition` holds or the timeout elapses. Returns whether
/// the condition was met.
pub fn wait_for(timeout: std::time::Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    condition()
}

pub fn file_record(local_id: &str, generated_id: i64, kind: MediaKind) -> FileRecord {
    let mut metadata = serde_json::Map::new();
    metadata.insert("title".into(), serde_json::Value::from(local_id));
    FileRecord {
        local_id: Some(local_id.to_string()),
        generated_id,
        title: Some(format!("{local_id}.jpg")),
        kind,
        collection_id: None,
        uploaded_file_id: None,
        owner_id: None,
        updation_time: None,
        encrypted_key: None,
        key_decryption_nonce: None,
        file_decryption_header: None,
        thumbnail_decryption_header: None,
        metadata_decryption_header: None,
        hash: None,
        metadata,
    }
}

// ---------------------------------------------------------------------------
// In-memory state store (shared by both "processes" in tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStateStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().unwrap().contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Files DB fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryFilesDb {
    rows: Mutex<Vec<FileRecord>>,
    pub deleted: Mutex<Vec<i64>>,
    pub invalidated: Mutex<Vec<i64>>,
    pub cross_collection_updates: Mutex<Vec<FileRecord>>,
}

impl MemoryFilesDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, record: FileRecord) {
        self.rows.lock().unwrap().push(record);
    }

    pub fn row(&self, generated_id: i64) -> Option<FileRecord> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.generated_id == generated_id)
            .cloned()
    }
}

impl FilesDb for MemoryFilesDb {
    fn get_file(&self, generated_id: i64) -> Result<Option<FileRecord>> {
        Ok(self.row(generated_id))
    }

    fn update(&self, file: &FileRecord) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows
            .iter_mut()
            .find(|r| r.generated_id == file.generated_id)
        {
            Some(row) => *row = file.clone(),
            None => rows.push(file.clone()),
        }
        Ok(())
    }

    fn delete_by_generated_id(&self, generated_id: i64) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .retain(|r| r.generated_id != generated_id);
        self.deleted.lock().unwrap().push(generated_id);
        Ok(())
    }

    fn uploaded_files_with_hashes(
        &self,
        hashes: &[String],
        kind: MediaKind,
        owner_id: i64,
    ) -> Result<Vec<FileRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.has_remote_id()
                    && r.kind == kind
                    && r.owner_id == Some(owner_id)
                    && r.hash.as_ref().is_some_and(|h| hashes.contains(h))
            })
            .cloned()
            .collect())
    }

    fn update_uploaded_file_across_collections(&self, file: &FileRecord) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows
            .iter_mut()
            .filter(|r| r.uploaded_file_id == file.uploaded_file_id)
        {
            row.updation_time = file.updation_time;
            row.file_decryption_header = file.file_decryption_header.clone();
            row.thumbnail_decryption_header = file.thumbnail_decryption_header.clone();
            row.metadata_decryption_header = file.metadata_decryption_header.clone();
        }
        self.cross_collection_updates
            .lock()
            .unwrap()
            .push(file.clone());
        Ok(())
    }

    fn mark_invalid(&self, generated_id: i64) -> Result<()> {
        self.invalidated.lock().unwrap().push(generated_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collections fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCollections {
    /// (collection, remote id) per add_to_collection call.
    pub added: Mutex<Vec<(i64, i64)>>,
    /// (collection, candidate generated id, existing remote id) per link.
    pub linked: Mutex<Vec<(i64, i64, i64)>>,
    pub fail_add: AtomicBool,
}

impl FakeCollections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(collection_id: i64) -> [u8; 32] {
        let mut key = [0u8; 32];
        key[0] = (collection_id % 251) as u8;
        key[1] = 0x5a;
        key
    }
}

impl CollectionsService for FakeCollections {
    fn collection_key(&self, collection_id: i64) -> Result<[u8; 32]> {
        Ok(Self::key_for(collection_id))
    }

    fn add_to_collection(&self, collection_id: i64, file: &FileRecord) -> Result<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(UploadError::Other("add_to_collection failed".into()));
        }
        self.added
            .lock()
            .unwrap()
            .push((collection_id, file.uploaded_file_id.unwrap_or(-1)));
        Ok(())
    }

    fn link_to_existing_uploaded_file(
        &self,
        collection_id: i64,
        candidate: &FileRecord,
        existing: &FileRecord,
    ) -> Result<()> {
        self.linked.lock().unwrap().push((
            collection_id,
            candidate.generated_id,
            existing.uploaded_file_id.unwrap_or(-1),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Extractor, connectivity, tracker fakes
// ---------------------------------------------------------------------------

pub struct FakeExtractor {
    dir: PathBuf,
    pub invalid: AtomicBool,
    /// When set, every extraction blocks until the channel yields or
    /// disconnects. Lets tests hold workers in-flight.
    gate: Mutex<Option<crossbeam_channel::Receiver<()>>>,
    pub hashes: Mutex<HashMap<String, String>>,
    pub temporary_copy: AtomicBool,
    pub shared_sandbox_copy: AtomicBool,
    pub deleted_on_device: AtomicBool,
}

impl FakeExtractor {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            invalid: AtomicBool::new(false),
            gate: Mutex::new(None),
            hashes: Mutex::new(HashMap::new()),
            temporary_copy: AtomicBool::new(false),
            shared_sandbox_copy: AtomicBool::new(false),
            deleted_on_device: AtomicBool::new(false),
        }
    }

    pub fn set_gate(&self, rx: crossbeam_channel::Receiver<()>) {
        *self.gate.lock().unwrap() = Some(rx);
    }

    pub fn set_hash(&self, local_id: &str, hash: &str) {
        self.hashes
            .lock()
            .unwrap()
            .insert(local_id.to_string(), hash.to_string());
    }
}

impl MediaExtractor for FakeExtractor {
    fn media_upload_data(&self, file: &FileRecord) -> Result<MediaUploadData> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        if self.invalid.load(Ordering::SeqCst) {
            return Err(UploadError::InvalidFile("unreadable asset".into()));
        }
        let local_id = file.local_id.clone().unwrap_or_default();
        std::fs::create_dir_all(&self.dir)?;
        let source_path = self.dir.join(format!("{local_id}.src"));
        if !source_path.exists() {
            std::fs::write(&source_path, format!("source-bytes-{local_id}"))?;
        }
        Ok(MediaUploadData {
            source_path,
            thumbnail: vec![0xAB; 64],
            file_hash: self.hashes.lock().unwrap().get(&local_id).cloned(),
            zip_hash: None,
            is_deleted: self.deleted_on_device.load(Ordering::SeqCst),
            temporary_copy: self.temporary_copy.load(Ordering::SeqCst),
            shared_sandbox_copy: self.shared_sandbox_copy.load(Ordering::SeqCst),
        })
    }
}

pub struct FakeConnectivity {
    current: Mutex<Connection>,
}

impl FakeConnectivity {
    pub fn wifi() -> Self {
        Self {
            current: Mutex::new(Connection::Wifi),
        }
    }

    pub fn set(&self, connection: Connection) {
        *self.current.lock().unwrap() = connection;
    }
}

impl ConnectivityProbe for FakeConnectivity {
    fn current(&self) -> Connection {
        *self.current.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakeTracker {
    pub invalid: Mutex<Vec<String>>,
}

impl LocalSyncTracker for FakeTracker {
    fn record_invalid_file(&self, local_id: &str) {
        self.invalid.lock().unwrap().push(local_id.to_string());
    }
}

// ---------------------------------------------------------------------------
// Mock catalog + object-store server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body is not JSON")
    }
}

/// One server standing in for the catalog service and the object store:
/// refills hand out presigned URLs pointing back at itself.
pub struct ApiServer {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    /// Status for `GET /files/upload-urls`; flip to 402/426 to simulate
    /// plan errors.
    pub refill_status: Arc<AtomicU16>,
    /// Status for `POST /files`.
    pub create_status: Arc<AtomicU16>,
    next_remote_id: Arc<AtomicI64>,
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ApiServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let refill_status = Arc::new(AtomicU16::new(200));
        let create_status = Arc::new(AtomicU16::new(200));
        let next_remote_id = Arc::new(AtomicI64::new(1000));
        let stop = Arc::new(AtomicBool::new(false));

        let ctx = (
            Arc::clone(&requests),
            Arc::clone(&refill_status),
            Arc::clone(&create_status),
            Arc::clone(&next_remote_id),
            Arc::clone(&stop),
            url.clone(),
        );
        let handle = std::thread::spawn(move || {
            let (requests, refill_status, create_status, next_remote_id, stop, url) = ctx;
            for stream in listener.incoming() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { break };
                let Some(req) = read_request(&stream) else {
                    continue;
                };
                let (status, body) = route(
                    &req,
                    &url,
                    &refill_status,
                    &create_status,
                    &next_remote_id,
                );
                requests.lock().unwrap().push(req);
                write_response(&stream, status, &body);
            }
        });

        Self {
            url,
            requests,
            refill_status,
            create_status,
            next_remote_id,
            stop,
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_matching(&self, method: &str, path_prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(path_prefix))
            .collect()
    }

    pub fn last_assigned_remote_id(&self) -> i64 {
        self.next_remote_id.load(Ordering::SeqCst) - 1
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let addr = self.url.trim_start_matches("http://").to_string();
        let _ = TcpStream::connect(addr);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn route(
    req: &RecordedRequest,
    url: &str,
    refill_status: &AtomicU16,
    create_status: &AtomicU16,
    next_remote_id: &AtomicI64,
) -> (u16, String) {
    if req.path.starts_with("/files/upload-urls") {
        let status = refill_status.load(Ordering::SeqCst);
        if status != 200 {
            return (status, "{}".into());
        }
        let count: usize = req
            .path
            .split("count=")
            .nth(1)
            .and_then(|c| c.parse().ok())
            .unwrap_or(1);
        let slot_base = next_remote_id.load(Ordering::SeqCst) * 100;
        let urls: Vec<String> = (0..count)
            .map(|i| {
                let slot = slot_base + i as i64;
                format!(r#"{{"objectKey":"obj-{slot}","url":"{url}/put/{slot}"}}"#)
            })
            .collect();
        (200, format!(r#"{{"urls":[{}]}}"#, urls.join(",")))
    } else if req.method == "PUT" && req.path.starts_with("/put/") {
        (200, "{}".into())
    } else if req.method == "POST" && req.path == "/files" {
        let status = create_status.load(Ordering::SeqCst);
        if status != 200 {
            return (status, "{}".into());
        }
        let id = next_remote_id.fetch_add(1, Ordering::SeqCst);
        (
            200,
            format!(r#"{{"id":{id},"updationTime":1712000000000000,"ownerID":5}}"#),
        )
    } else if req.method == "PUT" && req.path == "/files/update" {
        let id = req.body_json()["id"].as_i64().unwrap_or(0);
        (
            200,
            format!(r#"{{"id":{id},"updationTime":1712000000999999}}"#),
        )
    } else {
        (404, "{}".into())
    }
}

fn read_request(stream: &TcpStream) -> Option<RecordedRequest> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).ok()?;
    }
    Some(RecordedRequest { method, path, body })
}

fn write_response(stream: &TcpStream, status: u16, body: &str) {
    let reason = match status {
        200 => "OK",
        402 => "Payment Required",
        413 => "Payload Too Large",
        426 => "Upgrade Required",
        _ => "Response",
    };
    let payload = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    let mut stream = stream;
    let _ = stream.write_all(payload.as_bytes());
    let _ = stream.flush();
}

// ---------------------------------------------------------------------------
// Full-engine fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub api: ApiServer,
    pub store: Arc<MemoryStateStore>,
    pub db: Arc<MemoryFilesDb>,
    pub collections: Arc<FakeCollections>,
    pub extractor: Arc<FakeExtractor>,
    pub connectivity: Arc<FakeConnectivity>,
    pub tracker: Arc<FakeTracker>,
    pub events: Arc<EventBus>,
    pub stop: StopSignal,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let api = ApiServer::start();
        Self {
            store: Arc::new(MemoryStateStore::new()),
            db: Arc::new(MemoryFilesDb::new()),
            collections: Arc::new(FakeCollections::new()),
            extractor: Arc::new(FakeExtractor::new(dir.path().join("sources"))),
            connectivity: Arc::new(FakeConnectivity::wifi()),
            tracker: Arc::new(FakeTracker::default()),
            events: Arc::new(EventBus::new()),
            stop: StopSignal::new(),
            api,
            dir,
        }
    }

    pub fn config(&self) -> UploadConfig {
        UploadConfig {
            endpoint: self.api.url.clone(),
            auth_token: "test-token".into(),
            user_id: 5,
            temp_dir: self.dir.path().join("tmp"),
            state_dir: self.dir.path().join("state"),
            allow_mobile_uploads: false,
            concurrency: ConcurrencyConfig::default(),
            http: HttpConfig::default(),
            retry: RetryConfig {
                max_attempts: 4,
                backoff_ms: 1,
            },
            locks: LockConfig::default(),
            liaison_poll_ms: 50,
            upload_deadline_secs: 3000,
        }
    }

    pub fn uploader(&self, process: ProcessKind) -> Uploader {
        Uploader::init(self.config(), process, self.deps()).unwrap()
    }

    pub fn deps(&self) -> UploaderDeps {
        UploaderDeps {
            store: Arc::clone(&self.store) as Arc<dyn StateStore>,
            db: Arc::clone(&self.db) as Arc<dyn FilesDb>,
            collections: Arc::clone(&self.collections) as Arc<dyn CollectionsService>,
            media: Arc::clone(&self.extractor) as Arc<dyn MediaExtractor>,
            connectivity: Arc::clone(&self.connectivity) as Arc<dyn ConnectivityProbe>,
            tracker: Arc::clone(&self.tracker) as Arc<dyn LocalSyncTracker>,
            crypto: Arc::new(crate::crypto::ChaCha20Poly1305Engine),
            events: Arc::clone(&self.events),
            sync_stop: self.stop.clone(),
        }
    }

    /// A bare worker environment for driving `try_to_upload` directly.
    pub fn worker_env(&self, process: ProcessKind) -> crate::worker::WorkerEnv {
        let cfg = self.config();
        let agent = aperture_remote::build_agent(&cfg.http);
        let pool =
            aperture_remote::url_pool::UrlPool::new(agent.clone(), &cfg.endpoint, &cfg.auth_token);
        pool.set_queue_size(1);
        crate::worker::WorkerEnv {
            locks: crate::lock::LockStore::new(
                Arc::clone(&self.store) as Arc<dyn StateStore>
            ),
            db: Arc::clone(&self.db) as Arc<dyn FilesDb>,
            collections: Arc::clone(&self.collections) as Arc<dyn CollectionsService>,
            media: Arc::clone(&self.extractor) as Arc<dyn MediaExtractor>,
            connectivity: Arc::clone(&self.connectivity) as Arc<dyn ConnectivityProbe>,
            tracker: Arc::clone(&self.tracker) as Arc<dyn LocalSyncTracker>,
            crypto: Arc::new(crate::crypto::ChaCha20Poly1305Engine),
            events: Arc::clone(&self.events),
            sync_stop: self.stop.clone(),
            blobs: aperture_remote::blob::BlobPutter::new(agent.clone(), cfg.retry.max_attempts),
            catalog: aperture_remote::catalog::CatalogClient::new(
                agent,
                &cfg.endpoint,
                &cfg.auth_token,
                cfg.retry.clone(),
            ),
            pool,
            process,
            cfg,
        }
    }

    /// Remaining files in the temp dir (encrypted artifacts should be gone
    /// after cleanup).
    pub fn temp_artifacts(&self) -> Vec<String> {
        let dir = self.dir.path().join("tmp");
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
