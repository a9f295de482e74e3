use async_trait::async_trait;
use futures::future::BoxFuture;
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

// Constants
const API_BASE: &str = "https://filehaven.io/api";
const SESSION_COOKIE: &str = "sess";
const UPLOAD_ACK_BODY: &str = "d";
const MIN_HASH_LEN: usize = 6;
const NETWORK_TIMEOUT: Duration = Duration::from_secs(300);

// --- ERROR HANDLING ---

#[derive(Debug, thiserror::Error)]
pub enum HavenError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("folder creation failed: {0}")]
    FolderCreate(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("local traversal error: {0}")]
    Traversal(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HavenError>;

// --- CONFIG ---

/// Username/password pair sent with every folder-creation request.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Persisted settings, matching the on-disk JSON layout field for field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "BaseFolderHash")]
    pub base_folder_hash: String,
    #[serde(rename = "FolderKey")]
    pub folder_key: String,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HavenError::Configuration(format!("cannot read settings file {}: {e}", path.display()))
        })?;
        let settings: Settings = serde_json::from_str(&raw)
            .map_err(|e| HavenError::Configuration(format!("invalid settings file: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("Username", &self.username),
            ("Password", &self.password),
            ("BaseFolderHash", &self.base_folder_hash),
            ("FolderKey", &self.folder_key),
        ] {
            if value.trim().is_empty() {
                return Err(HavenError::Configuration(format!("{field} is not set")));
            }
        }
        Ok(())
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// The pre-configured base folder all uploads land under.
    pub fn base_folder(&self) -> RemoteFolder {
        RemoteFolder {
            hash: self.base_folder_hash.clone(),
            add_key: Some(self.folder_key.clone()),
            edit_key: None,
        }
    }
}

// --- DATA MODEL ---

/// Access flag attached to newly created folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessType {
    #[default]
    Link,
    Private,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Link => "LINK",
            AccessType::Private => "PRIVATE",
        }
    }
}

/// A folder on the service: its share hash plus the authorization keys
/// returned at creation time. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub hash: String,
    pub add_key: Option<String>,
    pub edit_key: Option<String>,
}

impl RemoteFolder {
    /// Key to present when uploading into this folder. The add key wins;
    /// folders created with only an edit key fall back to it.
    pub fn upload_key(&self) -> Option<&str> {
        self.add_key.as_deref().or(self.edit_key.as_deref())
    }
}

/// One row of a folder listing.
#[derive(Deserialize, Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub hash: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "folder")]
    pub is_folder: bool,
}

/// Successful upload outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadAck {
    Acknowledged,
    HashReturned(String),
}

/// Raw upload response, classified. The service answers with the literal
/// "d", an alphanumeric content hash, or garbage (HTML, empty body, JSON
/// carrying an error field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Acknowledged,
    HashReturned(String),
    Malformed(String),
    HttpError(u16),
}

pub fn classify_upload_response(status: u16, body: &str) -> UploadOutcome {
    if !(200..300).contains(&status) {
        return UploadOutcome::HttpError(status);
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return UploadOutcome::Malformed(String::new());
    }
    if trimmed == UPLOAD_ACK_BODY {
        return UploadOutcome::Acknowledged;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.get("error").is_some() {
            return UploadOutcome::Malformed(snippet(trimmed));
        }
    }
    if trimmed.len() >= MIN_HASH_LEN && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        return UploadOutcome::HashReturned(trimmed.to_string());
    }
    UploadOutcome::Malformed(snippet(trimmed))
}

fn snippet(body: &str) -> String {
    let mut out: String = body.chars().take(120).collect();
    if out.len() < body.len() {
        out.push('…');
    }
    out
}

/// Parses the semicolon-delimited `key=value` text the login endpoint
/// answers with.
pub fn parse_login_fields(body: &str) -> HashMap<String, String> {
    body.trim()
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Session token plus the account's base folder, as reported by login.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub session: String,
    pub base: RemoteFolder,
}

#[derive(Deserialize, Debug)]
struct CreateFolderResponse {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    add_key: Option<String>,
    #[serde(default)]
    edit_key: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

// --- THE CLIENT ---

/// Remote operations the upload engine consumes. Kept narrow so tests can
/// script a stand-in service.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_folder(
        &self,
        name: &str,
        parent_hash: &str,
        access: AccessType,
        creds: &Credentials,
    ) -> Result<RemoteFolder>;

    async fn upload_file(
        &self,
        local_path: &Path,
        folder_hash: &str,
        key: &str,
        want_hash: bool,
    ) -> Result<UploadAck>;
}

pub struct HavenClient {
    client: Client,
    base_url: String,
    session: Option<String>,
}

impl HavenClient {
    pub fn new() -> Self {
        Self::with_base_url(API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(NETWORK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            session: None,
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.get(url);
        if let Some(sess) = &self.session {
            request = request.header(reqwest::header::COOKIE, format!("{SESSION_COOKIE}={sess}"));
        }
        request
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.post(url);
        if let Some(sess) = &self.session {
            request = request.header(reqwest::header::COOKIE, format!("{SESSION_COOKIE}={sess}"));
        }
        request
    }

    // --- Authentication ---

    /// Logs in and remembers the session token. The response body is a
    /// semicolon-delimited `key=value` string carrying the token and the
    /// account's base folder identity.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<LoginSession> {
        let url = self.api_url("login");
        let params = [("user", username), ("pass", password)];

        let response = self.client.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HavenError::Api(format!("login failed with HTTP {status}")));
        }

        let fields = parse_login_fields(&body);
        let session = fields
            .get("session")
            .cloned()
            .ok_or_else(|| HavenError::Api("login response missing session token".to_string()))?;
        let hash = fields
            .get("folder")
            .cloned()
            .ok_or_else(|| HavenError::Api("login response missing base folder".to_string()))?;
        let key = fields
            .get("key")
            .cloned()
            .ok_or_else(|| HavenError::Api("login response missing folder key".to_string()))?;

        debug!("logged in, base folder {hash}");
        self.session = Some(session.clone());
        Ok(LoginSession {
            session,
            base: RemoteFolder {
                hash,
                add_key: Some(key),
                edit_key: None,
            },
        })
    }

    // --- Core Operations ---

    pub async fn list_folder(
        &self,
        folder_hash: &str,
        include_subfolders: bool,
    ) -> Result<Vec<RemoteEntry>> {
        let url = self.api_url("folder/list");
        let sub = if include_subfolders { "1" } else { "0" };
        let params = [("folder", folder_hash), ("sub", sub)];

        let response = self.get(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HavenError::Api(format!("list failed with HTTP {status}")));
        }

        serde_json::from_str(&body)
            .map_err(|e| HavenError::Api(format!("malformed listing response: {e}")))
    }
}

impl Default for HavenClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteApi for HavenClient {
    async fn create_folder(
        &self,
        name: &str,
        parent_hash: &str,
        access: AccessType,
        creds: &Credentials,
    ) -> Result<RemoteFolder> {
        let url = self.api_url("folder/create");
        let params = [
            ("user", creds.username.as_str()),
            ("pass", creds.password.as_str()),
            ("name", name),
            ("parent", parent_hash),
            ("access", access.as_str()),
        ];

        debug!("creating remote folder {name} under {parent_hash}");
        let response = self.post(&url).query(&params).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(HavenError::FolderCreate(format!("HTTP {status} for {name}")));
        }

        let parsed: CreateFolderResponse = serde_json::from_str(&body).map_err(|_| {
            HavenError::FolderCreate(format!("malformed response: {}", snippet(&body)))
        })?;
        if let Some(error) = parsed.error {
            return Err(HavenError::FolderCreate(error));
        }
        let hash = parsed
            .hash
            .ok_or_else(|| HavenError::FolderCreate("response missing folder hash".to_string()))?;
        if parsed.add_key.is_none() && parsed.edit_key.is_none() {
            return Err(HavenError::FolderCreate(
                "response missing authorization keys".to_string(),
            ));
        }

        Ok(RemoteFolder {
            hash,
            add_key: parsed.add_key,
            edit_key: parsed.edit_key,
        })
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        folder_hash: &str,
        key: &str,
        want_hash: bool,
    ) -> Result<UploadAck> {
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                HavenError::Upload(format!("invalid filename: {}", local_path.display()))
            })?
            .to_string();

        // Stream the body rather than reading the whole file into memory.
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| HavenError::Upload(format!("cannot read {}: {e}", local_path.display())))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| HavenError::Upload(format!("cannot stat {}: {e}", local_path.display())))?
            .len();

        let stream = tokio_util::io::ReaderStream::new(file);
        let body = reqwest::Body::wrap_stream(stream);
        let part = multipart::Part::stream_with_length(body, file_size)
            .file_name(filename)
            .mime_str("application/octet-stream")
            .map_err(|e| HavenError::Upload(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        let url = self.api_url("upload");
        let mut params = vec![
            ("folder", folder_hash.to_string()),
            ("key", key.to_string()),
        ];
        if want_hash {
            params.push(("hash", "1".to_string()));
        }

        debug!("uploading {} into {folder_hash}", local_path.display());
        let response = self.post(&url).query(&params).multipart(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        match classify_upload_response(status, &body) {
            UploadOutcome::Acknowledged => Ok(UploadAck::Acknowledged),
            UploadOutcome::HashReturned(hash) => Ok(UploadAck::HashReturned(hash)),
            UploadOutcome::HttpError(code) => Err(HavenError::Upload(format!(
                "HTTP {} for {}",
                StatusCode::from_u16(code)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| code.to_string()),
                local_path.display()
            ))),
            UploadOutcome::Malformed(raw) => Err(HavenError::Upload(format!(
                "unrecognized response for {}: {raw:?}",
                local_path.display()
            ))),
        }
    }
}

// --- PROGRESS ---

/// One progress update. `finished` is raised exactly once per tracked
/// operation, on every path including failure and cancellation, so a
/// presentation layer can retire its display resource.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub activity: String,
    pub total: u64,
    pub completed: u64,
    pub elapsed: Duration,
    pub finished: bool,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink that discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

// --- PATH MAPPER ---

/// Local directory → remote folder cache for one upload run. Entries are
/// written only when creation succeeds and never evicted mid-run, so every
/// uploaded file's ancestor chain stays resolvable without extra round
/// trips.
#[derive(Debug, Default)]
pub struct PathMapper {
    entries: HashMap<PathBuf, RemoteFolder>,
}

impl PathMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.entries.contains_key(dir)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the remote folder `dir` uploads into, creating it on first
    /// visit. A cache hit costs no network round trip. Creation failures
    /// propagate unmodified and leave the cache untouched.
    pub async fn resolve(
        &mut self,
        dir: &Path,
        parent: &RemoteFolder,
        access: AccessType,
        creds: &Credentials,
        remote: &dyn RemoteApi,
    ) -> Result<RemoteFolder> {
        if let Some(found) = self.entries.get(dir) {
            return Ok(found.clone());
        }

        let name = dir.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            HavenError::Traversal(format!("unusable directory name: {}", dir.display()))
        })?;

        let folder = remote.create_folder(name, &parent.hash, access, creds).await?;
        self.entries.insert(dir.to_path_buf(), folder.clone());
        Ok(folder)
    }
}

// --- RESULT AGGREGATION ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    FolderCreate,
    Upload,
    Traversal,
}

#[derive(Debug, Clone)]
pub struct UploadFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

/// Aggregate outcome of one engine invocation. Partial success is reported
/// in full, never swallowed.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub attempted: u64,
    pub succeeded: u64,
    /// (local path, returned content hash), filled only when hash tracking
    /// was requested and the service answered with a hash.
    pub uploaded: Vec<(PathBuf, String)>,
    pub failures: Vec<UploadFailure>,
    pub cancelled: bool,
}

impl UploadReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled && self.attempted == self.succeeded
    }

    pub fn merge(&mut self, other: UploadReport) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.uploaded.extend(other.uploaded);
        self.failures.extend(other.failures);
        self.cancelled |= other.cancelled;
    }
}

// --- THE ENGINE ---

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub want_hashes: bool,
    pub access: AccessType,
    pub cancel: Option<CancellationToken>,
}

impl UploadOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|token| token.is_cancelled())
    }
}

struct RunState<'m> {
    mapper: &'m mut PathMapper,
    report: UploadReport,
    total: u64,
    done: u64,
    started: Instant,
}

/// Walks a local directory tree depth-first, mirroring its structure on the
/// service and uploading every regular file. Strictly sequential: one
/// network operation in flight at a time.
pub struct FolderUploadEngine<'a> {
    remote: &'a dyn RemoteApi,
    progress: &'a dyn ProgressSink,
}

impl<'a> FolderUploadEngine<'a> {
    pub fn new(remote: &'a dyn RemoteApi, progress: &'a dyn ProgressSink) -> Self {
        Self { remote, progress }
    }

    /// Uploads a single file into a known folder. No folder creation, no
    /// path mapping: the supplied hash and key are used directly.
    pub async fn upload_single_file(
        &self,
        local_path: &Path,
        folder_hash: &str,
        key: &str,
        want_hash: bool,
    ) -> Result<UploadReport> {
        let started = Instant::now();
        let mut report = UploadReport::default();
        let label = display_name(local_path);

        if local_path.is_file() {
            report.attempted = 1;
            match self
                .remote
                .upload_file(local_path, folder_hash, key, want_hash)
                .await
            {
                Ok(ack) => {
                    report.succeeded = 1;
                    if let UploadAck::HashReturned(hash) = ack {
                        if want_hash {
                            report.uploaded.push((local_path.to_path_buf(), hash));
                        }
                    }
                }
                Err(err) => {
                    warn!("upload of {} failed: {err}", local_path.display());
                    report.failures.push(UploadFailure {
                        path: local_path.to_path_buf(),
                        kind: failure_kind_for(&err),
                        message: err.to_string(),
                    });
                }
            }
        } else {
            report.failures.push(UploadFailure {
                path: local_path.to_path_buf(),
                kind: FailureKind::Traversal,
                message: "not a readable file".to_string(),
            });
        }

        self.progress.emit(ProgressEvent {
            activity: label,
            total: 1,
            completed: 1,
            elapsed: started.elapsed(),
            finished: true,
        });
        Ok(report)
    }

    /// Mirrors `local_root` under `base` with a fresh path cache.
    pub async fn upload_folder(
        &self,
        local_root: &Path,
        base: &RemoteFolder,
        creds: &Credentials,
        opts: &UploadOptions,
    ) -> Result<UploadReport> {
        let mut mapper = PathMapper::new();
        self.upload_folder_with_mapper(local_root, base, creds, opts, &mut mapper)
            .await
    }

    /// Same as [`upload_folder`](Self::upload_folder) but with a caller-owned
    /// path cache, so repeated runs over the same tree skip folder creation
    /// for directories already mapped.
    pub async fn upload_folder_with_mapper(
        &self,
        local_root: &Path,
        base: &RemoteFolder,
        creds: &Credentials,
        opts: &UploadOptions,
        mapper: &mut PathMapper,
    ) -> Result<UploadReport> {
        let meta = std::fs::metadata(local_root).map_err(|e| {
            HavenError::Traversal(format!("root path {}: {e}", local_root.display()))
        })?;
        if !meta.is_dir() {
            return Err(HavenError::Traversal(format!(
                "root path is not a directory: {}",
                local_root.display()
            )));
        }

        let total = count_files(local_root);
        let label = display_name(local_root);
        let mut state = RunState {
            mapper,
            report: UploadReport::default(),
            total,
            done: 0,
            started: Instant::now(),
        };

        self.upload_dir(local_root.to_path_buf(), base.clone(), creds, opts, &mut state)
            .await;

        let completed = state.done;
        let elapsed = state.started.elapsed();
        let report = state.report;
        self.progress.emit(ProgressEvent {
            activity: label,
            total,
            completed,
            elapsed,
            finished: true,
        });
        Ok(report)
    }

    /// One traversal level: resolve this directory's remote folder, upload
    /// its files, then descend into its subdirectories. A folder-creation
    /// failure here is fatal to this subtree and invisible to siblings.
    fn upload_dir<'s, 'm>(
        &'s self,
        dir: PathBuf,
        parent: RemoteFolder,
        creds: &'s Credentials,
        opts: &'s UploadOptions,
        state: &'s mut RunState<'m>,
    ) -> BoxFuture<'s, ()>
    where
        'm: 's,
    {
        Box::pin(async move {
            let folder = match state
                .mapper
                .resolve(&dir, &parent, opts.access, creds, self.remote)
                .await
            {
                Ok(folder) => folder,
                Err(err) => {
                    warn!("skipping subtree {}: {err}", dir.display());
                    state.report.failures.push(UploadFailure {
                        path: dir.clone(),
                        kind: match err {
                            HavenError::Traversal(_) => FailureKind::Traversal,
                            _ => FailureKind::FolderCreate,
                        },
                        message: err.to_string(),
                    });
                    self.emit(state, display_name(&dir));
                    return;
                }
            };
            let Some(key) = folder.upload_key().map(str::to_string) else {
                // A folder without keys is unusable for the whole subtree.
                state.report.failures.push(UploadFailure {
                    path: dir.clone(),
                    kind: FailureKind::FolderCreate,
                    message: "remote folder carries no authorization key".to_string(),
                });
                self.emit(state, display_name(&dir));
                return;
            };

            let read_dir = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(err) => {
                    warn!("cannot list {}: {err}", dir.display());
                    state.report.failures.push(UploadFailure {
                        path: dir.clone(),
                        kind: FailureKind::Traversal,
                        message: err.to_string(),
                    });
                    self.emit(state, display_name(&dir));
                    return;
                }
            };

            let mut files = Vec::new();
            let mut subdirs = Vec::new();
            for entry in read_dir.flatten() {
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => subdirs.push(entry.path()),
                    Ok(ft) if ft.is_file() => files.push(entry.path()),
                    Ok(_) => {} // sockets, symlinks etc. are not uploaded
                    Err(err) => {
                        state.report.failures.push(UploadFailure {
                            path: entry.path(),
                            kind: FailureKind::Traversal,
                            message: err.to_string(),
                        });
                    }
                }
            }
            files.sort();
            subdirs.sort();

            // Files at this level go first, subdirectories after.
            for path in files {
                if opts.is_cancelled() {
                    state.report.cancelled = true;
                    return;
                }
                let label = display_name(&path);
                // Re-check just before the operation; the snapshot may be
                // stale if the tree is being mutated underneath us.
                if !path.is_file() {
                    state.report.failures.push(UploadFailure {
                        path: path.clone(),
                        kind: FailureKind::Traversal,
                        message: "file disappeared before upload".to_string(),
                    });
                    state.done += 1;
                    self.emit(state, label);
                    continue;
                }

                state.report.attempted += 1;
                match self
                    .remote
                    .upload_file(&path, &folder.hash, &key, opts.want_hashes)
                    .await
                {
                    Ok(ack) => {
                        state.report.succeeded += 1;
                        if let UploadAck::HashReturned(hash) = ack {
                            if opts.want_hashes {
                                state.report.uploaded.push((path.clone(), hash));
                            }
                        }
                    }
                    Err(err) => {
                        warn!("upload of {} failed: {err}", path.display());
                        state.report.failures.push(UploadFailure {
                            path: path.clone(),
                            kind: failure_kind_for(&err),
                            message: err.to_string(),
                        });
                    }
                }
                state.done += 1;
                self.emit(state, label);
            }

            for sub in subdirs {
                if opts.is_cancelled() {
                    state.report.cancelled = true;
                    return;
                }
                self.upload_dir(sub, folder.clone(), creds, opts, state).await;
            }
        })
    }

    fn emit(&self, state: &RunState<'_>, activity: String) {
        self.progress.emit(ProgressEvent {
            activity,
            total: state.total,
            completed: state.done,
            elapsed: state.started.elapsed(),
            finished: false,
        });
    }
}

fn failure_kind_for(err: &HavenError) -> FailureKind {
    match err {
        HavenError::Traversal(_) | HavenError::Io(_) => FailureKind::Traversal,
        _ => FailureKind::Upload,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn count_files(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count() as u64
}

// --- TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_fields_parse() {
        let fields = parse_login_fields("status=ok;session=abc123;folder=F9;key=K7\n");
        assert_eq!(fields.get("session").map(String::as_str), Some("abc123"));
        assert_eq!(fields.get("folder").map(String::as_str), Some("F9"));
        assert_eq!(fields.get("key").map(String::as_str), Some("K7"));
    }

    #[test]
    fn login_fields_tolerate_junk() {
        let fields = parse_login_fields(";;=x;session=s;;broken");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("session").map(String::as_str), Some("s"));
    }

    #[test]
    fn upload_ack_is_literal_d() {
        assert_eq!(
            classify_upload_response(200, "d\n"),
            UploadOutcome::Acknowledged
        );
    }

    #[test]
    fn upload_hash_needs_six_alnum_chars() {
        assert_eq!(
            classify_upload_response(200, "a1B2c3d4"),
            UploadOutcome::HashReturned("a1B2c3d4".to_string())
        );
        assert!(matches!(
            classify_upload_response(200, "ab12"),
            UploadOutcome::Malformed(_)
        ));
        assert!(matches!(
            classify_upload_response(200, "abc-123"),
            UploadOutcome::Malformed(_)
        ));
    }

    #[test]
    fn upload_rejects_error_json_and_html() {
        assert!(matches!(
            classify_upload_response(200, r#"{"error":"quota exceeded"}"#),
            UploadOutcome::Malformed(_)
        ));
        assert!(matches!(
            classify_upload_response(200, "<html><body>oops</body></html>"),
            UploadOutcome::Malformed(_)
        ));
        assert!(matches!(
            classify_upload_response(200, ""),
            UploadOutcome::Malformed(_)
        ));
        assert_eq!(
            classify_upload_response(503, "d"),
            UploadOutcome::HttpError(503)
        );
    }

    #[test]
    fn upload_key_prefers_add_key() {
        let folder = RemoteFolder {
            hash: "abc123".to_string(),
            add_key: Some("XYZ".to_string()),
            edit_key: Some("EDIT".to_string()),
        };
        assert_eq!(folder.upload_key(), Some("XYZ"));

        let edit_only = RemoteFolder {
            hash: "abc123".to_string(),
            add_key: None,
            edit_key: Some("EDIT".to_string()),
        };
        assert_eq!(edit_only.upload_key(), Some("EDIT"));
    }

    #[test]
    fn settings_reject_blank_fields() {
        let settings = Settings {
            username: "u".to_string(),
            password: "p".to_string(),
            base_folder_hash: " ".to_string(),
            folder_key: "k".to_string(),
        };
        assert!(matches!(
            settings.validate(),
            Err(HavenError::Configuration(_))
        ));
    }

    #[test]
    fn settings_parse_persisted_layout() {
        let raw = r#"{"Username":"u","Password":"p","BaseFolderHash":"H","FolderKey":"K"}"#;
        let settings: Settings = serde_json::from_str(raw).expect("parse");
        assert_eq!(settings.base_folder().hash, "H");
        assert_eq!(settings.base_folder().upload_key(), Some("K"));
    }
}
