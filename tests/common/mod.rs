// In-process mock of the scanning service, shared by the integration tests.
#![allow(dead_code)]

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use codethreat_cli::api::ApiClient;
use codethreat_cli::config::RemoteConfig;
use codethreat_cli::MonitorConfig;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// One received `POST /api/scan/start`.
#[derive(Debug, Default, Clone)]
pub struct Upload {
    pub authorization: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub archive: Vec<u8>,
}

/// One received project call, `GET /api/project` or `POST /api/project/add`.
#[derive(Debug, Default, Clone)]
pub struct ProjectCall {
    pub path: String,
    pub authorization: Option<String>,
    pub organization: Option<String>,
    pub key: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct Inner {
    start_reply: Option<(u16, Value)>,
    // The last reply repeats once the queue is down to one entry.
    status_replies: VecDeque<(u16, Value)>,
    uploads: Vec<Upload>,
    status_ids: Vec<String>,
    project_reply: Option<(u16, Value)>,
    project_calls: Vec<ProjectCall>,
}

#[derive(Clone, Default)]
pub struct MockService {
    inner: Arc<Mutex<Inner>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_reply(self, code: u16, body: Value) -> Self {
        self.inner.lock().unwrap().start_reply = Some((code, body));
        self
    }

    pub fn status_reply(self, code: u16, body: Value) -> Self {
        self.inner.lock().unwrap().status_replies.push_back((code, body));
        self
    }

    pub fn state(self, state: &str) -> Self {
        self.status_reply(200, json!({ "state": state, "severities": {} }))
    }

    /// Reply for both project endpoints.
    pub fn project_reply(self, code: u16, body: Value) -> Self {
        self.inner.lock().unwrap().project_reply = Some((code, body));
        self
    }

    pub fn project_calls(&self) -> Vec<ProjectCall> {
        self.inner.lock().unwrap().project_calls.clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.inner.lock().unwrap().uploads.clone()
    }

    pub fn start_calls(&self) -> usize {
        self.inner.lock().unwrap().uploads.len()
    }

    pub fn status_calls(&self) -> usize {
        self.inner.lock().unwrap().status_ids.len()
    }

    pub fn status_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().status_ids.clone()
    }

    /// Serve on an ephemeral localhost port.
    pub async fn spawn(&self) -> SocketAddr {
        let app = Router::new()
            .route("/api/scan/start", post(start))
            .route("/api/scan/status/:id", get(status))
            .route("/api/project", get(project_get))
            .route("/api/project/add", post(project_add))
            .with_state(self.clone());
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn start(State(mock): State<MockService>, headers: HeaderMap, mut mp: Multipart) -> (StatusCode, Json<Value>) {
    let mut upload = Upload {
        authorization: header(&headers, "authorization"),
        organization: header(&headers, "x-ct-organization"),
        ..Default::default()
    };
    while let Ok(Some(field)) = mp.next_field().await {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("upfile") => {
                upload.file_name = field.file_name().map(str::to_string);
                upload.content_type = field.content_type().map(str::to_string);
                upload.archive = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
            }
            Some("project") => upload.project = field.text().await.ok(),
            _ => {}
        }
    }
    let mut inner = mock.inner.lock().unwrap();
    inner.uploads.push(upload);
    let (code, body) = inner.start_reply.clone().unwrap_or((200, json!({ "scanId": "abc" })));
    (StatusCode::from_u16(code).unwrap(), Json(body))
}

async fn status(State(mock): State<MockService>, Path(id): Path<String>) -> (StatusCode, Json<Value>) {
    let mut inner = mock.inner.lock().unwrap();
    inner.status_ids.push(id);
    let reply = if inner.status_replies.len() > 1 {
        inner.status_replies.pop_front()
    } else {
        inner.status_replies.front().cloned()
    };
    let (code, body) = reply.unwrap_or((200, json!({ "state": "RUNNING", "severities": {} })));
    (StatusCode::from_u16(code).unwrap(), Json(body))
}

fn project_reply(mock: &MockService, call: ProjectCall) -> (StatusCode, Json<Value>) {
    let mut inner = mock.inner.lock().unwrap();
    inner.project_calls.push(call);
    let (code, body) = inner.project_reply.clone().unwrap_or((200, json!({})));
    (StatusCode::from_u16(code).unwrap(), Json(body))
}

async fn project_get(
    State(mock): State<MockService>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let call = ProjectCall {
        path: "/api/project".into(),
        authorization: header(&headers, "authorization"),
        organization: header(&headers, "x-ct-organization"),
        key: query.get("key").cloned(),
        body: None,
    };
    project_reply(&mock, call)
}

async fn project_add(State(mock): State<MockService>, headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let call = ProjectCall {
        path: "/api/project/add".into(),
        authorization: header(&headers, "authorization"),
        organization: header(&headers, "x-ct-organization"),
        key: None,
        body: Some(body),
    };
    project_reply(&mock, call)
}

pub fn remote_config(addr: SocketAddr) -> RemoteConfig {
    RemoteConfig {
        base_url: Some(format!("http://{addr}")),
        organization_name: Some("TestOrg".into()),
        access_token: Some("tok".into()),
    }
}

pub fn client_for(addr: SocketAddr) -> ApiClient {
    ApiClient::new(remote_config(addr)).unwrap()
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    listener.local_addr().unwrap()
}

pub fn fast_monitor(max_attempts: u32) -> MonitorConfig {
    MonitorConfig {
        poll_interval: Duration::from_millis(10),
        max_attempts,
        max_transport_retries: 3,
        request_timeout: Duration::from_secs(5),
    }
}

/// `<tmp>/src` populated with `files`; returns (guard, src path).
pub fn source_tree(files: &[(&str, &str)]) -> (tempfile::TempDir, std::path::PathBuf) {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    std::fs::create_dir(&src).unwrap();
    for (rel, content) in files {
        let path = src.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    (tmp, src)
}

/// Zip files left next to the source directory.
pub fn leftover_archives(tmp: &tempfile::TempDir) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "zip"))
        .collect()
}

/// (name, content) of every file entry in an uploaded archive.
pub fn unzip(bytes: &[u8]) -> Vec<(String, String)> {
    use std::io::Read;
    let mut ar = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    for i in 0..ar.len() {
        let mut f = ar.by_index(i).unwrap();
        if f.is_dir() {
            continue;
        }
        let mut s = String::new();
        f.read_to_string(&mut s).unwrap();
        out.push((f.name().to_string(), s));
    }
    out
}
