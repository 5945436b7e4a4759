//! Constant-memory artifact upload.
//!
//! The multipart body is never assembled in memory. reqwest encodes the form
//! and derives the exact Content-Length from the declared file size, while a
//! producer task pipes the file bytes through a bounded in-process pipe into
//! the file part.

use std::io;
use std::path::{Path, PathBuf};

use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the pipe between producer and request body.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Form field carrying the file part.
const FILE_FIELD: &str = "file";

const FILE_PART_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload target id")]
    InvalidTarget,

    #[error("cannot read {}: {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("upload transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upload rejected (status {status}): {body}")]
    ServerRejected { status: u16, body: String },
}

/// One file to push to `PUT /entities/{target_id}/files/upload`.
#[derive(Debug, Clone, Default)]
pub struct UploadDescriptor {
    pub target_id: Uuid,
    /// Logical type tag, e.g. `pak` or `release`.
    pub file_type: String,
    pub mime: String,
    pub source_path: PathBuf,
    /// Path of the file relative to its build output, if meaningful.
    pub original_path: Option<String>,
    pub deployment: Option<String>,
    pub platform: Option<String>,
    pub extra_fields: Vec<(String, String)>,
}

impl UploadDescriptor {
    pub fn new(target_id: Uuid, file_type: &str, mime: &str, source_path: impl Into<PathBuf>) -> Self {
        Self {
            target_id,
            file_type: file_type.to_string(),
            mime: mime.to_string(),
            source_path: source_path.into(),
            ..Default::default()
        }
    }

    fn query(&self) -> Vec<(&'static str, &str)> {
        let mut q = vec![("type", self.file_type.as_str()), ("mime", self.mime.as_str())];
        if let Some(d) = &self.deployment {
            q.push(("deployment", d));
        }
        if let Some(p) = &self.platform {
            q.push(("platform", p));
        }
        if let Some(o) = &self.original_path {
            q.push(("original-path", o));
        }
        q
    }

    fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string())
    }
}

/// Streams files to the storage endpoint. Each call is an independent
/// attempt with its own form boundary; nothing is kept between calls.
#[derive(Debug, Clone)]
pub struct StreamingUploader {
    client: Client,
    base_url: String,
    chunk_size: usize,
}

impl StreamingUploader {
    pub fn new(client: Client, base_url: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn upload(&self, token: &str, descriptor: &UploadDescriptor) -> Result<(), UploadError> {
        if descriptor.target_id.is_nil() {
            return Err(UploadError::InvalidTarget);
        }

        let path = &descriptor.source_path;
        let unreadable = |source| UploadError::SourceUnreadable {
            path: path.clone(),
            source,
        };
        let file = File::open(path).await.map_err(unreadable)?;
        let file_size = file.metadata().await.map_err(unreadable)?.len();

        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        let form = upload_form(descriptor, reader, file_size)?;
        debug!(
            state = "FramingComputed",
            file = %path.display(),
            file_size,
            boundary = form.boundary(),
            "upload framed"
        );
        let producer = tokio::spawn(produce(writer, file, file_size, self.chunk_size));

        let url = format!(
            "{}/entities/{}/files/upload",
            self.base_url, descriptor.target_id
        );
        debug!(state = "Streaming", %url, "upload started");
        let sent = self
            .client
            .put(&url)
            .query(&descriptor.query())
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await;

        // A server may answer before it has read the whole body. Nothing
        // drains the pipe after that, so the producer must not be awaited.
        if producer.is_finished() {
            match producer.await {
                Ok(Ok(written)) => debug!(written, "upload producer finished"),
                Ok(Err(_)) => {}
                Err(e) => warn!(error = %e, "upload producer task failed"),
            }
        } else {
            producer.abort();
        }

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                debug!(state = "Failed", error = %e, "upload failed");
                return Err(UploadError::Transport(e));
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            debug!(state = "Failed", status = status.as_u16(), "upload rejected");
            return Err(UploadError::ServerRejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(state = "Completed", "upload completed");
        info!(
            file = %path.display(),
            file_type = %descriptor.file_type,
            bytes = file_size,
            "uploaded"
        );
        Ok(())
    }
}

/// Extra fields first, then the file part fed from `reader`. The part length
/// is declared so reqwest can compute the request Content-Length.
fn upload_form(descriptor: &UploadDescriptor, reader: DuplexStream, file_size: u64) -> Result<Form, UploadError> {
    let file = Part::stream_with_length(Body::wrap_stream(ReaderStream::new(reader)), file_size)
        .file_name(descriptor.file_name())
        .mime_str(FILE_PART_MIME)?;
    let form = descriptor
        .extra_fields
        .iter()
        .fold(Form::new(), |form, (name, value)| form.text(name.clone(), value.clone()));
    Ok(form.part(FILE_FIELD, file))
}

/// Writes exactly `file_size` file bytes into the pipe. The write end is
/// shut down and dropped on every path so the request body always sees end
/// of stream.
async fn produce(mut writer: DuplexStream, file: File, file_size: u64, chunk_size: usize) -> io::Result<u64> {
    let result = copy_file(&mut writer, file, file_size, chunk_size).await;
    match &result {
        Ok(_) => {
            let _ = writer.shutdown().await;
        }
        Err(e) => warn!(error = %e, "upload producer stopped"),
    }
    drop(writer);
    result
}

async fn copy_file(writer: &mut DuplexStream, file: File, file_size: u64, chunk_size: usize) -> io::Result<u64> {
    let mut source = file.take(file_size);
    let mut buf = vec![0u8; buffer_len(chunk_size, file_size)];
    let mut copied = 0u64;
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
    if copied != file_size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("file shrank during upload: {copied} of {file_size} bytes"),
        ));
    }
    Ok(copied)
}

/// Read buffer size: one chunk, or less for small files.
fn buffer_len(chunk_size: usize, file_size: u64) -> usize {
    usize::try_from(file_size).map_or(chunk_size, |n| chunk_size.min(n.max(1)))
}

/// Best-effort MIME type from a file extension.
pub fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TARGET: &str = "0f7d1a30-5b9e-4a0a-8d0e-7a1b2c3d4e5f";

    fn target() -> Uuid {
        TARGET.parse().unwrap()
    }

    async fn accepting_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/entities/{TARGET}/files/upload")))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"status":"ok"}"#))
            .mount(&server)
            .await;
        server
    }

    fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
        let p = dir.join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&p, data).unwrap();
        p
    }

    fn boundary_of(req: &wiremock::Request) -> String {
        let ct = req.headers.get("content-type").unwrap().to_str().unwrap();
        ct.strip_prefix("multipart/form-data; boundary=").unwrap().to_string()
    }

    fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
        haystack[from..]
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| i + from)
    }

    /// Bytes of the `file` part, between its header block and the closing
    /// boundary.
    fn file_payload(req: &wiremock::Request) -> &[u8] {
        let closing = format!("\r\n--{}--\r\n", boundary_of(req));
        let body = &req.body;
        assert!(body.ends_with(closing.as_bytes()));
        let part = find(body, b"name=\"file\"", 0).unwrap();
        let start = find(body, b"\r\n\r\n", part).unwrap() + 4;
        &body[start..body.len() - closing.len()]
    }

    fn declared_length(req: &wiremock::Request) -> u64 {
        req.headers
            .get("content-length")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    /// Uploads a file of `len` bytes and checks the received file part byte
    /// for byte.
    async fn assert_exact_body(len: usize, chunk_size: usize) {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "Forest.pak", len);
        let server = accepting_server().await;
        let uploader = StreamingUploader::new(Client::new(), server.uri(), chunk_size);

        let desc = UploadDescriptor::new(target(), "pak", "application/octet-stream", &file);
        uploader.upload("tok", &desc).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(declared_length(req), req.body.len() as u64);
        assert_eq!(file_payload(req), std::fs::read(&file).unwrap().as_slice());

        let head = String::from_utf8_lossy(&req.body[..req.body.len().min(512)]).into_owned();
        assert!(head.contains("filename=\"Forest.pak\""));
        assert!(head.contains("Content-Type: application/octet-stream"));
    }

    #[tokio::test]
    async fn empty_file_length_matches() {
        assert_exact_body(0, 16).await;
    }

    #[tokio::test]
    async fn file_at_chunk_boundary_length_matches() {
        assert_exact_body(16, 16).await;
    }

    #[tokio::test]
    async fn multi_chunk_file_length_matches() {
        assert_exact_body(16 * 5 + 3, 16).await;
    }

    #[tokio::test]
    async fn file_larger_than_pipe_streams() {
        assert_exact_body(PIPE_CAPACITY * 3 + 17, 4096).await;
    }

    #[tokio::test]
    async fn sends_query_and_auth() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "Game.exe", 10);
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/entities/{TARGET}/files/upload")))
            .and(query_param("type", "release"))
            .and(query_param("mime", "application/x-msdownload"))
            .and(query_param("deployment", "Client"))
            .and(query_param("platform", "Win64"))
            .and(query_param("original-path", "Binaries/Win64/Game.exe"))
            .and(header("authorization", "Bearer tok"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let uploader = StreamingUploader::new(Client::new(), format!("{}/", server.uri()), 1024);
        let desc = UploadDescriptor {
            deployment: Some("Client".into()),
            platform: Some("Win64".into()),
            original_path: Some("Binaries/Win64/Game.exe".into()),
            ..UploadDescriptor::new(target(), "release", "application/x-msdownload", &file)
        };
        uploader.upload("tok", &desc).await.unwrap();
    }

    #[tokio::test]
    async fn extra_fields_are_framed_before_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.bin", 5);
        let server = accepting_server().await;
        let uploader = StreamingUploader::new(Client::new(), server.uri(), 1024);
        let desc = UploadDescriptor {
            extra_fields: vec![("note".into(), "nightly".into())],
            ..UploadDescriptor::new(target(), "pak", "application/octet-stream", &file)
        };
        uploader.upload("tok", &desc).await.unwrap();

        let req = &server.received_requests().await.unwrap()[0];
        let body = String::from_utf8_lossy(&req.body);
        let field = body.find("name=\"note\"").unwrap();
        let file_part = body.find("name=\"file\"").unwrap();
        assert!(field < file_part);
        assert_eq!(
            req.headers.get("content-length").unwrap().to_str().unwrap(),
            req.body.len().to_string()
        );
    }

    #[tokio::test]
    async fn server_rejection_carries_status_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.pak", 32);
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;

        let uploader = StreamingUploader::new(Client::new(), server.uri(), 8);
        let desc = UploadDescriptor::new(target(), "pak", "application/octet-stream", &file);
        match uploader.upload("tok", &desc).await.unwrap_err() {
            UploadError::ServerRejected { status, body } => {
                assert_eq!(status, 413);
                assert_eq!(body, "too large");
            }
            other => panic!("expected ServerRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retry_is_an_independent_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.pak", 48);
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let uploader = StreamingUploader::new(Client::new(), server.uri(), 16);
        let desc = UploadDescriptor::new(target(), "pak", "application/octet-stream", &file);
        assert!(uploader.upload("tok", &desc).await.is_err());
        uploader.upload("tok", &desc).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].body.len(), requests[1].body.len());
        assert_ne!(boundary_of(&requests[0]), boundary_of(&requests[1]));
    }

    #[tokio::test]
    async fn file_name_cannot_inject_part_headers() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a\"b\r\nX-Injected: 1 é.pak", 9);
        let server = accepting_server().await;
        let uploader = StreamingUploader::new(Client::new(), server.uri(), 4);
        let desc = UploadDescriptor {
            extra_fields: vec![("note\r\nX-Field: 2".into(), "nightly".into())],
            ..UploadDescriptor::new(target(), "pak", "application/octet-stream", &file)
        };
        uploader.upload("tok", &desc).await.unwrap();

        let req = &server.received_requests().await.unwrap()[0];
        assert_eq!(declared_length(req), req.body.len() as u64);
        assert!(find(&req.body, b"\r\nX-Injected: 1", 0).is_none());
        assert!(find(&req.body, b"\r\nX-Field: 2", 0).is_none());
        assert!(find(&req.body, "é.pak".as_bytes(), 0).is_some());
        assert_eq!(file_payload(req), std::fs::read(&file).unwrap().as_slice());
    }

    /// A server that answers 413 as soon as it has the request head, never
    /// reads the body and keeps the connection open.
    async fn early_rejecting_server() -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while find(&head, b"\r\n\r\n", 0).is_none() {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            drop(socket);
        });
        addr
    }

    #[tokio::test]
    async fn early_rejection_does_not_hang() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "big.pak", 32 * 1024 * 1024);
        let addr = early_rejecting_server().await;
        let uploader = StreamingUploader::new(Client::new(), format!("http://{addr}"), 64 * 1024);
        let desc = UploadDescriptor::new(target(), "pak", "application/octet-stream", &file);

        let result = tokio::time::timeout(std::time::Duration::from_secs(10), uploader.upload("tok", &desc))
            .await
            .expect("upload must return after an early rejection");
        match result.unwrap_err() {
            UploadError::ServerRejected { status, .. } => assert_eq!(status, 413),
            UploadError::Transport(_) => {}
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[test]
    fn read_buffer_never_exceeds_chunk_or_file() {
        assert_eq!(buffer_len(16, 0), 1);
        assert_eq!(buffer_len(16, 5), 5);
        assert_eq!(buffer_len(16, 16), 16);
        assert_eq!(buffer_len(16, u64::MAX), 16);
    }

    #[tokio::test]
    async fn nil_target_is_rejected_before_io() {
        let uploader = StreamingUploader::new(Client::new(), "http://127.0.0.1:1", 16);
        let desc = UploadDescriptor::new(Uuid::nil(), "pak", "application/octet-stream", "/nonexistent");
        assert!(matches!(
            uploader.upload("tok", &desc).await.unwrap_err(),
            UploadError::InvalidTarget
        ));
    }

    #[tokio::test]
    async fn missing_source_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let uploader = StreamingUploader::new(Client::new(), "http://127.0.0.1:1", 16);
        let desc = UploadDescriptor::new(target(), "pak", "application/octet-stream", dir.path().join("gone.pak"));
        assert!(matches!(
            uploader.upload("tok", &desc).await.unwrap_err(),
            UploadError::SourceUnreadable { .. }
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), "a.pak", PIPE_CAPACITY * 2);
        let uploader = StreamingUploader::new(Client::new(), "http://127.0.0.1:1", 1024);
        let desc = UploadDescriptor::new(target(), "pak", "application/octet-stream", &file);
        assert!(matches!(
            uploader.upload("tok", &desc).await.unwrap_err(),
            UploadError::Transport(_)
        ));
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_mime(Path::new("a/b/readme.txt")), "text/plain");
        assert_eq!(guess_mime(Path::new("a/b/Game.unknownext")), "application/octet-stream");
    }
}
