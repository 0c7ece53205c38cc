use std::{error::Error, fmt, io, path::Path, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{
    header::{self, HeaderMap},
    multipart, Body, Client, Method, RequestBuilder, Response,
};
use tokio::{io::AsyncReadExt, sync::watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use common::{
    data::{StoredFile, UploadedFile},
    payloads::{ListPage, ListQuery, Problem},
};

use crate::config::ApiConfig;

#[derive(Clone, Debug)]
pub enum TransportError {
    Request(String),
    Status { code: u16, title: Option<String> },
    Decode(String),
    Io(String),
    Cancelled,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(s) => write!(f, "request error: {s}"),
            // a server-supplied problem title is the message to show
            Self::Status {
                title: Some(title), ..
            } => write!(f, "{title}"),
            Self::Status { code, title: None } => write!(f, "server returned status {code}"),
            Self::Decode(s) => write!(f, "decode error: {s}"),
            Self::Io(s) => write!(f, "i/o error: {s}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Request(value.to_string())
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// The slice of the transport the stateful components depend on. Tests
/// substitute an in-memory implementation.
#[async_trait]
pub trait FileApi: Send + Sync {
    async fn list(&self, query: &ListQuery) -> Result<ListPage, TransportError>;

    /// Uploads one file as a multipart POST. Whole-percent progress is
    /// published on `progress` as the body is consumed; once `cancel`
    /// fires, the request is torn down and no further values are
    /// published.
    async fn upload(
        &self,
        path: &Path,
        tags: &[String],
        progress: watch::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<UploadedFile, TransportError>;
}

/// Thin wrapper over the files REST surface. One request/response exchange
/// per operation, no retries anywhere; callers turn errors into messages.
pub struct FileTransport {
    client: Client,
    files_url: String,
    token: Option<String>,
}

const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

async fn read_chunk(file: &mut tokio::fs::File) -> io::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(UPLOAD_CHUNK_SIZE);
    file.read_buf(&mut buf).await?;
    Ok(buf.freeze())
}

impl FileTransport {
    pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("filedeck/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .build()?;
        Ok(Self {
            client,
            files_url: config.files_url(),
            token,
        })
    }

    fn url_for(&self, id: &str) -> String {
        format!("{}/{id}", self.files_url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Checks the status code and pulls a problem title out of error
    /// bodies so callers can show what the server said.
    async fn ensure_success(res: Response) -> Result<Response, TransportError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let title = res
            .text()
            .await
            .ok()
            .and_then(|body| serde_json::from_str::<Problem>(&body).ok())
            .and_then(|p| p.title);
        Err(TransportError::Status {
            code: status.as_u16(),
            title,
        })
    }

    pub async fn get(&self, id: &str) -> Result<StoredFile, TransportError> {
        let res = self.request(Method::GET, &self.url_for(id)).send().await?;
        let res = Self::ensure_success(res).await?;
        Ok(res.json().await?)
    }

    /// Returns the binary body and the filename the server suggested via
    /// Content-Disposition, when it did.
    pub async fn download(&self, id: &str) -> Result<(Bytes, Option<String>), TransportError> {
        let url = format!("{}/download", self.url_for(id));
        let res = self.request(Method::GET, &url).send().await?;
        let res = Self::ensure_success(res).await?;
        let filename = content_disposition_filename(res.headers());
        Ok((res.bytes().await?, filename))
    }

    pub async fn preview(&self, id: &str) -> Result<Bytes, TransportError> {
        let url = format!("{}/preview", self.url_for(id));
        let res = self.request(Method::GET, &url).send().await?;
        let res = Self::ensure_success(res).await?;
        Ok(res.bytes().await?)
    }

    /// Marks the file deleted; the server keeps it recoverable.
    pub async fn soft_delete(&self, id: &str) -> Result<(), TransportError> {
        let res = self
            .request(Method::DELETE, &self.url_for(id))
            .send()
            .await?;
        Self::ensure_success(res).await?;
        Ok(())
    }

    /// Irreversible. The admin gate lives with the caller; this layer only
    /// issues the request.
    pub async fn hard_delete(&self, id: &str) -> Result<(), TransportError> {
        let url = format!("{}/hard", self.url_for(id));
        let res = self.request(Method::DELETE, &url).send().await?;
        Self::ensure_success(res).await?;
        Ok(())
    }
}

#[async_trait]
impl FileApi for FileTransport {
    async fn list(&self, query: &ListQuery) -> Result<ListPage, TransportError> {
        let url = Url::parse_with_params(&self.files_url, query.to_params())
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let res = self.request(Method::GET, url.as_str()).send().await?;
        let res = Self::ensure_success(res).await?;
        // shape tolerance lives in ListPage; a non-JSON body is just an
        // empty page, not a failure
        let body = res.text().await?;
        let value = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        Ok(ListPage::from_value(value))
    }

    async fn upload(
        &self,
        path: &Path,
        tags: &[String],
        progress: watch::Sender<u8>,
        cancel: CancellationToken,
    ) -> Result<UploadedFile, TransportError> {
        let total = tokio::fs::metadata(path).await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mut file = tokio::fs::File::open(path).await?;
        log::debug!("uploading {file_name} ({total} bytes)");

        let body_cancel = cancel.clone();
        let body = stream! {
            let mut sent: u64 = 0;
            loop {
                // checked before every chunk: a cancelled upload publishes
                // no further progress
                if body_cancel.is_cancelled() {
                    yield Err(io::Error::other("upload cancelled"));
                    break;
                }
                match read_chunk(&mut file).await {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => {
                        sent += chunk.len() as u64;
                        let percent = (sent.min(total) * 100 / total.max(1)) as u8;
                        let _ = progress.send(percent);
                        yield Ok(chunk);
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        let part = multipart::Part::stream_with_length(Body::wrap_stream(body), total)
            .file_name(file_name);
        let mut form = multipart::Form::new().part("file", part);
        for tag in tags {
            form = form.text("tags", tag.clone());
        }

        let send = self
            .request(Method::POST, &self.files_url)
            .multipart(form)
            .send();
        let res = tokio::select! {
            res = send => res,
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let res = Self::ensure_success(res?).await?;
        Ok(res.json().await?)
    }
}

fn content_disposition_filename(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|v| v.trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}
