use anyhow::{Context, Result};
use futures::TryStreamExt;
use peercache_core::{API_PEER_STATUS, ContentDigest, DOWNLOAD, UPLOAD};
use reqwest::Url;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

/// Add `http://` to server addresses given as `host:port`.
pub fn normalize_server(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if server.starts_with("http://") || server.starts_with("https://") {
        server.to_string()
    } else {
        format!("http://{server}")
    }
}

/// MD5 of a file, read in 64 KiB chunks.
pub async fn digest_file(path: &Path) -> Result<ContentDigest> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = ContentDigest::hasher();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self> {
        let base_url = Url::parse(&normalize_server(server)).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str, filename: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.join(path).context("failed to build API URL")?;
        if let Some(filename) = filename {
            url.query_pairs_mut().append_pair("filename", filename);
        }
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(response)
    }

    /// Upload a file under the MD5 of its contents. Returns the stored name.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let filename = digest_file(path).await?.to_hex();
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;

        let url = self.url(UPLOAD, Some(&filename))?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        self.send(self.http.post(url).body(body)).await?;
        Ok(filename)
    }

    /// Stream a cached file into `writer`. Returns the byte count.
    pub async fn download_to<W>(&self, filename: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let url = self.url(DOWNLOAD, Some(filename))?;
        let response = self.send(self.http.get(url)).await?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Peer status map of the node.
    pub async fn peer_status(&self) -> Result<serde_json::Value> {
        let url = self.url(API_PEER_STATUS, None)?;
        let body = self.send(self.http.get(url)).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
