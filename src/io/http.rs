use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ReadAt, SpillFile};
use crate::config::ArchiveOptions;
use crate::error::{Error, Result};

/// HTTP Range reader for remote ZIP files.
///
/// Built by [`open_source`](super::open_source) when the server advertises
/// byte ranges and a length.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
    max_retry: u32,
}

/// What a HEAD request told us about a remote file.
struct Capabilities {
    accepts_ranges: bool,
    size: Option<u64>,
}

async fn probe(client: &Client, url: &str) -> Result<Capabilities> {
    let resp = client.head(url).send().await?;

    if !resp.status().is_success() {
        return Err(Error::Io(std::io::Error::other(format!(
            "HTTP request failed with status: {}",
            resp.status()
        ))));
    }

    let accepts_ranges = resp
        .headers()
        .get("accept-ranges")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("bytes"));

    let size = resp
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok());

    Ok(Capabilities {
        accepts_ranges,
        size,
    })
}

fn client(options: &ArchiveOptions) -> Result<Client> {
    Ok(Client::builder().timeout(options.http_timeout).build()?)
}

/// Opens a remote archive, reading by range when the server allows it and
/// downloading into a temporary file otherwise.
pub(super) async fn open(url: &str, options: &ArchiveOptions) -> Result<Arc<dyn ReadAt>> {
    let client = client(options)?;
    let caps = probe(&client, url).await?;

    if let (true, Some(size)) = (caps.accepts_ranges, caps.size) {
        return Ok(Arc::new(HttpRangeReader {
            client,
            url: url.to_string(),
            size,
            max_retry: options.http_max_retry,
        }));
    }

    debug!(url, "server does not serve ranges, downloading archive");
    let mut resp = client.get(url).send().await?.error_for_status()?;
    let mut spill = SpillFile::new()?;
    while let Some(chunk) = resp.chunk().await? {
        spill.write_all(&chunk).await?;
    }
    debug!(url, bytes = spill.written(), "archive downloaded");
    Ok(Arc::new(spill.into_reader().await?))
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = offset + buf.len() as u64 - 1;
        let end = end.min(self.size - 1);
        let expected_size = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        return Err(Error::Io(std::io::Error::other(format!(
                            "HTTP range request failed with status: {}",
                            resp.status()
                        ))));
                    }

                    let bytes = resp.bytes().await?;
                    if bytes.is_empty() {
                        break;
                    }
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(e.into());
                    }
                    warn!(
                        url = %self.url,
                        retry = retry_count,
                        max = self.max_retry,
                        "connection error: {e}"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(received)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
