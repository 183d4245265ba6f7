use std::io::{Read, Write};
use std::time::Duration;

use fbls_core::AcquireError;
use reqwest::blocking::Client;
use tracing::debug;

use crate::USER_AGENT;

pub const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const CHUNK_BYTES: usize = 64 * 1024;

pub trait ArtifactDownloader: Send + Sync {
    /// Streams `url` into `sink`, reporting `(downloaded, total)` after every
    /// chunk. Returns the number of bytes written.
    fn download(
        &self,
        url: &str,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, AcquireError>;

    fn fetch_text(&self, url: &str) -> Result<String, AcquireError> {
        let mut buffer = Vec::new();
        self.download(url, &mut buffer, &mut |_, _| {})?;
        String::from_utf8(buffer)
            .map_err(|err| AcquireError::Download(format!("{url} did not return UTF-8 text: {err}")))
    }
}

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, AcquireError> {
        // Artifacts can be large, so only the connect phase is bounded.
        let client = Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .timeout(Option::<Duration>::None)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| AcquireError::Download(format!("failed building HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

impl ArtifactDownloader for HttpDownloader {
    fn download(
        &self,
        url: &str,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, AcquireError> {
        debug!(%url, "starting artifact download");
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| AcquireError::Download(format!("request to {url} failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Download(format!(
                "{url} returned HTTP {status}"
            )));
        }

        let total = response.content_length();
        let mut downloaded = 0_u64;
        let mut buffer = vec![0_u8; CHUNK_BYTES];
        loop {
            let read = response.read(&mut buffer).map_err(|err| {
                AcquireError::Download(format!(
                    "transfer from {url} interrupted after {downloaded} bytes: {err}"
                ))
            })?;
            if read == 0 {
                break;
            }
            sink.write_all(&buffer[..read]).map_err(|err| {
                AcquireError::Permission(format!("failed writing downloaded bytes: {err}"))
            })?;
            downloaded += read as u64;
            progress(downloaded, total);
        }

        if let Some(expected) = total {
            if downloaded != expected {
                return Err(AcquireError::Download(format!(
                    "transfer from {url} ended after {downloaded} of {expected} bytes"
                )));
            }
        }

        sink.flush()
            .map_err(|err| AcquireError::Permission(format!("failed flushing download: {err}")))?;
        debug!(%url, bytes = downloaded, "finished artifact download");
        Ok(downloaded)
    }
}
