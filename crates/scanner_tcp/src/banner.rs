//! Banner grabbing on freshly connected streams

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, instrument};

const BANNER_BUFFER_LEN: usize = 512;
const HTTP_PROBE: &[u8] = b"GET / HTTP/1.0\r\n\r\n";

/// Ports whose services either greet first or answer a bare HTTP request.
pub(crate) fn wants_banner(port: u16) -> bool {
    matches!(
        port,
        21 | 22 | 23 | 25 | 80 | 110 | 143 | 443 | 465 | 587 | 993 | 995 | 3306 | 5432
            | 5900 | 6379 | 8000 | 8080 | 8443 | 8888 | 9000 | 27017
    )
}

pub struct BannerGrabber {
    timeout: Duration,
}

impl BannerGrabber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Read whatever the service volunteers; if it stays silent, send an
    /// HTTP request and read the reply. Each read gets half the timeout.
    #[instrument(skip(self, stream))]
    pub async fn grab<S>(&self, stream: &mut S) -> Option<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = [0u8; BANNER_BUFFER_LEN];
        let half = self.timeout / 2;

        if let Some(banner) = read_banner(stream, &mut buf, half).await {
            debug!(bytes = banner.len(), "passive banner");
            return Some(banner);
        }

        if !matches!(timeout(half, stream.write_all(HTTP_PROBE)).await, Ok(Ok(()))) {
            debug!("HTTP probe could not be sent");
            return None;
        }

        let banner = read_banner(stream, &mut buf, half).await;
        debug!(found = banner.is_some(), "active banner");
        banner
    }
}

async fn read_banner<S>(stream: &mut S, buf: &mut [u8], wait: Duration) -> Option<String>
where
    S: AsyncRead + Unpin,
{
    match timeout(wait, stream.read(buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}
