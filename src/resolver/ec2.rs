use std::time::Duration;

use async_trait::async_trait;
use tracing::{event, Level};

use super::IpResolver;
use crate::error::{Error, Result};

const INSTANCE_METADATA_URL: &str = "http://169.254.169.254/latest/meta-data";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Fetches the IPv6 address of the instance's primary interface from the EC2 instance metadata
/// service.
#[derive(Debug, Clone)]
pub struct Ec2IpResolver {
    client: reqwest::Client,
    base_url: String,
}

impl Ec2IpResolver {
    pub fn new() -> Result<Self> {
        Self::with_base_url(INSTANCE_METADATA_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config {
                reason: format!("unable to build instance metadata client - {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, path))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Io {
                reason: format!(
                    "unexpected status {} fetching instance metadata '{}'",
                    response.status(),
                    path
                ),
            });
        }

        Ok(response.text().await?)
    }
}

/// Picks the first address out of a newline separated `ipv6s` listing.
fn first_address(body: &str) -> Result<String> {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|addr| format!("[{}]", addr))
        .ok_or(Error::Io {
            reason: "no IPs found from instance metadata".to_string(),
        })
}

#[async_trait]
impl IpResolver for Ec2IpResolver {
    async fn resolve_ip(&self) -> Result<String> {
        let mac = self.get("mac").await?;
        let ipv6s = self
            .get(&format!("network/interfaces/macs/{}/ipv6s", mac.trim()))
            .await?;

        let resolved = first_address(&ipv6s)?;
        event!(Level::DEBUG, "resolved instance address {}", resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::{first_address, Ec2IpResolver};
    use crate::resolver::IpResolver;

    /// Serves a tiny subset of the instance metadata api: the request path decides the response
    async fn start_metadata_server(ipv6s_status: u16, ipv6s_body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();

                let (status, body) = if request.starts_with("GET /latest/meta-data/mac ") {
                    (200, "0a:1b:2c:3d:4e:5f")
                } else if request
                    .starts_with("GET /latest/meta-data/network/interfaces/macs/0a:1b:2c:3d:4e:5f/ipv6s ")
                {
                    (ipv6s_status, ipv6s_body)
                } else {
                    (404, "")
                };

                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        format!("http://{}/latest/meta-data", addr)
    }

    #[test]
    fn first_address_is_bracketed() {
        assert_eq!(
            first_address("2a05:d018::1\n2a05:d018::2\n").unwrap(),
            "[2a05:d018::1]"
        );
        assert!(first_address("\n").err().unwrap().is_io());
    }

    #[tokio::test]
    async fn resolves_through_mac_lookup() {
        let base_url = start_metadata_server(200, "2a05:d018::1\n").await;
        let resolver = Ec2IpResolver::with_base_url(base_url).unwrap();

        assert_eq!(resolver.resolve_ip().await.unwrap(), "[2a05:d018::1]");
    }

    #[tokio::test]
    async fn non_success_status_is_an_io_error() {
        let base_url = start_metadata_server(404, "").await;
        let resolver = Ec2IpResolver::with_base_url(base_url).unwrap();

        assert!(resolver.resolve_ip().await.err().unwrap().is_io());
    }
}
