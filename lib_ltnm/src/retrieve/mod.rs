//! One-shot HTTPS file download with a pinned CA certificate, used to fetch
//! the network layout document.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Download `url` to `destination`, verifying the server against the trust
/// anchors in `ca_cert_file` only.
pub async fn download_file(
    url: &str,
    destination: &Path,
    ca_cert_file: &Path,
) -> Result<(), DownloadError> {
    let pem = tokio::fs::read(ca_cert_file).await?;
    let certificate = reqwest::Certificate::from_pem(&pem)?;
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(certificate)
        .build()?;
    let response = client.get(url).send().await?.error_for_status()?;
    let body = response.bytes().await?;
    tokio::fs::write(destination, &body).await?;
    log::info!("Downloaded {} to {}", url, destination.display());
    Ok(())
}
