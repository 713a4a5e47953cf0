//! Update Transports
//!
//! Fetches the update descriptor and opens the artifact byte stream.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Update descriptor published at the metadata URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

impl UpdateDescriptor {
    /// A descriptor is only actionable when every field is filled in
    pub fn is_actionable(&self) -> bool {
        !self.version.trim().is_empty()
            && !self.url.trim().is_empty()
            && !self.sha256.trim().is_empty()
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response from {url}: HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Undecodable update descriptor: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// Where update descriptors come from
pub trait DescriptorSource {
    fn fetch(&self) -> Result<UpdateDescriptor, TransportError>;
}

/// Where artifact bytes come from
pub trait ArtifactSource {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, TransportError>;
}

impl<T: DescriptorSource + ?Sized> DescriptorSource for Arc<T> {
    fn fetch(&self) -> Result<UpdateDescriptor, TransportError> {
        (**self).fetch()
    }
}

impl<T: ArtifactSource + ?Sized> ArtifactSource for Arc<T> {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, TransportError> {
        (**self).open(url)
    }
}

/// Blocking HTTP transport for both descriptors and artifacts
pub struct HttpTransport {
    metadata_url: String,
    metadata_client: reqwest::blocking::Client,
    artifact_client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(
        metadata_url: impl Into<String>,
        fetch_timeout: Duration,
        download_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let build = |timeout: Duration| {
            reqwest::blocking::Client::builder()
                .user_agent(concat!("cutover/", env!("CARGO_PKG_VERSION")))
                .connect_timeout(fetch_timeout)
                .timeout(timeout)
                .build()
        };

        Ok(Self {
            metadata_url: metadata_url.into(),
            metadata_client: build(fetch_timeout)?,
            artifact_client: build(download_timeout)?,
        })
    }

    fn get(client: &reqwest::blocking::Client, url: &str) -> Result<reqwest::blocking::Response, TransportError> {
        let response = client.get(url).send()?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl DescriptorSource for HttpTransport {
    fn fetch(&self) -> Result<UpdateDescriptor, TransportError> {
        let response = Self::get(&self.metadata_client, &self.metadata_url)?;
        let body = response.text()?;
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl ArtifactSource for HttpTransport {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, TransportError> {
        let response = Self::get(&self.artifact_client, url)?;
        Ok(Box::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parses() {
        let d: UpdateDescriptor = serde_json::from_str(
            r#"{"version":"2.0","url":"https://example.com/myapp","sha256":"abc"}"#,
        ).unwrap();
        assert_eq!(d.version, "2.0");
        assert!(d.is_actionable());
    }

    #[test]
    fn test_missing_fields_are_not_actionable() {
        let d: UpdateDescriptor = serde_json::from_str(r#"{"version":"2.0"}"#).unwrap();
        assert!(!d.is_actionable());

        let d: UpdateDescriptor = serde_json::from_str(
            r#"{"version":"  ","url":"u","sha256":"s"}"#,
        ).unwrap();
        assert!(!d.is_actionable());
    }

    #[test]
    fn test_transport_builds() {
        let transport = HttpTransport::new(
            "http://127.0.0.1:9/latest.json",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(transport.is_ok());
    }
}
