//! Package-manager (Helm) release records.
//!
//! Helm stores every release revision in a secret labelled `owner=helm`.
//! The `release` data key holds base64 text wrapping a gzip-compressed JSON
//! document. Secret values arrive already decoded once by the API client,
//! so [`HelmRelease::decode`] takes that inner base64 text.

use std::io::Read;

use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::keys::ServiceKey;

const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Kind name used in release service keys.
pub const HELM_RELEASE_KIND: &str = "HelmRelease";

/// One package-manager release revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRelease {
    /// Release name.
    pub name: String,
    /// Release namespace.
    pub namespace: String,
    /// Revision number.
    pub version: u32,
    /// Release status (`deployed`, `failed`, `superseded`, ...).
    pub status: String,
    /// Chart name.
    pub chart_name: String,
    /// Chart version.
    pub chart_version: String,
    /// Application version declared by the chart.
    pub app_version: Option<String>,
    /// When the first revision was deployed.
    pub first_deployed: Option<DateTime<Utc>>,
    /// When this revision was deployed.
    pub last_deployed: Option<DateTime<Utc>>,
    /// Whether the release has been uninstalled.
    pub deleted: bool,
}

#[derive(Deserialize)]
struct RawRelease {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    info: RawInfo,
    chart: Option<RawChart>,
}

#[derive(Default, Deserialize)]
struct RawInfo {
    #[serde(default)]
    status: String,
    first_deployed: Option<String>,
    last_deployed: Option<String>,
    deleted: Option<String>,
}

#[derive(Deserialize)]
struct RawChart {
    metadata: Option<RawChartMetadata>,
}

#[derive(Deserialize)]
struct RawChartMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(rename = "appVersion")]
    app_version: Option<String>,
}

impl HelmRelease {
    /// Decode a release from the secret's `release` payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::ReleaseDecode` if the payload is not base64, the
    /// gzip stream is corrupt, or the JSON does not describe a release.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text: Vec<u8> = payload
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&text)
            .map_err(|e| CoreError::ReleaseDecode(format!("invalid base64: {e}")))?;

        let json = if bytes.starts_with(&GZIP_MAGIC) {
            let mut out = String::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_string(&mut out)
                .map_err(|e| CoreError::ReleaseDecode(format!("invalid gzip stream: {e}")))?;
            out
        } else {
            String::from_utf8(bytes)
                .map_err(|e| CoreError::ReleaseDecode(format!("invalid utf-8: {e}")))?
        };

        let raw: RawRelease = serde_json::from_str(&json)
            .map_err(|e| CoreError::ReleaseDecode(format!("invalid release json: {e}")))?;

        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawRelease) -> Self {
        let metadata = raw.chart.and_then(|c| c.metadata);
        let (chart_name, chart_version, app_version) = match metadata {
            Some(m) => (m.name, m.version, m.app_version),
            None => (String::new(), String::new(), None),
        };

        Self {
            name: raw.name,
            namespace: raw.namespace,
            version: raw.version,
            status: raw.info.status,
            chart_name,
            chart_version,
            app_version,
            first_deployed: parse_timestamp(raw.info.first_deployed.as_deref()),
            last_deployed: parse_timestamp(raw.info.last_deployed.as_deref()),
            deleted: raw.info.deleted.is_some_and(|d| !d.is_empty()),
        }
    }

    /// The deduplication key; all revisions of one release share it.
    #[must_use]
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(&self.namespace, HELM_RELEASE_KIND, &self.name)
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .filter(|v| !v.is_empty())
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}
