//! Bulk-update endpoint routing

use crate::error::{Error, Result};

const KINDS: &[&str] = &["account", "visitor"];
const GROUP: &str = "custom";

/// Where a stream's batches are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Metadata kind (`account` or `visitor`)
    pub kind: &'static str,
    /// Path relative to the destination base URL
    pub path: String,
}

impl Endpoint {
    /// Route a stream by the last metadata kind its name contains
    pub fn for_stream(stream: &str) -> Result<Self> {
        let kind = KINDS
            .iter()
            .rev()
            .find(|kind| stream.contains(**kind))
            .copied()
            .ok_or_else(|| {
                Error::config(format!(
                    "Stream '{stream}' names no metadata kind (expected one of: {})",
                    KINDS.join(", ")
                ))
            })?;

        Ok(Self {
            kind,
            path: format!("/api/v1/metadata/{kind}/{GROUP}/value"),
        })
    }

    /// Full URL under `base_url`
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path)
    }
}
