use crate::campaign::runner::CampaignError;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hard cap on decoded media size. Checked before a run starts, never
/// mid-flight.
pub const MAX_MEDIA_BYTES: usize = 16 * 1024 * 1024;

/// Media carried by every message of a campaign, transported as base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub name: String,
    pub mime: String,
    pub data_base64: String,
}

impl MediaPayload {
    /// Validate transport fields and return the decoded size.
    pub fn validate(&self) -> Result<usize, CampaignError> {
        if self.name.trim().is_empty() {
            return Err(CampaignError::MediaInvalid("file name is empty".into()));
        }
        if self.data_base64.trim().is_empty() {
            return Err(CampaignError::MediaInvalid("payload is empty".into()));
        }
        let bytes = self.decode()?;
        if bytes.len() > MAX_MEDIA_BYTES {
            return Err(CampaignError::MediaTooLarge { size: bytes.len() });
        }
        Ok(bytes.len())
    }

    pub fn decode(&self) -> Result<Vec<u8>, CampaignError> {
        BASE64
            .decode(self.data_base64.trim())
            .map_err(|e| CampaignError::MediaInvalid(e.to_string()))
    }

    /// Write the payload to a temp file the file-input flow can reference.
    /// Done once per campaign; the file is removed when the handle drops.
    pub fn materialize(&self) -> Result<TempMedia> {
        let bytes = self
            .decode()
            .map_err(|e| anyhow::anyhow!(e.to_string()))
            .context("Failed to decode media payload")?;
        let file_name = format!(
            "zap-campaigner-{}-{}",
            std::process::id(),
            sanitize_file_name(&self.name)
        );
        let path = std::env::temp_dir().join(file_name);
        std::fs::write(&path, &bytes)
            .with_context(|| format!("Failed to write media to {}", path.display()))?;
        Ok(TempMedia { path })
    }
}

/// A materialized media file, deleted on drop.
#[derive(Debug)]
pub struct TempMedia {
    pub path: PathBuf,
}

impl Drop for TempMedia {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "payload.bin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(data: &[u8]) -> MediaPayload {
        MediaPayload {
            name: "oferta.png".into(),
            mime: "image/png".into(),
            data_base64: BASE64.encode(data),
        }
    }

    #[test]
    fn validate_accepts_small_payload() {
        let p = payload(b"png-bytes");
        assert_eq!(p.validate().unwrap(), 9);
    }

    #[test]
    fn validate_rejects_oversized_payload() {
        let p = payload(&vec![0u8; MAX_MEDIA_BYTES + 1]);
        match p.validate() {
            Err(CampaignError::MediaTooLarge { size }) => assert_eq!(size, MAX_MEDIA_BYTES + 1),
            other => panic!("expected MediaTooLarge, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn validate_rejects_bad_base64_and_empty() {
        let mut p = payload(b"x");
        p.data_base64 = "not//valid@@base64!!".into();
        assert!(matches!(p.validate(), Err(CampaignError::MediaInvalid(_))));

        let mut p = payload(b"x");
        p.data_base64 = "  ".into();
        assert!(matches!(p.validate(), Err(CampaignError::MediaInvalid(_))));

        let mut p = payload(b"x");
        p.name = "".into();
        assert!(matches!(p.validate(), Err(CampaignError::MediaInvalid(_))));
    }

    #[test]
    fn materialize_writes_and_drop_removes() {
        let p = payload(b"conteudo do arquivo");
        let temp = p.materialize().unwrap();
        let path = temp.path.clone();
        assert_eq!(std::fs::read(&path).unwrap(), b"conteudo do arquivo");
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name(""), "payload.bin");
    }
}
