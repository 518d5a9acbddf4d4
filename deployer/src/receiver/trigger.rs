//! Inbound trigger payloads

use serde::Deserialize;

use crate::errors::DeployerError;
use crate::queue::TriggerSource;

const MAX_TARGET_LEN: usize = 128;
const MAX_IMAGE_REF_LEN: usize = 255;

/// Body of a deployment trigger
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerPayload {
    pub target: String,
    pub image_ref: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub delivery_id: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

impl TriggerPayload {
    /// Parse and validate a JSON trigger body
    pub fn parse(body: &[u8]) -> Result<Self, DeployerError> {
        if body.is_empty() {
            return Err(DeployerError::ValidationError("empty trigger body".to_string()));
        }
        let mut payload: TriggerPayload = serde_json::from_slice(body)
            .map_err(|e| DeployerError::ValidationError(format!("malformed trigger: {}", e)))?;
        payload.target = payload.target.trim().to_string();
        payload.image_ref = payload.image_ref.trim().to_string();
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<(), DeployerError> {
        if self.target.is_empty() {
            return Err(DeployerError::ValidationError("target is required".to_string()));
        }
        if self.target.len() > MAX_TARGET_LEN || self.target.chars().any(char::is_whitespace) {
            return Err(DeployerError::ValidationError(format!(
                "invalid target name '{}'",
                self.target
            )));
        }
        validate_image_ref(&self.image_ref)
    }

    pub fn trigger_source(&self) -> TriggerSource {
        TriggerSource {
            source: self.source.clone(),
            delivery_id: self.delivery_id.clone(),
            commit: self.commit.clone(),
        }
    }
}

/// An image reference must name a repository and pin a tag or digest
fn validate_image_ref(image_ref: &str) -> Result<(), DeployerError> {
    if image_ref.is_empty() {
        return Err(DeployerError::ValidationError("image_ref is required".to_string()));
    }
    if image_ref.len() > MAX_IMAGE_REF_LEN
        || image_ref
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(DeployerError::ValidationError(format!(
            "invalid image_ref '{}'",
            image_ref
        )));
    }

    let (repository, reference) = match image_ref.split_once('@') {
        Some((repository, digest)) => (repository, digest),
        None => {
            let name_start = image_ref.rfind('/').map_or(0, |i| i + 1);
            match image_ref[name_start..].rfind(':') {
                Some(i) => (
                    &image_ref[..name_start + i],
                    &image_ref[name_start + i + 1..],
                ),
                None => (image_ref, ""),
            }
        }
    };

    if repository.is_empty() || repository.ends_with('/') {
        return Err(DeployerError::ValidationError(format!(
            "image_ref '{}' has no repository",
            image_ref
        )));
    }
    // the reference lands in docker argv and must never parse as an option
    if repository.starts_with('-') || repository.contains('=') {
        return Err(DeployerError::ValidationError(format!(
            "invalid repository in image_ref '{}'",
            image_ref
        )));
    }
    if reference.is_empty() {
        return Err(DeployerError::ValidationError(format!(
            "image_ref '{}' must pin a tag or digest",
            image_ref
        )));
    }
    Ok(())
}
