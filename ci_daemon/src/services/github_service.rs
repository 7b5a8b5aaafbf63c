//! GitHub integration: webhook validation, push payloads, clone URLs.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Validate a GitHub webhook signature (X-Hub-Signature-256).
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured, skipping validation");
        return true;
    }

    let sig = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = match hex::decode(sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Authenticated HTTPS clone URL for a repository in a course organization.
pub fn clone_url(token: &str, host: &str, org: &str, repo: &str) -> String {
    format!("https://{token}:x-oauth-basic@{host}/{org}/{repo}.git")
}

/// The parts of a push payload the daemon reads.
#[derive(Debug, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    pub repository: PushRepository,
}

#[derive(Debug, Deserialize)]
pub struct PushRepository {
    pub name: String,
    pub owner: PushOwner,
}

#[derive(Debug, Deserialize)]
pub struct PushOwner {
    pub login: String,
}

impl PushEvent {
    pub fn org(&self) -> &str {
        &self.repository.owner.login
    }

    pub fn repo(&self) -> &str {
        &self.repository.name
    }
}
