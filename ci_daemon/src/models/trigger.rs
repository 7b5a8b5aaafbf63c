//! ci.build.request: Everything one build run needs, fixed at dispatch.

use serde::{Deserialize, Serialize};

/// How the build was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Delivered by a repository push webhook.
    Push,
    /// Requested through the API by course staff or a member.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub org: String,
    pub user: String,
    /// 0 for an individual build.
    pub group: i64,
    pub repo: String,
    pub base_folder: String,
    pub lab_folder: String,
    pub lab_number: i32,
    #[serde(skip_serializing)]
    pub admin_token: String,
    pub dest_folder: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub trigger: TriggerKind,
}

impl BuildRequest {
    pub fn is_push(&self) -> bool {
        self.trigger == TriggerKind::Push
    }

    pub fn is_group(&self) -> bool {
        self.group > 0
    }
}
