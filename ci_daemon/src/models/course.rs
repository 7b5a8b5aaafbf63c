//! ci.course: Course (organization) settings the daemon needs to build labs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::owner::OwnerKey;
use crate::models::trigger::{BuildRequest, TriggerKind};

/// Repository suffix and folder for individual lab repositories.
pub const STANDARD_REPO_NAME: &str = "labs";
/// Folder name used for group repositories.
pub const GROUPS_REPO_NAME: &str = "glabs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub name: String,
    pub admin_token: String,
    #[serde(default)]
    pub base_path: Option<String>,
    pub secret: String,
    #[serde(default)]
    pub individual_labs: Vec<String>,
    #[serde(default)]
    pub group_labs: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
    /// Group repository name → group id.
    #[serde(default)]
    pub groups: BTreeMap<String, i64>,
}

/// Who a build is for, resolved from a course and a user or repo name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    Member { username: String },
    Group { name: String, id: i64 },
}

impl Course {
    pub fn base_folder(&self) -> String {
        let base = self
            .base_path
            .clone()
            .unwrap_or_else(|| format!("/testground/src/github.com/{}/", self.name));
        if base.ends_with('/') {
            base
        } else {
            format!("{base}/")
        }
    }

    pub fn is_member(&self, username: &str) -> bool {
        self.members.iter().any(|m| m == username)
    }

    /// Resolve a name given to a manual trigger.
    pub fn target_for_name(&self, name: &str) -> Option<BuildTarget> {
        if self.is_member(name) {
            return Some(BuildTarget::Member {
                username: name.to_string(),
            });
        }
        self.groups.get(name).map(|&id| BuildTarget::Group {
            name: name.to_string(),
            id,
        })
    }

    /// Resolve the repository a push was delivered for.
    pub fn target_for_repo(&self, repo: &str) -> Option<BuildTarget> {
        if let Some(&id) = self.groups.get(repo) {
            return Some(BuildTarget::Group {
                name: repo.to_string(),
                id,
            });
        }
        let username = repo.strip_suffix(&format!("-{STANDARD_REPO_NAME}"))?;
        self.is_member(username).then(|| BuildTarget::Member {
            username: username.to_string(),
        })
    }

    /// Lab folders available to the target.
    pub fn labs_for(&self, target: &BuildTarget) -> &[String] {
        match target {
            BuildTarget::Member { .. } => &self.individual_labs,
            BuildTarget::Group { .. } => &self.group_labs,
        }
    }

    /// Lab numbers are 1-based positions in the lab folder list.
    pub fn lab_number(&self, target: &BuildTarget, folder: &str) -> Option<i32> {
        self.labs_for(target)
            .iter()
            .position(|l| l == folder)
            .map(|i| i as i32 + 1)
    }

    pub fn lab_folder(&self, target: &BuildTarget, number: i32) -> Option<&str> {
        let idx = usize::try_from(number).ok()?.checked_sub(1)?;
        self.labs_for(target).get(idx).map(String::as_str)
    }

    /// Owner record that holds the target's history in this course.
    pub fn owner_key(&self, target: &BuildTarget) -> OwnerKey {
        match target {
            BuildTarget::Member { username } => OwnerKey::user(username),
            BuildTarget::Group { id, .. } => OwnerKey::group(&self.name, *id),
        }
    }

    /// Everything a run needs to build lab `number` for `target`.
    pub fn build_request(
        &self,
        target: &BuildTarget,
        number: i32,
        trigger: TriggerKind,
    ) -> Option<BuildRequest> {
        let lab_folder = self.lab_folder(target, number)?;
        Some(BuildRequest {
            org: self.name.clone(),
            user: target.user().to_string(),
            group: target.group_id(),
            repo: target.repo(),
            base_folder: self.base_folder(),
            lab_folder: lab_folder.to_string(),
            lab_number: number,
            admin_token: self.admin_token.clone(),
            dest_folder: target.dest_folder().to_string(),
            secret: self.secret.clone(),
            trigger,
        })
    }
}

impl BuildTarget {
    pub fn repo(&self) -> String {
        match self {
            BuildTarget::Member { username } => format!("{username}-{STANDARD_REPO_NAME}"),
            BuildTarget::Group { name, .. } => name.clone(),
        }
    }

    pub fn dest_folder(&self) -> &'static str {
        match self {
            BuildTarget::Member { .. } => STANDARD_REPO_NAME,
            BuildTarget::Group { .. } => GROUPS_REPO_NAME,
        }
    }

    pub fn user(&self) -> &str {
        match self {
            BuildTarget::Member { username } => username,
            BuildTarget::Group { name, .. } => name,
        }
    }

    pub fn group_id(&self) -> i64 {
        match self {
            BuildTarget::Member { .. } => 0,
            BuildTarget::Group { id, .. } => *id,
        }
    }
}
