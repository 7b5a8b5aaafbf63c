//! ci.owner: Users and groups that own build histories.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::ci_owners;

/// Returned by [`Owner::last_build_id`] when a lab has no builds yet.
pub const NO_BUILD: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OwnerKey {
    User { username: String },
    Group { course: String, id: i64 },
}

impl OwnerKey {
    pub fn user(username: &str) -> Self {
        Self::User {
            username: username.to_string(),
        }
    }

    pub fn group(course: &str, id: i64) -> Self {
        Self::Group {
            course: course.to_string(),
            id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OwnerKey::User { .. } => "user",
            OwnerKey::Group { .. } => "group",
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerKey::User { username } => write!(f, "user/{username}"),
            OwnerKey::Group { course, id } => write!(f, "group/{course}/{id}"),
        }
    }
}

/// Build history and approval state for one lab.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assignment {
    pub builds: Vec<i64>,
    pub approved_build: Option<i64>,
    pub approve_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
}

/// Per-course progress of an owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseHistory {
    pub current_lab_num: i32,
    pub assignments: BTreeMap<i32, Assignment>,
}

impl Default for CourseHistory {
    fn default() -> Self {
        Self {
            current_lab_num: 1,
            assignments: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub key: OwnerKey,
    pub courses: BTreeMap<String, CourseHistory>,
}

impl Owner {
    pub fn new(key: OwnerKey) -> Self {
        Self {
            key,
            courses: BTreeMap::new(),
        }
    }

    fn assignment_mut(&mut self, course: &str, lab: i32) -> &mut Assignment {
        self.courses
            .entry(course.to_string())
            .or_default()
            .assignments
            .entry(lab)
            .or_default()
    }

    pub fn assignment(&self, course: &str, lab: i32) -> Option<&Assignment> {
        self.courses.get(course)?.assignments.get(&lab)
    }

    /// Append a build id to the lab's history.
    pub fn add_build_result(&mut self, course: &str, lab: i32, build_id: i64) {
        self.assignment_mut(course, lab).builds.push(build_id);
    }

    /// Most recent build id for the lab, or [`NO_BUILD`].
    pub fn last_build_id(&self, course: &str, lab: i32) -> i64 {
        self.assignment(course, lab)
            .and_then(|a| a.builds.last().copied())
            .unwrap_or(NO_BUILD)
    }

    pub fn current_lab_num(&self, course: &str) -> i32 {
        self.courses
            .get(course)
            .map(|c| c.current_lab_num)
            .unwrap_or(1)
    }

    /// Mark a build as the approved one and move the owner past the lab.
    pub fn set_approved_build(&mut self, course: &str, lab: i32, build_id: i64, date: DateTime<Utc>) {
        let assignment = self.assignment_mut(course, lab);
        assignment.approved_build = Some(build_id);
        assignment.approve_date = Some(date);

        let history = self.courses.entry(course.to_string()).or_default();
        if history.current_lab_num <= lab {
            history.current_lab_num = lab + 1;
        }
    }

    pub fn set_notes(&mut self, course: &str, lab: i32, notes: &str) {
        self.assignment_mut(course, lab).notes = notes.to_string();
    }

    pub fn notes(&self, course: &str, lab: i32) -> &str {
        self.assignment(course, lab)
            .map(|a| a.notes.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ci_owners)]
pub struct CiOwnerRow {
    pub owner_key: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub write_date: DateTime<Utc>,
}
