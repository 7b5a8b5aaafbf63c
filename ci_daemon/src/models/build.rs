//! ci.build.result: The durable record of one build run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::ci_build_results;

/// Status given to a fresh result when no prior result exists for the lab.
pub const ACTIVE_LAB_STATUS: &str = "Active lab assignment";

/// One structured score line emitted by a lab's test script.
///
/// The field names follow the JSON the grading kit prints, so the test
/// scripts need no changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TestScore {
    #[serde(default, skip_serializing)]
    pub secret: String,
    pub test_name: String,
    pub score: i64,
    pub max_score: i64,
    pub weight: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub id: i64,
    pub course: String,
    pub user: String,
    pub labnum: i32,
    pub log: Vec<String>,
    #[serde(default)]
    pub test_scores: BTreeMap<String, TestScore>,
    pub num_passes: u32,
    pub num_fails: u32,
    /// Steps or log markers that reported an infrastructure failure.
    #[serde(default)]
    pub build_failures: u32,
    pub total_score: i32,
    pub build_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub push_time: DateTime<Utc>,
    pub status: String,
}

impl BuildResult {
    /// Fresh result for a run starting now.
    pub fn new(id: i64, course: &str, user: &str, labnum: i32) -> Self {
        let now = Utc::now();
        Self {
            id,
            course: course.to_string(),
            user: user.to_string(),
            labnum,
            log: Vec::new(),
            test_scores: BTreeMap::new(),
            num_passes: 0,
            num_fails: 0,
            build_failures: 0,
            total_score: 0,
            build_time_ms: 0,
            timestamp: now,
            push_time: now,
            status: ACTIVE_LAB_STATUS.to_string(),
        }
    }

    /// Copy of the result without its log, for summary views.
    pub fn summary(&self) -> BuildSummary {
        BuildSummary {
            id: self.id,
            course: self.course.clone(),
            user: self.user.clone(),
            labnum: self.labnum,
            num_passes: self.num_passes,
            num_fails: self.num_fails,
            total_score: self.total_score,
            build_time_ms: self.build_time_ms,
            timestamp: self.timestamp,
            push_time: self.push_time,
            status: self.status.clone(),
        }
    }
}

/// A build result with the log stripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildSummary {
    pub id: i64,
    pub course: String,
    pub user: String,
    pub labnum: i32,
    pub num_passes: u32,
    pub num_fails: u32,
    pub total_score: i32,
    pub build_time_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub push_time: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = ci_build_results)]
pub struct CiBuildResultRow {
    pub id: i64,
    pub course: String,
    pub username: String,
    pub labnum: i32,
    pub payload: Option<serde_json::Value>,
    pub create_date: Option<DateTime<Utc>>,
    pub write_date: Option<DateTime<Utc>>,
}
