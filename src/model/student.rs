use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StudentGrade {
    pub id: i64,
    pub grade_value: i16,
    pub note: Option<String>,
    pub graded_at: DateTime<Utc>,
    pub graded_at_display: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StudentGradesView {
    /// Subject name → grades in display order. Subjects without grades map
    /// to an empty list.
    pub grouped_grades: BTreeMap<String, Vec<StudentGrade>>,
    pub sort: String,
    pub dir: String,
}
