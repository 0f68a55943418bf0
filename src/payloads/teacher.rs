use serde::{Deserialize, Serialize};

/// Raw grade entry form. Numbers are parsed by the grading rules so that
/// malformed input produces a validation notice instead of a bare rejection.
#[derive(Serialize, Deserialize, Debug)]
pub struct AddGradeForm {
    #[serde(default)]
    pub enrollment_id: String,
    #[serde(default)]
    pub grade_value: String,
    #[serde(default)]
    pub note: Option<String>,
}
