use serde::{Deserialize, Serialize};

/// Select and number fields arrive as text from HTML forms (an unselected
/// `<select>` posts an empty string), so ids and years are parsed by the
/// handler and a bad value becomes a notice instead of a rejected body.
#[derive(Serialize, Deserialize, Debug)]
pub struct CreateUserForm {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role_id: String,
    #[serde(default)]
    pub class_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EditUserForm {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role_id: String,
    #[serde(default)]
    pub class_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClassForm {
    #[serde(default)]
    pub grade_year: String,
    pub name_letter: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubjectForm {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AssignmentForm {
    #[serde(default)]
    pub class_id: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub teacher_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ReassignTeacherForm {
    #[serde(default)]
    pub teacher_id: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EnrollStudentForm {
    #[serde(default)]
    pub student_id: String,
}
