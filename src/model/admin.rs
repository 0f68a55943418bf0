use crate::schema::{class_subjects, classes, enrollments, subjects, users};
use diesel::{AsChangeset, Insertable, Queryable};
use serde::{Deserialize, Serialize};

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role_id: i64,
    pub class_id: Option<i64>,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = users, treat_none_as_null = true)]
pub struct UserChangeset {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role_id: i64,
    pub class_id: Option<i64>,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = classes)]
pub struct NewClass {
    pub grade_year: i32,
    pub name_letter: String,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = subjects)]
pub struct NewSubject {
    pub name: String,
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = class_subjects)]
pub struct NewClassSubject {
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
}

#[derive(Insertable, Debug, Clone, Copy)]
#[diesel(table_name = enrollments)]
pub struct NewEnrollment {
    pub student_id: i64,
    pub class_subject_id: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable, PartialEq)]
pub struct RoleItem {
    pub id: i64,
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable, PartialEq)]
pub struct ClassItem {
    pub id: i64,
    pub grade_year: i32,
    pub name_letter: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable, PartialEq)]
pub struct SubjectItem {
    pub id: i64,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserListItem {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub class_name: Option<String>,
    pub has_photo: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable)]
pub struct UserDetails {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub role_id: i64,
    pub class_id: Option<i64>,
}

/// Choices offered by the user create form.
#[derive(Serialize, Deserialize, Debug)]
pub struct UserFormOptions {
    pub roles: Vec<RoleItem>,
    pub classes: Vec<ClassItem>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserEditData {
    pub user: UserDetails,
    pub roles: Vec<RoleItem>,
    pub classes: Vec<ClassItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClassListItem {
    pub id: i64,
    pub grade_year: i32,
    pub name_letter: String,
    pub student_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubjectListItem {
    pub id: i64,
    pub name: String,
    pub assignment_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignmentItem {
    pub id: i64,
    pub class_id: i64,
    pub class_name: String,
    pub subject_id: i64,
    pub subject_name: String,
    pub teacher_id: i64,
    pub teacher_name: String,
    pub enrollment_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable)]
pub struct TeacherOption {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AssignmentsPage {
    pub assignments: Vec<AssignmentItem>,
    pub classes: Vec<ClassItem>,
    pub subjects: Vec<SubjectItem>,
    pub teachers: Vec<TeacherOption>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable)]
pub struct StudentOption {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrollmentItem {
    pub id: i64,
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub grade_count: i64,
}

/// Assignment edit page: the teacher form plus enrollment management.
#[derive(Serialize, Deserialize, Debug)]
pub struct AssignmentEditData {
    pub assignment: AssignmentItem,
    pub teachers: Vec<TeacherOption>,
    pub enrollments: Vec<EnrollmentItem>,
    pub students: Vec<StudentOption>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct SubjectDetailsResponse {
    pub subject: SubjectItem,
    pub assignments: Vec<AssignmentItem>,
    pub enrollment_count: i64,
}

/// Row counts removed by a bulk clear operation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearSummary {
    pub assignments_removed: usize,
    pub enrollments_removed: usize,
    pub grades_removed: usize,
}
