use crate::schema::grades;
use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable};
use serde::{Deserialize, Serialize};

#[derive(Insertable, Debug)]
#[diesel(table_name = grades)]
pub struct NewGrade {
    pub enrollment_id: i64,
    pub teacher_id: i64,
    pub grade_value: i16,
    pub note: Option<String>,
    // graded_at has a DB default (NOW())
}

#[derive(Serialize, Deserialize, Debug, Clone, Queryable, PartialEq)]
pub struct Grade {
    pub id: i64,
    pub enrollment_id: i64,
    /// `None` once the recording teacher has been deleted.
    pub teacher_id: Option<i64>,
    pub grade_value: i16,
    pub note: Option<String>,
    pub graded_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TeacherClassSubject {
    pub class_subject_id: i64,
    pub grade_year: i32,
    pub name_letter: String,
    pub class_name: String,
    pub subject_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnrolledStudent {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub last_grade: Option<i16>,
    pub last_graded_at: Option<DateTime<Utc>>,
    pub grades: Vec<Grade>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClassSubjectView {
    pub class_subject: TeacherClassSubject,
    pub students: Vec<EnrolledStudent>,
    pub sort: String,
    pub dir: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EnrollmentGradesView {
    pub enrollment_id: i64,
    pub class_subject_id: i64,
    pub student_name: String,
    pub class_name: String,
    pub subject_name: String,
    pub current_grade: Option<Grade>,
    pub grades: Vec<Grade>,
}
