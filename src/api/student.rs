use super::helper::{self, PageResult};
use crate::AppState;
use crate::auth::Role;
use crate::domain::grouping::{self, GradeSort};
use crate::model::student::{StudentGrade, StudentGradesView};
use crate::payloads::student::GradeSortParams;
use crate::presentation::{DISPLAY_DATE_FORMAT, format_date};
use crate::schema::{
    class_subjects::dsl as cs_dsl, enrollments::dsl as enr_dsl, grades::dsl as grades_dsl,
    subjects::dsl as subjects_dsl,
};
use crate::session::CurrentSession;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, info, instrument};

/// The signed-in student's grades grouped by subject.
///
/// Every subject the student is enrolled in appears, with an empty list when
/// nothing has been graded yet.
///
/// Query Parameters:
/// * `sort`: `grade_value` or `graded_at` (default). Other values are ignored.
/// * `dir`: `asc` (default) or `desc`.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<StudentGradesView>` (200 OK).
/// * `303 See Other`: If the requester is not signed in as a student.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state, session, params))]
pub async fn list_grades(
    State(state): State<AppState>,
    session: CurrentSession,
    Query(params): Query<GradeSortParams>,
) -> PageResult<StudentGradesView> {
    let actor = session.require(Role::Student)?;
    let student_id = actor.id;
    let sort = GradeSort::from_params(params.sort.as_deref(), params.dir.as_deref());
    debug!("Grades of student {} requested with {:?}", student_id, sort);

    let rows = helper::run_query(&state.pool, move |conn| {
        enr_dsl::enrollments
            .inner_join(cs_dsl::class_subjects.inner_join(subjects_dsl::subjects))
            .left_join(grades_dsl::grades)
            .filter(enr_dsl::student_id.eq(student_id))
            .select((
                subjects_dsl::name,
                (
                    grades_dsl::id,
                    grades_dsl::grade_value,
                    grades_dsl::note,
                    grades_dsl::graded_at,
                )
                    .nullable(),
            ))
            .load::<(String, Option<(i64, i16, Option<String>, DateTime<Utc>)>)>(conn)
    })
    .await?;

    let rows = rows.into_iter().map(|(subject, grade)| {
        let grade = grade.map(|(id, grade_value, note, graded_at)| StudentGrade {
            id,
            grade_value,
            note,
            graded_at_display: format_date(&graded_at, DISPLAY_DATE_FORMAT),
            graded_at,
        });
        (subject, grade)
    });
    let grouped_grades = grouping::group_grades(rows, sort);

    info!(
        "Student {} has grades in {} subjects",
        student_id,
        grouped_grades.len()
    );
    helper::page(
        &state,
        session,
        StudentGradesView {
            grouped_grades,
            sort: sort.key_name().to_string(),
            dir: sort.dir_name().to_string(),
        },
    )
    .await
}
