use super::helper::{self, RedirectResult};
use crate::AppState;
use crate::auth::{Principal, Role};
use crate::domain::grading::{self, GradeEntry};
use crate::domain::grouping::{self, GradeSort};
use crate::errors::AppError;
use crate::model::teacher::{
    ClassSubjectView, EnrolledStudent, EnrollmentGradesView, Grade, TeacherClassSubject,
};
use crate::notification;
use crate::payloads::student::GradeSortParams;
use crate::payloads::teacher::AddGradeForm;
use crate::presentation::{Notice, class_name};
use crate::schema::{
    class_subjects::dsl as cs_dsl, classes::dsl as classes_dsl, enrollments::dsl as enr_dsl,
    grades::dsl as grades_dsl, subjects::dsl as subjects_dsl, users::dsl as users_dsl,
};
use crate::session::CurrentSession;
use axum::Form;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use diesel::prelude::*;
use tracing::{debug, info, instrument, warn};

const TEACHER_HOME: &str = "/teacher";

/// Lists the class subjects taught by the signed-in teacher.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<Vec<TeacherClassSubject>>`: Ordered by class, then subject (200 OK).
/// * `303 See Other`: If the requester is not signed in as a teacher.
#[instrument(skip(state, session))]
pub async fn list_class_subjects(
    State(state): State<AppState>,
    session: CurrentSession,
) -> helper::PageResult<Vec<TeacherClassSubject>> {
    let actor = session.require(Role::Teacher)?;
    let teacher_id = actor.id;
    info!("Fetching class subjects of teacher {}", teacher_id);

    let rows = helper::run_query(&state.pool, move |conn| {
        cs_dsl::class_subjects
            .inner_join(classes_dsl::classes)
            .inner_join(subjects_dsl::subjects)
            .filter(cs_dsl::teacher_id.eq(teacher_id))
            .select((
                cs_dsl::id,
                classes_dsl::grade_year,
                classes_dsl::name_letter,
                subjects_dsl::name,
            ))
            .order((
                classes_dsl::grade_year,
                classes_dsl::name_letter,
                subjects_dsl::name,
            ))
            .load::<(i64, i32, String, String)>(conn)
    })
    .await?;

    let class_subjects: Vec<TeacherClassSubject> = rows
        .into_iter()
        .map(
            |(class_subject_id, grade_year, name_letter, subject_name)| TeacherClassSubject {
                class_subject_id,
                class_name: class_name(grade_year, &name_letter),
                grade_year,
                name_letter,
                subject_name,
            },
        )
        .collect();

    info!(
        "Teacher {} teaches {} class subjects",
        teacher_id,
        class_subjects.len()
    );
    helper::page(&state, session, class_subjects).await
}

/// Students enrolled in one of the teacher's class subjects, each with their
/// grades in the requested order and a summary of the current grade.
///
/// Query Parameters:
/// * `sort`: `grade_value` or `graded_at` (default).
/// * `dir`: `asc` (default) or `desc`.
///
/// Returns
/// * `PageView<ClassSubjectView>` wrapped in `ApiResponse` (200 OK).
/// * `303 See Other` to the teacher home with an error notice if the class
///   subject does not exist or is taught by someone else.
#[instrument(skip(state, session, params))]
pub async fn class_subject_students(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_subject_id): Path<i64>,
    Query(params): Query<GradeSortParams>,
) -> Result<Response, AppError> {
    let actor = session.require(Role::Teacher)?;
    let sort = GradeSort::from_params(params.sort.as_deref(), params.dir.as_deref());
    debug!("Class subject {} requested with {:?}", class_subject_id, sort);

    let view = helper::run_transaction(&state.pool, move |conn| {
        let class_subject = owned_class_subject(conn, &actor, class_subject_id)?;

        let students = enr_dsl::enrollments
            .inner_join(users_dsl::users)
            .filter(enr_dsl::class_subject_id.eq(class_subject_id))
            .select((
                enr_dsl::id,
                enr_dsl::student_id,
                users_dsl::first_name,
                users_dsl::last_name,
            ))
            .order((users_dsl::last_name, users_dsl::first_name, enr_dsl::id))
            .load::<(i64, i64, String, String)>(conn)?;

        let graded_rows = enr_dsl::enrollments
            .left_join(grades_dsl::grades)
            .filter(enr_dsl::class_subject_id.eq(class_subject_id))
            .select((
                enr_dsl::id,
                (
                    grades_dsl::id,
                    grades_dsl::enrollment_id,
                    grades_dsl::teacher_id,
                    grades_dsl::grade_value,
                    grades_dsl::note,
                    grades_dsl::graded_at,
                )
                    .nullable(),
            ))
            .load::<(i64, Option<Grade>)>(conn)?;
        let mut grouped = grouping::group_grades(graded_rows, sort);

        let students = students
            .into_iter()
            .map(|(enrollment_id, student_id, first_name, last_name)| {
                let grades = grouped.remove(&enrollment_id).unwrap_or_default();
                let current = grouping::current_grade(&grades);
                EnrolledStudent {
                    enrollment_id,
                    student_id,
                    first_name,
                    last_name,
                    last_grade: current.map(|grade| grade.grade_value),
                    last_graded_at: current.map(|grade| grade.graded_at),
                    grades,
                }
            })
            .collect::<Vec<_>>();

        Ok(ClassSubjectView {
            class_subject,
            students,
            sort: sort.key_name().to_string(),
            dir: sort.dir_name().to_string(),
        })
    })
    .await;

    match view {
        Ok(view) => {
            info!(
                "Class subject {} lists {} students",
                class_subject_id,
                view.students.len()
            );
            Ok(helper::page(&state, session, view).await?.into_response())
        }
        Err(e) => Ok(helper::redirect_with(&state, session, TEACHER_HOME, Err(e))
            .await?
            .into_response()),
    }
}

/// Full grade history of one enrollment in one of the teacher's class
/// subjects.
///
/// Query Parameters:
/// * `sort`, `dir`: As for the class subject listing.
///
/// Returns
/// * `PageView<EnrollmentGradesView>` wrapped in `ApiResponse` (200 OK).
/// * `303 See Other` to the teacher home with an error notice if the
///   enrollment does not exist or belongs to another teacher's class subject.
#[instrument(skip(state, session, params))]
pub async fn enrollment_grades(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(enrollment_id): Path<i64>,
    Query(params): Query<GradeSortParams>,
) -> Result<Response, AppError> {
    let actor = session.require(Role::Teacher)?;
    let sort = GradeSort::from_params(params.sort.as_deref(), params.dir.as_deref());

    let view = helper::run_transaction(&state.pool, move |conn| {
        let (class_subject_id, first_name, last_name) = enr_dsl::enrollments
            .inner_join(users_dsl::users)
            .filter(enr_dsl::id.eq(enrollment_id))
            .select((
                enr_dsl::class_subject_id,
                users_dsl::first_name,
                users_dsl::last_name,
            ))
            .first::<(i64, String, String)>(conn)
            .optional()?
            .ok_or_else(|| {
                AppError::NotFound(format!("Enrollment with ID {} not found.", enrollment_id))
            })?;

        let class_subject = owned_class_subject(conn, &actor, class_subject_id)?;

        let mut grades = grades_dsl::grades
            .filter(grades_dsl::enrollment_id.eq(enrollment_id))
            .select((
                grades_dsl::id,
                grades_dsl::enrollment_id,
                grades_dsl::teacher_id,
                grades_dsl::grade_value,
                grades_dsl::note,
                grades_dsl::graded_at,
            ))
            .load::<Grade>(conn)?;
        grouping::sort_grades(&mut grades, sort);

        Ok(EnrollmentGradesView {
            enrollment_id,
            class_subject_id,
            student_name: format!("{} {}", first_name, last_name),
            class_name: class_subject.class_name,
            subject_name: class_subject.subject_name,
            current_grade: grouping::current_grade(&grades).cloned(),
            grades,
        })
    })
    .await;

    match view {
        Ok(view) => Ok(helper::page(&state, session, view).await?.into_response()),
        Err(e) => Ok(helper::redirect_with(&state, session, TEACHER_HOME, Err(e))
            .await?
            .into_response()),
    }
}

/// Records a grade and notifies the student.
///
/// Form Body:
/// * `enrollment_id`: The graded enrollment.
/// * `grade_value`: Whole number from 1 to 5.
/// * `note`: Optional, blank counts as absent.
///
/// The grade is committed before the notification is attempted; a failed
/// notification only adds a warning notice.
///
/// Returns
/// * `303 See Other` to the class subject page with a notice.
/// * `303 See Other` to the teacher home if the enrollment cannot be resolved.
#[instrument(skip(state, session, form))]
pub async fn add_grade(
    State(state): State<AppState>,
    mut session: CurrentSession,
    Form(form): Form<AddGradeForm>,
) -> RedirectResult {
    let actor = session.require(Role::Teacher)?;
    debug!("Add grade payload: {:?}", form);

    let entry = match GradeEntry::from_form(
        &form.enrollment_id,
        &form.grade_value,
        form.note.as_deref(),
    ) {
        Ok(entry) => entry,
        Err(e) => {
            warn!("Rejected grade entry from teacher {}: {}", actor.id, e);
            let back = return_path(&state, &actor, &form.enrollment_id).await;
            return helper::redirect_with(&state, session, &back, Err(e)).await;
        }
    };
    let enrollment_id = entry.enrollment_id;

    let recorded = {
        let actor = actor.clone();
        helper::run_transaction(&state.pool, move |conn| {
            grading::record_grade(conn, &actor, entry)
        })
        .await
    };

    let recorded = match recorded {
        Ok(recorded) => recorded,
        Err(e) => {
            let back = return_path(&state, &actor, &enrollment_id.to_string()).await;
            return helper::redirect_with(&state, session, &back, Err(e)).await;
        }
    };

    let back = format!("/teacher/class-subject/{}", recorded.class_subject_id);
    if let Err(e) = notification::dispatch(state.notifier.clone(), recorded.mail).await {
        warn!(
            "Grade {} saved but the notification failed: {}",
            recorded.grade.id, e
        );
        session
            .flash(
                &state.sessions,
                Notice::warning(format!(
                    "The grade was saved, but the student could not be notified: {}",
                    e
                )),
            )
            .await?;
    }

    helper::redirect_with(&state, session, &back, Ok(Notice::success("Grade added."))).await
}

/// Loads a class subject for display, failing unless `actor` teaches it.
fn owned_class_subject(
    conn: &mut PgConnection,
    actor: &Principal,
    class_subject_id: i64,
) -> Result<TeacherClassSubject, AppError> {
    let (teacher_id, grade_year, name_letter, subject_name) = cs_dsl::class_subjects
        .inner_join(classes_dsl::classes)
        .inner_join(subjects_dsl::subjects)
        .filter(cs_dsl::id.eq(class_subject_id))
        .select((
            cs_dsl::teacher_id,
            classes_dsl::grade_year,
            classes_dsl::name_letter,
            subjects_dsl::name,
        ))
        .first::<(i64, i32, String, String)>(conn)
        .optional()?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "Class subject with ID {} not found.",
                class_subject_id
            ))
        })?;

    if teacher_id != actor.id {
        warn!(
            "Teacher {} denied access to class subject {} of teacher {}",
            actor.id, class_subject_id, teacher_id
        );
        return Err(AppError::Forbidden(
            "You do not teach this class subject.".to_string(),
        ));
    }

    Ok(TeacherClassSubject {
        class_subject_id,
        class_name: class_name(grade_year, &name_letter),
        grade_year,
        name_letter,
        subject_name,
    })
}

/// Where to send the teacher after a failed grade entry: the class subject
/// page when the enrollment is theirs, otherwise their home page.
async fn return_path(state: &AppState, actor: &Principal, raw_enrollment_id: &str) -> String {
    let Ok(enrollment_id) = raw_enrollment_id.trim().parse::<i64>() else {
        return TEACHER_HOME.to_string();
    };
    let teacher_id = actor.id;

    let class_subject = helper::run_query(&state.pool, move |conn| {
        enr_dsl::enrollments
            .inner_join(cs_dsl::class_subjects)
            .filter(enr_dsl::id.eq(enrollment_id))
            .filter(cs_dsl::teacher_id.eq(teacher_id))
            .select(cs_dsl::id)
            .first::<i64>(conn)
            .optional()
    })
    .await;

    match class_subject {
        Ok(Some(id)) => format!("/teacher/class-subject/{}", id),
        _ => TEACHER_HOME.to_string(),
    }
}
