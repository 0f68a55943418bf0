use crate::auth::{self, Principal, Role};
use crate::errors::AppError;
use crate::model::admin::{NewClassSubject, NewEnrollment};
use crate::schema::{
    class_subjects::dsl as cs_dsl, classes::dsl as classes_dsl, enrollments::dsl as enr_dsl,
    roles::dsl as roles_dsl, subjects::dsl as subjects_dsl, users::dsl as users_dsl,
};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::{info, warn};

/// Assigns `teacher_id` to the (class, subject) pair, replacing the current
/// teacher when the pair is already assigned. Returns the assignment id.
pub fn upsert_assignment(
    conn: &mut PgConnection,
    actor: &Principal,
    assignment: NewClassSubject,
) -> Result<i64, AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        ensure_class_exists(tx, assignment.class_id)?;
        ensure_subject_exists(tx, assignment.subject_id)?;
        auth::ensure_user_role(tx, assignment.teacher_id, Role::Teacher)?;

        let id = diesel::insert_into(cs_dsl::class_subjects)
            .values(&assignment)
            .on_conflict((cs_dsl::class_id, cs_dsl::subject_id))
            .do_update()
            .set(cs_dsl::teacher_id.eq(assignment.teacher_id))
            .returning(cs_dsl::id)
            .get_result::<i64>(tx)?;

        info!(
            "Class {} / subject {} assigned to teacher {} (class subject {})",
            assignment.class_id, assignment.subject_id, assignment.teacher_id, id
        );
        Ok(id)
    })
}

/// Points an existing assignment at another teacher. Enrollments and grades
/// stay attached to the same assignment id.
pub fn reassign_teacher(
    conn: &mut PgConnection,
    actor: &Principal,
    class_subject_id: i64,
    teacher_id: i64,
) -> Result<(), AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        auth::ensure_user_role(tx, teacher_id, Role::Teacher)?;

        let rows_affected = diesel::update(cs_dsl::class_subjects.find(class_subject_id))
            .set(cs_dsl::teacher_id.eq(teacher_id))
            .execute(tx)?;

        match rows_affected {
            0 => Err(AppError::NotFound(format!(
                "Class subject with ID {} not found.",
                class_subject_id
            ))),
            _ => {
                info!(
                    "Class subject {} reassigned to teacher {}",
                    class_subject_id, teacher_id
                );
                Ok(())
            }
        }
    })
}

/// Enrolls one student into an assignment.
pub fn enroll_student(
    conn: &mut PgConnection,
    actor: &Principal,
    class_subject_id: i64,
    student_id: i64,
) -> Result<i64, AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        ensure_assignment_exists(tx, class_subject_id)?;
        auth::ensure_user_role(tx, student_id, Role::Student)?;

        let enrollment = NewEnrollment {
            student_id,
            class_subject_id,
        };
        let id = diesel::insert_into(enr_dsl::enrollments)
            .values(&enrollment)
            .returning(enr_dsl::id)
            .get_result::<i64>(tx)
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    warn!(
                        "Student {} already enrolled in class subject {}",
                        student_id, class_subject_id
                    );
                    AppError::Conflict(format!(
                        "Student with ID {} is already enrolled.",
                        student_id
                    ))
                }
                other => AppError::from(other),
            })?;

        info!(
            "Student {} enrolled in class subject {} (enrollment {})",
            student_id, class_subject_id, id
        );
        Ok(id)
    })
}

/// Enrolls every student of the assignment's class who is not enrolled yet.
/// Returns the number of new enrollments.
pub fn enroll_class(
    conn: &mut PgConnection,
    actor: &Principal,
    class_subject_id: i64,
) -> Result<usize, AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        let class_id = cs_dsl::class_subjects
            .find(class_subject_id)
            .select(cs_dsl::class_id)
            .first::<i64>(tx)
            .optional()?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Class subject with ID {} not found.",
                    class_subject_id
                ))
            })?;

        let student_ids = users_dsl::users
            .inner_join(roles_dsl::roles.on(roles_dsl::id.eq(users_dsl::role_id)))
            .filter(users_dsl::class_id.eq(class_id))
            .filter(roles_dsl::code.eq(Role::Student.code()))
            .select(users_dsl::id)
            .load::<i64>(tx)?;

        let new_rows: Vec<NewEnrollment> = student_ids
            .into_iter()
            .map(|student_id| NewEnrollment {
                student_id,
                class_subject_id,
            })
            .collect();
        if new_rows.is_empty() {
            info!("Class {} has no students to enroll", class_id);
            return Ok(0);
        }

        let inserted = diesel::insert_into(enr_dsl::enrollments)
            .values(&new_rows)
            .on_conflict((enr_dsl::student_id, enr_dsl::class_subject_id))
            .do_nothing()
            .execute(tx)?;

        info!(
            "Enrolled {} students of class {} into class subject {}",
            inserted, class_id, class_subject_id
        );
        Ok(inserted)
    })
}

fn ensure_class_exists(tx: &mut PgConnection, class_id: i64) -> Result<(), AppError> {
    let found = diesel::select(exists(classes_dsl::classes.find(class_id))).get_result::<bool>(tx)?;
    if found {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "Class with ID {} not found.",
            class_id
        )))
    }
}

fn ensure_subject_exists(tx: &mut PgConnection, subject_id: i64) -> Result<(), AppError> {
    let found =
        diesel::select(exists(subjects_dsl::subjects.find(subject_id))).get_result::<bool>(tx)?;
    if found {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "Subject with ID {} not found.",
            subject_id
        )))
    }
}

fn ensure_assignment_exists(tx: &mut PgConnection, class_subject_id: i64) -> Result<(), AppError> {
    let found = diesel::select(exists(cs_dsl::class_subjects.find(class_subject_id)))
        .get_result::<bool>(tx)?;
    if found {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "Class subject with ID {} not found.",
            class_subject_id
        )))
    }
}
