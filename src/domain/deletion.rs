//! Cascading-delete safety rules.
//!
//! Every delete runs in one transaction: the row being deleted is locked
//! `FOR UPDATE` first, so a concurrent insert of a dependent row (whose
//! foreign-key check needs a share lock on that same row) either completes
//! before the dependency count or waits until the delete has committed and
//! then fails. A foreign-key violation that still slips through is reported
//! as the same block.

use crate::auth::{self, Principal, Role};
use crate::errors::AppError;
use crate::model::admin::ClearSummary;
use crate::schema::{
    class_subjects::dsl as cs_dsl, classes::dsl as classes_dsl, enrollments::dsl as enr_dsl,
    grades::dsl as grades_dsl, subjects::dsl as subjects_dsl, users::dsl as users_dsl,
};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Why a delete was refused. State is untouched whenever one of these is
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum DeleteBlock {
    #[error("User is ADMIN and cannot be deleted.")]
    AdminUser,

    #[error("Teacher has assigned subjects.")]
    TeacherHasAssignedSubjects,

    #[error("Student has enrollments.")]
    StudentHasEnrollments,

    #[error("Subject is assigned to classes.")]
    SubjectAssignedToClasses,

    #[error("Assignment has enrollments.")]
    AssignmentHasEnrollments,

    #[error("Enrollment has grades.")]
    EnrollmentHasGrades,

    #[error("Class has students.")]
    ClassHasStudents,

    #[error("Class is assigned to subjects.")]
    ClassHasAssignments,
}

fn blocked(block: DeleteBlock) -> AppError {
    warn!("Delete blocked: {}", block);
    AppError::IntegrityBlock(block)
}

/// Maps a foreign-key violation raised by the final delete to `block`.
fn guard_foreign_key(err: DieselError, block: DeleteBlock) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => blocked(block),
        other => AppError::from(other),
    }
}

/// Deletes a user unless they are an admin or still referenced.
pub fn delete_user(conn: &mut PgConnection, actor: &Principal, user_id: i64) -> Result<(), AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        let locked = users_dsl::users
            .find(user_id)
            .select(users_dsl::id)
            .for_update()
            .first::<i64>(tx)
            .optional()?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!(
                "User with ID {} not found.",
                user_id
            )));
        }

        let role = auth::role_of(tx, user_id)?.ok_or_else(|| {
            AppError::NotFound(format!("User with ID {} not found.", user_id))
        })?;

        let fallback = match role {
            Role::Admin => return Err(blocked(DeleteBlock::AdminUser)),
            Role::Teacher => {
                let assignments = cs_dsl::class_subjects
                    .filter(cs_dsl::teacher_id.eq(user_id))
                    .count()
                    .get_result::<i64>(tx)?;
                if assignments > 0 {
                    return Err(blocked(DeleteBlock::TeacherHasAssignedSubjects));
                }
                DeleteBlock::TeacherHasAssignedSubjects
            }
            Role::Student => {
                let enrollments = enr_dsl::enrollments
                    .filter(enr_dsl::student_id.eq(user_id))
                    .count()
                    .get_result::<i64>(tx)?;
                if enrollments > 0 {
                    return Err(blocked(DeleteBlock::StudentHasEnrollments));
                }
                DeleteBlock::StudentHasEnrollments
            }
        };

        diesel::delete(users_dsl::users.find(user_id))
            .execute(tx)
            .map_err(|e| guard_foreign_key(e, fallback))?;

        info!("Deleted user {} ({}) on behalf of {}", user_id, role, actor.username);
        Ok(())
    })
}

pub fn delete_subject(conn: &mut PgConnection, actor: &Principal, subject_id: i64) -> Result<(), AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        lock_subject(tx, subject_id)?;

        let assignments = cs_dsl::class_subjects
            .filter(cs_dsl::subject_id.eq(subject_id))
            .count()
            .get_result::<i64>(tx)?;
        if assignments > 0 {
            return Err(blocked(DeleteBlock::SubjectAssignedToClasses));
        }

        diesel::delete(subjects_dsl::subjects.find(subject_id))
            .execute(tx)
            .map_err(|e| guard_foreign_key(e, DeleteBlock::SubjectAssignedToClasses))?;

        info!("Deleted subject {}", subject_id);
        Ok(())
    })
}

pub fn delete_assignment(
    conn: &mut PgConnection,
    actor: &Principal,
    class_subject_id: i64,
) -> Result<(), AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        let locked = cs_dsl::class_subjects
            .find(class_subject_id)
            .select(cs_dsl::id)
            .for_update()
            .first::<i64>(tx)
            .optional()?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!(
                "Class subject with ID {} not found.",
                class_subject_id
            )));
        }

        let enrolled = enr_dsl::enrollments
            .filter(enr_dsl::class_subject_id.eq(class_subject_id))
            .count()
            .get_result::<i64>(tx)?;
        if enrolled > 0 {
            return Err(blocked(DeleteBlock::AssignmentHasEnrollments));
        }

        diesel::delete(cs_dsl::class_subjects.find(class_subject_id))
            .execute(tx)
            .map_err(|e| guard_foreign_key(e, DeleteBlock::AssignmentHasEnrollments))?;

        info!("Deleted class subject {}", class_subject_id);
        Ok(())
    })
}

pub fn delete_enrollment(
    conn: &mut PgConnection,
    actor: &Principal,
    enrollment_id: i64,
) -> Result<i64, AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        let class_subject_id = enr_dsl::enrollments
            .find(enrollment_id)
            .select(enr_dsl::class_subject_id)
            .for_update()
            .first::<i64>(tx)
            .optional()?
            .ok_or_else(|| {
                AppError::NotFound(format!("Enrollment with ID {} not found.", enrollment_id))
            })?;

        let graded = grades_dsl::grades
            .filter(grades_dsl::enrollment_id.eq(enrollment_id))
            .count()
            .get_result::<i64>(tx)?;
        if graded > 0 {
            return Err(blocked(DeleteBlock::EnrollmentHasGrades));
        }

        diesel::delete(enr_dsl::enrollments.find(enrollment_id))
            .execute(tx)
            .map_err(|e| guard_foreign_key(e, DeleteBlock::EnrollmentHasGrades))?;

        info!("Deleted enrollment {}", enrollment_id);
        Ok(class_subject_id)
    })
}

pub fn delete_class(conn: &mut PgConnection, actor: &Principal, class_id: i64) -> Result<(), AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        let locked = classes_dsl::classes
            .find(class_id)
            .select(classes_dsl::id)
            .for_update()
            .first::<i64>(tx)
            .optional()?;
        if locked.is_none() {
            return Err(AppError::NotFound(format!(
                "Class with ID {} not found.",
                class_id
            )));
        }

        let members = users_dsl::users
            .filter(users_dsl::class_id.eq(class_id))
            .count()
            .get_result::<i64>(tx)?;
        if members > 0 {
            return Err(blocked(DeleteBlock::ClassHasStudents));
        }

        let assignments = cs_dsl::class_subjects
            .filter(cs_dsl::class_id.eq(class_id))
            .count()
            .get_result::<i64>(tx)?;
        if assignments > 0 {
            return Err(blocked(DeleteBlock::ClassHasAssignments));
        }

        diesel::delete(classes_dsl::classes.find(class_id))
            .execute(tx)
            .map_err(|e| guard_foreign_key(e, DeleteBlock::ClassHasAssignments))?;

        info!("Deleted class {}", class_id);
        Ok(())
    })
}

/// Removes every assignment of a subject together with the enrollments (and
/// their grades) hanging off those assignments. The subject itself stays.
pub fn clear_subject_assignments(
    conn: &mut PgConnection,
    actor: &Principal,
    subject_id: i64,
) -> Result<ClearSummary, AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        lock_subject(tx, subject_id)?;

        let mut summary = remove_subject_enrollments(tx, subject_id)?;
        summary.assignments_removed =
            diesel::delete(cs_dsl::class_subjects.filter(cs_dsl::subject_id.eq(subject_id)))
                .execute(tx)?;

        info!(
            "Cleared assignments of subject {}: {:?} (requested by {})",
            subject_id, summary, actor.username
        );
        Ok(summary)
    })
}

/// Removes every enrollment (and its grades) joined through the subject's
/// assignments. Assignments and the subject stay.
pub fn clear_subject_enrollments(
    conn: &mut PgConnection,
    actor: &Principal,
    subject_id: i64,
) -> Result<ClearSummary, AppError> {
    auth::ensure_role(actor, Role::Admin)?;

    conn.transaction(|tx| {
        lock_subject(tx, subject_id)?;

        let summary = remove_subject_enrollments(tx, subject_id)?;

        info!(
            "Cleared enrollments of subject {}: {:?} (requested by {})",
            subject_id, summary, actor.username
        );
        Ok(summary)
    })
}

fn lock_subject(tx: &mut PgConnection, subject_id: i64) -> Result<(), AppError> {
    let locked = subjects_dsl::subjects
        .find(subject_id)
        .select(subjects_dsl::id)
        .for_update()
        .first::<i64>(tx)
        .optional()?;
    match locked {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!(
            "Subject with ID {} not found.",
            subject_id
        ))),
    }
}

fn remove_subject_enrollments(tx: &mut PgConnection, subject_id: i64) -> Result<ClearSummary, AppError> {
    let assignment_ids = cs_dsl::class_subjects
        .filter(cs_dsl::subject_id.eq(subject_id))
        .select(cs_dsl::id)
        .load::<i64>(tx)?;

    let enrollment_ids = enr_dsl::enrollments
        .filter(enr_dsl::class_subject_id.eq_any(&assignment_ids))
        .select(enr_dsl::id)
        .load::<i64>(tx)?;

    let grades_removed =
        diesel::delete(grades_dsl::grades.filter(grades_dsl::enrollment_id.eq_any(&enrollment_ids)))
            .execute(tx)?;
    let enrollments_removed =
        diesel::delete(enr_dsl::enrollments.filter(enr_dsl::id.eq_any(&enrollment_ids)))
            .execute(tx)?;

    Ok(ClearSummary {
        assignments_removed: 0,
        enrollments_removed,
        grades_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_reasons_are_distinct() {
        let reasons = [
            DeleteBlock::AdminUser,
            DeleteBlock::TeacherHasAssignedSubjects,
            DeleteBlock::StudentHasEnrollments,
            DeleteBlock::SubjectAssignedToClasses,
            DeleteBlock::AssignmentHasEnrollments,
            DeleteBlock::EnrollmentHasGrades,
            DeleteBlock::ClassHasStudents,
            DeleteBlock::ClassHasAssignments,
        ];
        let messages: std::collections::HashSet<String> =
            reasons.iter().map(|r| r.to_string()).collect();
        assert_eq!(messages.len(), reasons.len());
    }

    #[test]
    fn block_messages_name_the_dependency() {
        assert!(DeleteBlock::AdminUser.to_string().contains("ADMIN"));
        assert!(DeleteBlock::TeacherHasAssignedSubjects.to_string().contains("assigned subjects"));
        assert!(DeleteBlock::StudentHasEnrollments.to_string().contains("enrollments"));
        assert!(DeleteBlock::SubjectAssignedToClasses.to_string().contains("assigned to classes"));
    }

    #[test]
    fn only_foreign_key_violations_become_blocks() {
        let err = guard_foreign_key(DieselError::NotFound, DeleteBlock::EnrollmentHasGrades);
        assert!(matches!(err, AppError::DieselError(DieselError::NotFound)));
    }
}
