use crate::auth::{self, Principal, Role};
use crate::errors::AppError;
use crate::model::teacher::{Grade, NewGrade};
use crate::notification::GradeMail;
use crate::presentation::class_name;
use crate::schema::{
    class_subjects::dsl as cs_dsl, classes::dsl as classes_dsl, enrollments::dsl as enr_dsl,
    grades::dsl as grades_dsl, subjects::dsl as subjects_dsl, users::dsl as users_dsl,
};
use diesel::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

/// A grade on the 1–5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GradeValue(i16);

impl GradeValue {
    pub const MIN: i16 = 1;
    pub const MAX: i16 = 5;

    pub fn new(value: i64) -> Result<Self, AppError> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as i16))
        } else {
            Err(Self::out_of_range())
        }
    }

    /// Parses form input. Only plain integers are accepted: `4.0`, `4,5`,
    /// `abc` and empty input are all rejected.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        raw.trim()
            .parse::<i64>()
            .map_err(|_| Self::out_of_range())
            .and_then(Self::new)
    }

    pub fn get(self) -> i16 {
        self.0
    }

    fn out_of_range() -> AppError {
        AppError::Validation(format!(
            "Invalid data. The grade must be a whole number from {} to {}.",
            Self::MIN,
            Self::MAX
        ))
    }
}

/// Trims a free-text note; blank notes are stored as absent.
pub fn normalize_note(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|note| !note.is_empty())
        .map(str::to_string)
}

/// A validated grade entry, ready to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeEntry {
    pub enrollment_id: i64,
    pub value: GradeValue,
    pub note: Option<String>,
}

impl GradeEntry {
    pub fn from_form(enrollment_id: &str, grade_value: &str, note: Option<&str>) -> Result<Self, AppError> {
        let enrollment_id = enrollment_id
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::Validation("Invalid data. Missing enrollment.".to_string()))?;

        Ok(Self {
            enrollment_id,
            value: GradeValue::parse(grade_value)?,
            note: normalize_note(note),
        })
    }
}

/// Everything the grade entry flow needs after the insert has committed.
#[derive(Debug, Clone)]
pub struct RecordedGrade {
    pub grade: Grade,
    pub class_subject_id: i64,
    pub mail: GradeMail,
}

#[derive(Queryable, Debug)]
struct EnrollmentContext {
    class_subject_id: i64,
    student_id: i64,
    grade_year: i32,
    name_letter: String,
    subject_name: String,
}

/// Records a grade for an enrollment taught by `actor`.
///
/// The enrollment's assignment is looked up inside the insert transaction and
/// its teacher must be the actor; the request is never trusted for this.
pub fn record_grade(
    conn: &mut PgConnection,
    actor: &Principal,
    entry: GradeEntry,
) -> Result<RecordedGrade, AppError> {
    auth::ensure_role(actor, Role::Teacher)?;

    conn.transaction(|tx| {
        let context = enr_dsl::enrollments
            .inner_join(
                cs_dsl::class_subjects
                    .inner_join(classes_dsl::classes)
                    .inner_join(subjects_dsl::subjects),
            )
            .filter(enr_dsl::id.eq(entry.enrollment_id))
            .select((
                cs_dsl::id,
                enr_dsl::student_id,
                classes_dsl::grade_year,
                classes_dsl::name_letter,
                subjects_dsl::name,
            ))
            .first::<EnrollmentContext>(tx)
            .optional()?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Enrollment with ID {} not found.",
                    entry.enrollment_id
                ))
            })?;

        // Teacher read under a row lock: reassignment waits for this insert.
        let teacher_id = cs_dsl::class_subjects
            .find(context.class_subject_id)
            .select(cs_dsl::teacher_id)
            .for_update()
            .first::<i64>(tx)?;

        if teacher_id != actor.id {
            warn!(
                "Teacher {} tried to grade enrollment {} of class subject {} taught by {}",
                actor.id, entry.enrollment_id, context.class_subject_id, teacher_id
            );
            return Err(AppError::Forbidden(
                "You do not teach this class subject.".to_string(),
            ));
        }

        let (first_name, last_name, email) = users_dsl::users
            .find(context.student_id)
            .select((users_dsl::first_name, users_dsl::last_name, users_dsl::email))
            .first::<(String, String, Option<String>)>(tx)?;

        let new_grade = NewGrade {
            enrollment_id: entry.enrollment_id,
            teacher_id: actor.id,
            grade_value: entry.value.get(),
            note: entry.note,
        };
        let grade = diesel::insert_into(grades_dsl::grades)
            .values(&new_grade)
            .returning((
                grades_dsl::id,
                grades_dsl::enrollment_id,
                grades_dsl::teacher_id,
                grades_dsl::grade_value,
                grades_dsl::note,
                grades_dsl::graded_at,
            ))
            .get_result::<Grade>(tx)?;

        info!(
            "Teacher {} recorded grade {} (id {}) for enrollment {}",
            actor.id, grade.grade_value, grade.id, grade.enrollment_id
        );

        let mail = GradeMail {
            recipient: email,
            student_name: format!("{} {}", first_name, last_name),
            subject_name: context.subject_name,
            class_name: class_name(context.grade_year, &context.name_letter),
            grade_value: grade.grade_value,
            note: grade.note.clone(),
            graded_at: grade.graded_at,
        };

        Ok(RecordedGrade {
            grade,
            class_subject_id: context.class_subject_id,
            mail,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_value_on_the_scale() {
        for value in 1..=5 {
            assert_eq!(GradeValue::new(value).unwrap().get(), value as i16);
        }
    }

    #[test]
    fn rejects_values_off_the_scale() {
        for value in [i64::MIN, -1, 0, 6, 100, i64::MAX] {
            assert!(matches!(GradeValue::new(value), Err(AppError::Validation(_))));
        }
    }

    #[test]
    fn parse_rejects_non_integers() {
        for raw in ["", " ", "4.0", "4.5", "3,5", "five", "0x3", "1e0"] {
            assert!(GradeValue::parse(raw).is_err(), "accepted {:?}", raw);
        }
        assert_eq!(GradeValue::parse(" 4 ").unwrap().get(), 4);
    }

    #[test]
    fn blank_notes_normalize_to_absent() {
        assert_eq!(normalize_note(None), None);
        assert_eq!(normalize_note(Some("")), None);
        assert_eq!(normalize_note(Some("   \t")), None);
        assert_eq!(normalize_note(Some("  oral exam ")), Some("oral exam".to_string()));
    }

    #[test]
    fn entry_requires_a_positive_enrollment_id() {
        assert!(GradeEntry::from_form("", "3", None).is_err());
        assert!(GradeEntry::from_form("0", "3", None).is_err());
        assert!(GradeEntry::from_form("abc", "3", None).is_err());

        let entry = GradeEntry::from_form("12", "3", Some(" ")).unwrap();
        assert_eq!(entry.enrollment_id, 12);
        assert_eq!(entry.value.get(), 3);
        assert_eq!(entry.note, None);
    }

    #[test]
    fn entry_rejects_out_of_range_grade() {
        let err = GradeEntry::from_form("12", "6", Some("too good")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
