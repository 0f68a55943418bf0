use crate::model::student::StudentGrade;
use crate::model::teacher::Grade;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    GradeValue,
    #[default]
    GradedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// Display order for grade sequences. Built from untrusted query values
/// through an allow-list; anything unrecognised falls back to the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GradeSort {
    pub key: SortKey,
    pub dir: SortDir,
}

impl GradeSort {
    pub fn from_params(sort: Option<&str>, dir: Option<&str>) -> Self {
        let key = match sort {
            Some("grade_value") => SortKey::GradeValue,
            Some("graded_at") => SortKey::GradedAt,
            _ => SortKey::default(),
        };
        let dir = match dir {
            Some("desc") => SortDir::Desc,
            _ => SortDir::Asc,
        };
        Self { key, dir }
    }

    pub fn key_name(&self) -> &'static str {
        match self.key {
            SortKey::GradeValue => "grade_value",
            SortKey::GradedAt => "graded_at",
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self.dir {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    /// Total order: the chosen key, then recording time, then id, all in the
    /// chosen direction.
    pub fn compare<T: Graded>(&self, a: &T, b: &T) -> Ordering {
        let primary = match self.key {
            SortKey::GradeValue => a.grade_value().cmp(&b.grade_value()),
            SortKey::GradedAt => Ordering::Equal,
        };
        let ordering = primary
            .then_with(|| a.graded_at().cmp(&b.graded_at()))
            .then_with(|| a.grade_id().cmp(&b.grade_id()));
        match self.dir {
            SortDir::Asc => ordering,
            SortDir::Desc => ordering.reverse(),
        }
    }
}

/// Anything that can be ordered as a grade record.
pub trait Graded {
    fn grade_id(&self) -> i64;
    fn grade_value(&self) -> i16;
    fn graded_at(&self) -> DateTime<Utc>;
}

impl Graded for Grade {
    fn grade_id(&self) -> i64 {
        self.id
    }

    fn grade_value(&self) -> i16 {
        self.grade_value
    }

    fn graded_at(&self) -> DateTime<Utc> {
        self.graded_at
    }
}

impl Graded for StudentGrade {
    fn grade_id(&self) -> i64 {
        self.id
    }

    fn grade_value(&self) -> i16 {
        self.grade_value
    }

    fn graded_at(&self) -> DateTime<Utc> {
        self.graded_at
    }
}

pub fn sort_grades<T: Graded>(grades: &mut [T], sort: GradeSort) {
    grades.sort_by(|a, b| sort.compare(a, b));
}

/// Groups left-joined `(owner, grade?)` rows by owner. Owners whose rows carry
/// no grade still get an (empty) entry; each sequence is sorted by `sort`.
pub fn group_grades<K, T, I>(rows: I, sort: GradeSort) -> BTreeMap<K, Vec<T>>
where
    K: Ord,
    T: Graded,
    I: IntoIterator<Item = (K, Option<T>)>,
{
    let mut grouped: BTreeMap<K, Vec<T>> = BTreeMap::new();
    for (owner, grade) in rows {
        let entry = grouped.entry(owner).or_default();
        if let Some(grade) = grade {
            entry.push(grade);
        }
    }
    for grades in grouped.values_mut() {
        sort_grades(grades, sort);
    }
    grouped
}

/// The current grade of an enrollment: latest `graded_at`, ties broken by the
/// highest id.
pub fn current_grade<T: Graded>(grades: &[T]) -> Option<&T> {
    grades
        .iter()
        .max_by_key(|grade| (grade.graded_at(), grade.grade_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn grade(id: i64, value: i16, minute: u32) -> Grade {
        Grade {
            id,
            enrollment_id: 1,
            teacher_id: Some(1),
            grade_value: value,
            note: None,
            graded_at: Utc.with_ymd_and_hms(2024, 9, 2, 8, minute, 0).unwrap(),
        }
    }

    fn ids(grades: &[Grade]) -> Vec<i64> {
        grades.iter().map(|g| g.id).collect()
    }

    #[test]
    fn params_outside_allow_list_fall_back_to_default() {
        let sort = GradeSort::from_params(Some("password_hash"), Some("sideways"));
        assert_eq!(sort, GradeSort::default());
        assert_eq!(sort.key_name(), "graded_at");
        assert_eq!(sort.dir_name(), "asc");
    }

    #[test]
    fn params_in_allow_list_are_honoured() {
        let sort = GradeSort::from_params(Some("grade_value"), Some("desc"));
        assert_eq!(sort.key, SortKey::GradeValue);
        assert_eq!(sort.dir, SortDir::Desc);
    }

    #[test]
    fn sorts_by_value_then_time() {
        let mut grades = vec![grade(1, 3, 10), grade(2, 1, 20), grade(3, 3, 5)];
        sort_grades(&mut grades, GradeSort::from_params(Some("grade_value"), None));
        assert_eq!(ids(&grades), vec![2, 3, 1]);

        sort_grades(&mut grades, GradeSort::from_params(Some("grade_value"), Some("desc")));
        assert_eq!(ids(&grades), vec![1, 3, 2]);
    }

    #[test]
    fn ungraded_owners_are_kept_empty() {
        let rows = vec![
            ("Math".to_string(), Some(grade(1, 5, 0))),
            ("History".to_string(), None),
            ("Math".to_string(), Some(grade(2, 2, 1))),
        ];
        let grouped = group_grades(rows, GradeSort::default());
        assert_eq!(grouped.len(), 2);
        assert!(grouped["History"].is_empty());
        assert_eq!(ids(&grouped["Math"]), vec![1, 2]);
    }

    #[test]
    fn resorting_never_changes_membership() {
        let rows = || {
            vec![
                ("Math".to_string(), Some(grade(1, 4, 3))),
                ("Physics".to_string(), Some(grade(2, 1, 1))),
                ("Math".to_string(), Some(grade(3, 2, 2))),
                ("Art".to_string(), None),
                ("Physics".to_string(), Some(grade(4, 5, 0))),
            ]
        };
        let sorts = [
            GradeSort::from_params(Some("grade_value"), Some("asc")),
            GradeSort::from_params(Some("grade_value"), Some("desc")),
            GradeSort::from_params(Some("graded_at"), Some("asc")),
            GradeSort::from_params(Some("graded_at"), Some("desc")),
        ];

        let baseline: BTreeMap<String, Vec<i64>> = group_grades(rows(), sorts[0])
            .into_iter()
            .map(|(k, v)| {
                let mut ids = ids(&v);
                ids.sort();
                (k, ids)
            })
            .collect();

        for sort in sorts {
            let grouped = group_grades(rows(), sort);
            let membership: BTreeMap<String, Vec<i64>> = grouped
                .into_iter()
                .map(|(k, v)| {
                    let mut ids = ids(&v);
                    ids.sort();
                    (k, ids)
                })
                .collect();
            assert_eq!(membership, baseline);
        }
    }

    #[test]
    fn current_grade_prefers_latest_then_highest_id() {
        let grades = vec![grade(1, 2, 30), grade(5, 4, 10), grade(3, 1, 30)];
        assert_eq!(current_grade(&grades).map(|g| g.id), Some(3));
        assert!(current_grade::<Grade>(&[]).is_none());
    }
}
