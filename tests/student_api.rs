use chrono::{Duration, TimeZone, Utc};
use gradebook_server::auth::Role;
use gradebook_server::model::student::StudentGradesView;

mod helpers;
use helpers::{
    TestEnv, assert_redirect, create_test_assignment, create_test_class, create_test_enrollment,
    create_test_grade, create_test_subject, create_test_user, get_page, login_as,
    setup_test_environment,
};

struct Enrolled {
    math: i64,
    art: i64,
    teacher_id: i64,
}

/// A student in class 2.C enrolled in Math, Art and History (without grades
/// in History), plus a classmate with their own Math grade.
async fn enrolled_student(env: &TestEnv) -> Enrolled {
    let class_id = create_test_class(&env.pool, 2, "C").await;
    let teacher_id = create_test_user(&env.pool, "teacher", Role::Teacher, None, None).await;
    let student_id =
        create_test_user(&env.pool, "student", Role::Student, Some(class_id), None).await;
    let classmate =
        create_test_user(&env.pool, "classmate", Role::Student, Some(class_id), None).await;

    let mut enrollments = Vec::new();
    for name in ["Math", "Art", "History"] {
        let subject_id = create_test_subject(&env.pool, name).await;
        let cs_id = create_test_assignment(&env.pool, class_id, subject_id, teacher_id).await;
        enrollments.push((cs_id, create_test_enrollment(&env.pool, student_id, cs_id).await));
    }

    let classmate_math = create_test_enrollment(&env.pool, classmate, enrollments[0].0).await;
    create_test_grade(&env.pool, classmate_math, teacher_id, 1, Utc::now()).await;

    Enrolled {
        math: enrollments[0].1,
        art: enrollments[1].1,
        teacher_id,
    }
}

fn values(view: &StudentGradesView, subject: &str) -> Vec<i16> {
    view.grouped_grades[subject]
        .iter()
        .map(|grade| grade.grade_value)
        .collect()
}

#[tokio::test]
async fn test_grades_grouped_by_subject_including_empty() {
    let env = setup_test_environment().await;
    let enrolled = enrolled_student(&env).await;
    let base = Utc.with_ymd_and_hms(2025, 2, 3, 10, 15, 0).unwrap();
    create_test_grade(&env.pool, enrolled.math, enrolled.teacher_id, 3, base).await;
    create_test_grade(
        &env.pool,
        enrolled.math,
        enrolled.teacher_id,
        5,
        base - Duration::days(7),
    )
    .await;
    create_test_grade(&env.pool, enrolled.art, enrolled.teacher_id, 2, base).await;
    login_as(&env.server, "student", Role::Student).await;

    let page = get_page::<StudentGradesView>(&env.server, "/student").await;
    let subjects: Vec<&str> = page
        .content
        .grouped_grades
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(subjects, vec!["Art", "History", "Math"]);
    assert_eq!(values(&page.content, "Math"), vec![5, 3]);
    assert_eq!(values(&page.content, "Art"), vec![2]);
    assert!(page.content.grouped_grades["History"].is_empty());
    assert_eq!(
        page.content.grouped_grades["Art"][0].graded_at_display,
        "03.02.2025 10:15"
    );
}

#[tokio::test]
async fn test_grade_sort_allow_list_and_fallback() {
    let env = setup_test_environment().await;
    let enrolled = enrolled_student(&env).await;
    let base = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
    for (offset, value) in [(0, 4), (1, 1), (2, 5), (3, 2)] {
        create_test_grade(
            &env.pool,
            enrolled.math,
            enrolled.teacher_id,
            value,
            base + Duration::days(offset),
        )
        .await;
    }
    login_as(&env.server, "student", Role::Student).await;

    let page = get_page::<StudentGradesView>(&env.server, "/student?sort=grade_value").await;
    assert_eq!(page.content.sort, "grade_value");
    assert_eq!(values(&page.content, "Math"), vec![1, 2, 4, 5]);

    let page = get_page::<StudentGradesView>(&env.server, "/student?sort=graded_at&dir=desc").await;
    assert_eq!(page.content.dir, "desc");
    assert_eq!(values(&page.content, "Math"), vec![2, 5, 1, 4]);

    let page = get_page::<StudentGradesView>(
        &env.server,
        "/student?sort=note%20DESC%3B&dir=upward",
    )
    .await;
    assert_eq!(page.content.sort, "graded_at");
    assert_eq!(page.content.dir, "asc");
    assert_eq!(values(&page.content, "Math"), vec![4, 1, 5, 2]);
    assert_eq!(page.content.grouped_grades.len(), 3);
}

#[tokio::test]
async fn test_student_sees_only_own_grades() {
    let env = setup_test_environment().await;
    enrolled_student(&env).await;
    login_as(&env.server, "classmate", Role::Student).await;

    let page = get_page::<StudentGradesView>(&env.server, "/student").await;
    assert_eq!(page.content.grouped_grades.len(), 1);
    assert_eq!(values(&page.content, "Math"), vec![1]);
}

#[tokio::test]
async fn test_student_without_enrollments_has_empty_view() {
    let env = setup_test_environment().await;
    create_test_user(&env.pool, "loner", Role::Student, None, None).await;
    login_as(&env.server, "loner", Role::Student).await;

    let page = get_page::<StudentGradesView>(&env.server, "/student").await;
    assert!(page.content.grouped_grades.is_empty());
}

#[tokio::test]
async fn test_teacher_is_denied_student_page() {
    let env = setup_test_environment().await;
    enrolled_student(&env).await;
    login_as(&env.server, "teacher", Role::Teacher).await;

    let response = env.server.get("/student").await;
    assert_redirect(&response, "/user/login");
}
