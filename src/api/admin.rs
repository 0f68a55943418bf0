use super::helper::{self, PageResult, RedirectResult};
use crate::AppState;
use crate::auth::{self, Principal, Role};
use crate::domain::{assignment, deletion};
use crate::errors::AppError;
use crate::model::admin::{
    AssignmentEditData, AssignmentItem, AssignmentsPage, ClassItem, ClassListItem, ClearSummary,
    EnrollmentItem, NewClass, NewClassSubject, NewSubject, NewUser, RoleItem, StudentOption,
    SubjectDetailsResponse, SubjectItem, SubjectListItem, TeacherOption, UserChangeset,
    UserDetails, UserEditData, UserFormOptions, UserListItem,
};
use crate::payloads::admin::{
    AssignmentForm, ClassForm, CreateUserForm, EditUserForm, EnrollStudentForm,
    ReassignTeacherForm, SubjectForm,
};
use crate::presentation::{Notice, asset_exists, class_name};
use crate::response::ApiResponse;
use crate::schema::{
    class_subjects::dsl as cs_dsl, classes::dsl as classes_dsl, enrollments::dsl as enr_dsl,
    grades::dsl as grades_dsl, roles::dsl as roles_dsl, subjects::dsl as subjects_dsl,
    users::dsl as users_dsl,
};
use crate::session::CurrentSession;
use anyhow::anyhow;
use axum::Form;
use axum::extract::{Path, State};
use diesel::dsl::{count_star, exists};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

const USERS_PATH: &str = "/admin";
const CLASSES_PATH: &str = "/admin/classes";
const SUBJECTS_PATH: &str = "/admin/subjects";
const ASSIGNMENTS_PATH: &str = "/admin/class-subjects";

// users

/// Lists every user with their role, class and whether a profile photo exists.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<Vec<UserListItem>>`: Users ordered by last name (200 OK).
/// * `303 See Other`: If the requester is not signed in as an admin.
/// * `500 Internal Server Error`: If a database error occurs.
#[instrument(skip(state, session))]
pub async fn list_users(
    State(state): State<AppState>,
    session: CurrentSession,
) -> PageResult<Vec<UserListItem>> {
    session.require(Role::Admin)?;
    info!("Listing users");

    let rows = helper::run_query(&state.pool, |conn| {
        users_dsl::users
            .inner_join(roles_dsl::roles)
            .left_join(classes_dsl::classes)
            .select((
                users_dsl::id,
                users_dsl::username,
                users_dsl::first_name,
                users_dsl::last_name,
                roles_dsl::code,
                classes_dsl::grade_year.nullable(),
                classes_dsl::name_letter.nullable(),
            ))
            .order((users_dsl::last_name, users_dsl::first_name, users_dsl::id))
            .load::<(i64, String, String, String, String, Option<i32>, Option<String>)>(conn)
    })
    .await?;

    let users: Vec<UserListItem> = rows
        .into_iter()
        .map(
            |(id, username, first_name, last_name, role, grade_year, name_letter)| UserListItem {
                id,
                username,
                first_name,
                last_name,
                role,
                class_name: grade_year
                    .zip(name_letter)
                    .map(|(year, letter)| class_name(year, &letter)),
                has_photo: asset_exists(&state.public_dir, id),
            },
        )
        .collect();

    info!("Fetched {} users", users.len());
    helper::page(&state, session, users).await
}

/// Options for the user create form.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<UserFormOptions>`: Roles and classes (200 OK).
#[instrument(skip(state, session))]
pub async fn create_user_page(
    State(state): State<AppState>,
    session: CurrentSession,
) -> PageResult<UserFormOptions> {
    session.require(Role::Admin)?;

    let options = helper::run_query(&state.pool, |conn| {
        Ok(UserFormOptions {
            roles: load_roles(conn)?,
            classes: load_classes(conn)?,
        })
    })
    .await?;

    helper::page(&state, session, options).await
}

/// Creates a user with an argon2-hashed password. `class_id` is kept only
/// for students.
///
/// Form Body:
/// * `username`, `password`, `first_name`, `last_name`, `email` (optional),
///   `role_id`, `class_id` (optional)
///
/// Returns
/// * `303 See Other` to the user list with a success notice.
/// * `303 See Other` back to the form with an error notice when validation
///   fails or the username is taken.
#[instrument(skip(state, session, form))]
pub async fn create_user(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<CreateUserForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!(
        "Create user payload: username={}, role_id={:?}, class_id={:?}",
        form.username, form.role_id, form.class_id
    );

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let username = required_text(&form.username, "Username")?;
        if form.password.is_empty() {
            return Err(AppError::Validation("Password is required.".to_string()));
        }
        let role_id = parse_id(&form.role_id, "Role")?;
        let (role, class_id) = resolve_role_and_class(conn, role_id, &form.class_id)?;

        let new_user = NewUser {
            username: username.clone(),
            password_hash: auth::hash_password(&form.password)?,
            first_name: required_text(&form.first_name, "First name")?,
            last_name: required_text(&form.last_name, "Last name")?,
            email: optional_email(&form.email)?,
            role_id,
            class_id,
        };

        let id = diesel::insert_into(users_dsl::users)
            .values(&new_user)
            .returning(users_dsl::id)
            .get_result::<i64>(conn)
            .map_err(|e| unique_conflict(e, format!("Username '{}' is already taken.", username)))?;

        info!(
            "User {} ({}, {}) created by {}",
            id, username, role, actor.username
        );
        Ok(id)
    })
    .await;

    match outcome {
        Ok(_) => {
            helper::redirect_with(&state, session, USERS_PATH, Ok(Notice::success("User created.")))
                .await
        }
        Err(e) => helper::redirect_with(&state, session, "/admin/user/create", Err(e)).await,
    }
}

/// Loads a user for the edit form.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<UserEditData>`: The user plus roles and classes (200 OK).
/// * `404 Not Found`: If the user does not exist.
#[instrument(skip(state, session))]
pub async fn edit_user_page(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(user_id): Path<i64>,
) -> PageResult<UserEditData> {
    session.require(Role::Admin)?;

    let data = helper::run_transaction(&state.pool, move |conn| {
        let user = users_dsl::users
            .find(user_id)
            .select((
                users_dsl::id,
                users_dsl::username,
                users_dsl::first_name,
                users_dsl::last_name,
                users_dsl::email,
                users_dsl::role_id,
                users_dsl::class_id,
            ))
            .first::<UserDetails>(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("User with ID {} not found.", user_id)))?;

        Ok(UserEditData {
            user,
            roles: load_roles(conn)?,
            classes: load_classes(conn)?,
        })
    })
    .await?;

    helper::page(&state, session, data).await
}

/// Updates a user's names, email, role and class. The username and password
/// are not editable here.
///
/// A role change is refused while the user still has rows that depend on the
/// old role (assignments of a teacher, enrollments of a student).
#[instrument(skip(state, session, form))]
pub async fn edit_user(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(user_id): Path<i64>,
    Form(form): Form<EditUserForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Edit user {} payload: {:?}", user_id, form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let current_role = users_dsl::users
            .find(user_id)
            .select(users_dsl::id)
            .for_update()
            .first::<i64>(conn)
            .optional()?
            .map(|_| auth::role_of(conn, user_id))
            .transpose()?
            .flatten()
            .ok_or_else(|| AppError::NotFound(format!("User with ID {} not found.", user_id)))?;

        let role_id = parse_id(&form.role_id, "Role")?;
        let (role, class_id) = resolve_role_and_class(conn, role_id, &form.class_id)?;
        if role != current_role {
            ensure_role_change_allowed(conn, &actor, user_id, current_role)?;
        }

        let changes = UserChangeset {
            first_name: required_text(&form.first_name, "First name")?,
            last_name: required_text(&form.last_name, "Last name")?,
            email: optional_email(&form.email)?,
            role_id,
            class_id,
        };
        diesel::update(users_dsl::users.find(user_id))
            .set(&changes)
            .execute(conn)?;

        info!("User {} updated by {} (role {})", user_id, actor.username, role);
        Ok(())
    })
    .await;

    match outcome {
        Ok(()) => {
            helper::redirect_with(&state, session, USERS_PATH, Ok(Notice::success("User updated.")))
                .await
        }
        Err(e) => {
            let back = format!("/admin/user/{}/edit", user_id);
            helper::redirect_with(&state, session, &back, Err(e)).await
        }
    }
}

/// Deletes a user unless they are an admin or still referenced.
///
/// Returns
/// * `303 See Other` to the user list with a success notice, or with the
///   reason the delete was blocked.
#[instrument(skip(state, session))]
pub async fn delete_user(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(user_id): Path<i64>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    info!("Admin {} deleting user {}", actor.username, user_id);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        deletion::delete_user(conn, &actor, user_id)
    })
    .await
    .map(|()| Notice::success("User deleted."));

    helper::redirect_with(&state, session, USERS_PATH, outcome).await
}

// classes

/// Lists classes with the number of students in each.
#[instrument(skip(state, session))]
pub async fn list_classes(
    State(state): State<AppState>,
    session: CurrentSession,
) -> PageResult<Vec<ClassListItem>> {
    session.require(Role::Admin)?;

    let classes = helper::run_query(&state.pool, |conn| {
        let classes = load_classes(conn)?;
        let members: HashMap<i64, i64> = users_dsl::users
            .inner_join(roles_dsl::roles)
            .filter(roles_dsl::code.eq(Role::Student.code()))
            .filter(users_dsl::class_id.is_not_null())
            .group_by(users_dsl::class_id)
            .select((users_dsl::class_id, count_star()))
            .load::<(Option<i64>, i64)>(conn)?
            .into_iter()
            .filter_map(|(class_id, count)| class_id.map(|id| (id, count)))
            .collect();
        Ok(classes
            .into_iter()
            .map(|class| ClassListItem {
                student_count: members.get(&class.id).copied().unwrap_or(0),
                id: class.id,
                grade_year: class.grade_year,
                name_letter: class.name_letter,
            })
            .collect::<Vec<_>>())
    })
    .await?;

    info!("Fetched {} classes", classes.len());
    helper::page(&state, session, classes).await
}

#[instrument(skip(state, session))]
pub async fn create_class_page(State(state): State<AppState>, session: CurrentSession) -> PageResult<()> {
    session.require(Role::Admin)?;
    helper::page(&state, session, ()).await
}

/// Creates a class. `(grade_year, name_letter)` must be unique.
#[instrument(skip(state, session, form))]
pub async fn create_class(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<ClassForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Create class payload: {:?}", form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let new_class = validate_class(&form)?;
        let label = class_name(new_class.grade_year, &new_class.name_letter);
        let id = diesel::insert_into(classes_dsl::classes)
            .values(&new_class)
            .returning(classes_dsl::id)
            .get_result::<i64>(conn)
            .map_err(|e| unique_conflict(e, format!("Class {} already exists.", label)))?;
        info!("Class {} ({}) created by {}", id, label, actor.username);
        Ok(())
    })
    .await;

    match outcome {
        Ok(()) => {
            helper::redirect_with(&state, session, CLASSES_PATH, Ok(Notice::success("Class created.")))
                .await
        }
        Err(e) => helper::redirect_with(&state, session, "/admin/classes/create", Err(e)).await,
    }
}

/// Returns (wrapped in `ApiResponse`)
/// * `PageView<ClassItem>`: The class to edit (200 OK).
/// * `404 Not Found`: If the class does not exist.
#[instrument(skip(state, session))]
pub async fn edit_class_page(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_id): Path<i64>,
) -> PageResult<ClassItem> {
    session.require(Role::Admin)?;

    let class = helper::run_transaction(&state.pool, move |conn| {
        classes_dsl::classes
            .find(class_id)
            .select((
                classes_dsl::id,
                classes_dsl::grade_year,
                classes_dsl::name_letter,
            ))
            .first::<ClassItem>(conn)
            .optional()?
            .ok_or_else(|| AppError::NotFound(format!("Class with ID {} not found.", class_id)))
    })
    .await?;

    helper::page(&state, session, class).await
}

#[instrument(skip(state, session, form))]
pub async fn edit_class(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_id): Path<i64>,
    Form(form): Form<ClassForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Edit class {} payload: {:?}", class_id, form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let changes = validate_class(&form)?;
        let label = class_name(changes.grade_year, &changes.name_letter);
        let rows_affected = diesel::update(classes_dsl::classes.find(class_id))
            .set(&changes)
            .execute(conn)
            .map_err(|e| unique_conflict(e, format!("Class {} already exists.", label)))?;
        match rows_affected {
            0 => Err(AppError::NotFound(format!(
                "Class with ID {} not found.",
                class_id
            ))),
            _ => {
                info!("Class {} renamed to {} by {}", class_id, label, actor.username);
                Ok(())
            }
        }
    })
    .await;

    match outcome {
        Ok(()) => {
            helper::redirect_with(&state, session, CLASSES_PATH, Ok(Notice::success("Class updated.")))
                .await
        }
        Err(e) => {
            let back = format!("/admin/classes/{}/edit", class_id);
            helper::redirect_with(&state, session, &back, Err(e)).await
        }
    }
}

/// Deletes a class unless it has students or assignments.
#[instrument(skip(state, session))]
pub async fn delete_class(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_id): Path<i64>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    info!("Admin {} deleting class {}", actor.username, class_id);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        deletion::delete_class(conn, &actor, class_id)
    })
    .await
    .map(|()| Notice::success("Class deleted."));

    helper::redirect_with(&state, session, CLASSES_PATH, outcome).await
}

// subjects

/// Lists subjects with the number of classes each is assigned to.
#[instrument(skip(state, session))]
pub async fn list_subjects(
    State(state): State<AppState>,
    session: CurrentSession,
) -> PageResult<Vec<SubjectListItem>> {
    session.require(Role::Admin)?;

    let subjects = helper::run_query(&state.pool, |conn| {
        let subjects = load_subjects(conn)?;
        let assigned: HashMap<i64, i64> = cs_dsl::class_subjects
            .group_by(cs_dsl::subject_id)
            .select((cs_dsl::subject_id, count_star()))
            .load::<(i64, i64)>(conn)?
            .into_iter()
            .collect();
        Ok(subjects
            .into_iter()
            .map(|subject| SubjectListItem {
                assignment_count: assigned.get(&subject.id).copied().unwrap_or(0),
                id: subject.id,
                name: subject.name,
            })
            .collect::<Vec<_>>())
    })
    .await?;

    info!("Fetched {} subjects", subjects.len());
    helper::page(&state, session, subjects).await
}

#[instrument(skip(state, session))]
pub async fn create_subject_page(State(state): State<AppState>, session: CurrentSession) -> PageResult<()> {
    session.require(Role::Admin)?;
    helper::page(&state, session, ()).await
}

/// Creates a subject. Names are unique.
#[instrument(skip(state, session, form))]
pub async fn create_subject(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<SubjectForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Create subject payload: {:?}", form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let new_subject = NewSubject {
            name: required_text(&form.name, "Subject name")?,
        };
        let id = diesel::insert_into(subjects_dsl::subjects)
            .values(&new_subject)
            .returning(subjects_dsl::id)
            .get_result::<i64>(conn)
            .map_err(|e| {
                unique_conflict(e, format!("Subject '{}' already exists.", new_subject.name))
            })?;
        info!("Subject {} ({}) created by {}", id, new_subject.name, actor.username);
        Ok(())
    })
    .await;

    match outcome {
        Ok(()) => {
            helper::redirect_with(&state, session, SUBJECTS_PATH, Ok(Notice::success("Subject created.")))
                .await
        }
        Err(e) => helper::redirect_with(&state, session, "/admin/subjects/create", Err(e)).await,
    }
}

/// Returns (wrapped in `ApiResponse`)
/// * `PageView<SubjectItem>`: The subject to edit (200 OK).
/// * `404 Not Found`: If the subject does not exist.
#[instrument(skip(state, session))]
pub async fn edit_subject_page(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(subject_id): Path<i64>,
) -> PageResult<SubjectItem> {
    session.require(Role::Admin)?;

    let subject = helper::run_transaction(&state.pool, move |conn| find_subject(conn, subject_id)).await?;

    helper::page(&state, session, subject).await
}

#[instrument(skip(state, session, form))]
pub async fn edit_subject(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(subject_id): Path<i64>,
    Form(form): Form<SubjectForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Edit subject {} payload: {:?}", subject_id, form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let changes = NewSubject {
            name: required_text(&form.name, "Subject name")?,
        };
        let rows_affected = diesel::update(subjects_dsl::subjects.find(subject_id))
            .set(&changes)
            .execute(conn)
            .map_err(|e| unique_conflict(e, format!("Subject '{}' already exists.", changes.name)))?;
        match rows_affected {
            0 => Err(AppError::NotFound(format!(
                "Subject with ID {} not found.",
                subject_id
            ))),
            _ => {
                info!("Subject {} renamed by {}", subject_id, actor.username);
                Ok(())
            }
        }
    })
    .await;

    match outcome {
        Ok(()) => {
            helper::redirect_with(&state, session, SUBJECTS_PATH, Ok(Notice::success("Subject updated.")))
                .await
        }
        Err(e) => {
            let back = format!("/admin/subjects/{}/edit", subject_id);
            helper::redirect_with(&state, session, &back, Err(e)).await
        }
    }
}

/// Deletes a subject unless it is assigned to a class.
#[instrument(skip(state, session))]
pub async fn delete_subject(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(subject_id): Path<i64>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    info!("Admin {} deleting subject {}", actor.username, subject_id);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        deletion::delete_subject(conn, &actor, subject_id)
    })
    .await
    .map(|()| Notice::success("Subject deleted."));

    helper::redirect_with(&state, session, SUBJECTS_PATH, outcome).await
}

/// Subject with its assignments and how many enrollments hang off them.
///
/// Returns (wrapped in `ApiResponse`)
/// * `SubjectDetailsResponse`: Subject, assignments and enrollment count (200 OK).
/// * `404 Not Found`: If the subject does not exist.
#[instrument(skip(state, session))]
pub async fn subject_details(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(subject_id): Path<i64>,
) -> Result<ApiResponse<SubjectDetailsResponse>, AppError> {
    session.require(Role::Admin)?;

    let details = helper::run_transaction(&state.pool, move |conn| {
        let subject = find_subject(conn, subject_id)?;
        let assignments = load_assignments(conn, AssignmentScope::Subject(subject_id))?;
        let enrollment_count = assignments.iter().map(|a| a.enrollment_count).sum();
        Ok(SubjectDetailsResponse {
            subject,
            assignments,
            enrollment_count,
        })
    })
    .await?;

    info!(
        "Subject {} has {} assignments and {} enrollments",
        subject_id,
        details.assignments.len(),
        details.enrollment_count
    );
    Ok(ApiResponse::ok(details))
}

/// Removes all assignments of a subject with their enrollments and grades.
///
/// Returns (wrapped in `ApiResponse`)
/// * `ClearSummary`: Number of removed rows per table (200 OK).
/// * `404 Not Found`: If the subject does not exist.
#[instrument(skip(state, session))]
pub async fn clear_subject_assignments(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(subject_id): Path<i64>,
) -> Result<ApiResponse<ClearSummary>, AppError> {
    let actor = session.require(Role::Admin)?;

    let summary = helper::run_transaction(&state.pool, move |conn| {
        deletion::clear_subject_assignments(conn, &actor, subject_id)
    })
    .await?;

    Ok(ApiResponse::ok(summary))
}

/// Removes all enrollments (and their grades) of a subject's assignments.
///
/// Returns (wrapped in `ApiResponse`)
/// * `ClearSummary`: Number of removed rows per table (200 OK).
/// * `404 Not Found`: If the subject does not exist.
#[instrument(skip(state, session))]
pub async fn clear_subject_enrollments(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(subject_id): Path<i64>,
) -> Result<ApiResponse<ClearSummary>, AppError> {
    let actor = session.require(Role::Admin)?;

    let summary = helper::run_transaction(&state.pool, move |conn| {
        deletion::clear_subject_enrollments(conn, &actor, subject_id)
    })
    .await?;

    Ok(ApiResponse::ok(summary))
}

// class-subject assignments

/// Lists assignments with everything the assignment form needs.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<AssignmentsPage>`: Assignments, classes, subjects and teachers (200 OK).
#[instrument(skip(state, session))]
pub async fn list_assignments(
    State(state): State<AppState>,
    session: CurrentSession,
) -> PageResult<AssignmentsPage> {
    session.require(Role::Admin)?;

    let page = helper::run_query(&state.pool, |conn| {
        Ok(AssignmentsPage {
            assignments: load_assignments(conn, AssignmentScope::All)?,
            classes: load_classes(conn)?,
            subjects: load_subjects(conn)?,
            teachers: load_teachers(conn)?,
        })
    })
    .await?;

    info!("Fetched {} assignments", page.assignments.len());
    helper::page(&state, session, page).await
}

/// Assigns a teacher to a (class, subject) pair, replacing the current teacher
/// if the pair is already assigned.
#[instrument(skip(state, session, form))]
pub async fn upsert_assignment(
    State(state): State<AppState>,
    session: CurrentSession,
    Form(form): Form<AssignmentForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Upsert assignment payload: {:?}", form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let assignment = NewClassSubject {
            class_id: parse_id(&form.class_id, "Class")?,
            subject_id: parse_id(&form.subject_id, "Subject")?,
            teacher_id: parse_id(&form.teacher_id, "Teacher")?,
        };
        assignment::upsert_assignment(conn, &actor, assignment)
    })
    .await
    .map(|_| Notice::success("Assignment saved."));

    helper::redirect_with(&state, session, ASSIGNMENTS_PATH, outcome).await
}

/// Assignment edit page: teacher choices, current enrollments and students
/// that can be enrolled.
///
/// Returns (wrapped in `ApiResponse`)
/// * `PageView<AssignmentEditData>` (200 OK).
/// * `404 Not Found`: If the assignment does not exist.
#[instrument(skip(state, session))]
pub async fn edit_assignment_page(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_subject_id): Path<i64>,
) -> PageResult<AssignmentEditData> {
    session.require(Role::Admin)?;

    let data = helper::run_transaction(&state.pool, move |conn| {
        let assignment = load_assignments(conn, AssignmentScope::Id(class_subject_id))?
            .pop()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Class subject with ID {} not found.",
                    class_subject_id
                ))
            })?;

        Ok(AssignmentEditData {
            assignment,
            teachers: load_teachers(conn)?,
            enrollments: load_enrollments(conn, class_subject_id)?,
            students: load_students(conn)?,
        })
    })
    .await?;

    helper::page(&state, session, data).await
}

/// Points an assignment at another teacher. Enrollments and grades stay.
#[instrument(skip(state, session, form))]
pub async fn edit_assignment(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_subject_id): Path<i64>,
    Form(form): Form<ReassignTeacherForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Reassign class subject {} payload: {:?}", class_subject_id, form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let teacher_id = parse_id(&form.teacher_id, "Teacher")?;
        assignment::reassign_teacher(conn, &actor, class_subject_id, teacher_id)
    })
    .await;

    match outcome {
        Ok(()) => {
            helper::redirect_with(
                &state,
                session,
                ASSIGNMENTS_PATH,
                Ok(Notice::success("Teacher reassigned.")),
            )
            .await
        }
        Err(e) => {
            let back = format!("/admin/class-subjects/{}/edit", class_subject_id);
            helper::redirect_with(&state, session, &back, Err(e)).await
        }
    }
}

/// Deletes an assignment unless students are enrolled in it.
#[instrument(skip(state, session))]
pub async fn delete_assignment(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_subject_id): Path<i64>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    info!("Admin {} deleting class subject {}", actor.username, class_subject_id);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        deletion::delete_assignment(conn, &actor, class_subject_id)
    })
    .await
    .map(|()| Notice::success("Assignment deleted."));

    helper::redirect_with(&state, session, ASSIGNMENTS_PATH, outcome).await
}

// enrollments

/// Enrolls one student into an assignment.
#[instrument(skip(state, session, form))]
pub async fn enroll_student(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_subject_id): Path<i64>,
    Form(form): Form<EnrollStudentForm>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    debug!("Enroll into class subject {} payload: {:?}", class_subject_id, form);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        let student_id = parse_id(&form.student_id, "Student")?;
        assignment::enroll_student(conn, &actor, class_subject_id, student_id)
    })
    .await
    .map(|_| Notice::success("Student enrolled."));

    let back = format!("/admin/class-subjects/{}/edit", class_subject_id);
    helper::redirect_with(&state, session, &back, outcome).await
}

/// Enrolls every not yet enrolled student of the assignment's class.
#[instrument(skip(state, session))]
pub async fn enroll_class(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(class_subject_id): Path<i64>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        assignment::enroll_class(conn, &actor, class_subject_id)
    })
    .await
    .map(|count| Notice::success(format!("Enrolled {} students.", count)));

    let back = format!("/admin/class-subjects/{}/edit", class_subject_id);
    helper::redirect_with(&state, session, &back, outcome).await
}

/// Deletes an enrollment unless it has grades.
#[instrument(skip(state, session))]
pub async fn delete_enrollment(
    State(state): State<AppState>,
    session: CurrentSession,
    Path(enrollment_id): Path<i64>,
) -> RedirectResult {
    let actor = session.require(Role::Admin)?;
    info!("Admin {} deleting enrollment {}", actor.username, enrollment_id);

    let outcome = helper::run_transaction(&state.pool, move |conn| {
        deletion::delete_enrollment(conn, &actor, enrollment_id)
    })
    .await;

    match outcome {
        Ok(class_subject_id) => {
            let back = format!("/admin/class-subjects/{}/edit", class_subject_id);
            helper::redirect_with(&state, session, &back, Ok(Notice::success("Enrollment deleted.")))
                .await
        }
        Err(e) => helper::redirect_with(&state, session, ASSIGNMENTS_PATH, Err(e)).await,
    }
}

// lookups

enum AssignmentScope {
    All,
    Subject(i64),
    Id(i64),
}

fn load_roles(conn: &mut PgConnection) -> QueryResult<Vec<RoleItem>> {
    roles_dsl::roles
        .select((roles_dsl::id, roles_dsl::code))
        .order(roles_dsl::id)
        .load::<RoleItem>(conn)
}

fn load_classes(conn: &mut PgConnection) -> QueryResult<Vec<ClassItem>> {
    classes_dsl::classes
        .select((
            classes_dsl::id,
            classes_dsl::grade_year,
            classes_dsl::name_letter,
        ))
        .order((classes_dsl::grade_year, classes_dsl::name_letter))
        .load::<ClassItem>(conn)
}

fn load_subjects(conn: &mut PgConnection) -> QueryResult<Vec<SubjectItem>> {
    subjects_dsl::subjects
        .select((subjects_dsl::id, subjects_dsl::name))
        .order(subjects_dsl::name)
        .load::<SubjectItem>(conn)
}

fn load_teachers(conn: &mut PgConnection) -> QueryResult<Vec<TeacherOption>> {
    users_dsl::users
        .inner_join(roles_dsl::roles)
        .filter(roles_dsl::code.eq(Role::Teacher.code()))
        .select((users_dsl::id, users_dsl::first_name, users_dsl::last_name))
        .order((users_dsl::last_name, users_dsl::first_name))
        .load::<TeacherOption>(conn)
}

fn load_students(conn: &mut PgConnection) -> QueryResult<Vec<StudentOption>> {
    users_dsl::users
        .inner_join(roles_dsl::roles)
        .filter(roles_dsl::code.eq(Role::Student.code()))
        .select((users_dsl::id, users_dsl::first_name, users_dsl::last_name))
        .order((users_dsl::last_name, users_dsl::first_name))
        .load::<StudentOption>(conn)
}

fn find_subject(conn: &mut PgConnection, subject_id: i64) -> Result<SubjectItem, AppError> {
    subjects_dsl::subjects
        .find(subject_id)
        .select((subjects_dsl::id, subjects_dsl::name))
        .first::<SubjectItem>(conn)
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Subject with ID {} not found.", subject_id)))
}

fn load_assignments(conn: &mut PgConnection, scope: AssignmentScope) -> QueryResult<Vec<AssignmentItem>> {
    let mut query = cs_dsl::class_subjects
        .inner_join(classes_dsl::classes)
        .inner_join(subjects_dsl::subjects)
        .inner_join(users_dsl::users)
        .select((
            cs_dsl::id,
            cs_dsl::class_id,
            classes_dsl::grade_year,
            classes_dsl::name_letter,
            cs_dsl::subject_id,
            subjects_dsl::name,
            cs_dsl::teacher_id,
            users_dsl::first_name,
            users_dsl::last_name,
        ))
        .order((
            classes_dsl::grade_year,
            classes_dsl::name_letter,
            subjects_dsl::name,
        ))
        .into_boxed();

    query = match scope {
        AssignmentScope::All => query,
        AssignmentScope::Subject(subject_id) => query.filter(cs_dsl::subject_id.eq(subject_id)),
        AssignmentScope::Id(id) => query.filter(cs_dsl::id.eq(id)),
    };

    let rows = query.load::<(i64, i64, i32, String, i64, String, i64, String, String)>(conn)?;

    let ids: Vec<i64> = rows.iter().map(|row| row.0).collect();
    let enrolled: HashMap<i64, i64> = enr_dsl::enrollments
        .filter(enr_dsl::class_subject_id.eq_any(&ids))
        .group_by(enr_dsl::class_subject_id)
        .select((enr_dsl::class_subject_id, count_star()))
        .load::<(i64, i64)>(conn)?
        .into_iter()
        .collect();

    Ok(rows
        .into_iter()
        .map(
            |(id, class_id, grade_year, name_letter, subject_id, subject_name, teacher_id, first, last)| {
                AssignmentItem {
                    id,
                    class_id,
                    class_name: class_name(grade_year, &name_letter),
                    subject_id,
                    subject_name,
                    teacher_id,
                    teacher_name: format!("{} {}", first, last),
                    enrollment_count: enrolled.get(&id).copied().unwrap_or(0),
                }
            },
        )
        .collect())
}

fn load_enrollments(conn: &mut PgConnection, class_subject_id: i64) -> QueryResult<Vec<EnrollmentItem>> {
    let rows = enr_dsl::enrollments
        .inner_join(users_dsl::users)
        .filter(enr_dsl::class_subject_id.eq(class_subject_id))
        .select((
            enr_dsl::id,
            enr_dsl::student_id,
            users_dsl::first_name,
            users_dsl::last_name,
        ))
        .order((users_dsl::last_name, users_dsl::first_name))
        .load::<(i64, i64, String, String)>(conn)?;

    let ids: Vec<i64> = rows.iter().map(|row| row.0).collect();
    let graded: HashMap<i64, i64> = grades_dsl::grades
        .filter(grades_dsl::enrollment_id.eq_any(&ids))
        .group_by(grades_dsl::enrollment_id)
        .select((grades_dsl::enrollment_id, count_star()))
        .load::<(i64, i64)>(conn)?
        .into_iter()
        .collect();

    Ok(rows
        .into_iter()
        .map(|(id, student_id, first_name, last_name)| EnrollmentItem {
            grade_count: graded.get(&id).copied().unwrap_or(0),
            id,
            student_id,
            first_name,
            last_name,
        })
        .collect())
}

// form validation

fn required_text(raw: &str, field: &str) -> Result<String, AppError> {
    let value = raw.trim();
    if value.is_empty() {
        Err(AppError::Validation(format!("{} is required.", field)))
    } else {
        Ok(value.to_string())
    }
}

fn optional_email(raw: &str) -> Result<Option<String>, AppError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if !value.contains('@') {
        return Err(AppError::Validation(format!(
            "'{}' is not a valid email address.",
            value
        )));
    }
    Ok(Some(value.to_string()))
}

/// Parses a submitted id. An empty value means nothing was selected.
fn parse_id(raw: &str, label: &str) -> Result<i64, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation(format!("{} is required.", label)));
    }
    raw.parse::<i64>().map_err(|_| {
        AppError::Validation(format!("Invalid {} ID '{}'.", label.to_lowercase(), raw))
    })
}

fn validate_class(form: &ClassForm) -> Result<NewClass, AppError> {
    let raw_year = form.grade_year.trim();
    if raw_year.is_empty() {
        return Err(AppError::Validation("Grade year is required.".to_string()));
    }
    let grade_year = match raw_year.parse::<i32>() {
        Ok(year) if year >= 1 => year,
        _ => {
            return Err(AppError::Validation(
                "Grade year must be a positive number.".to_string(),
            ));
        }
    };
    let name_letter = required_text(&form.name_letter, "Class letter")?.to_uppercase();
    if name_letter.chars().count() > 5 {
        return Err(AppError::Validation(
            "Class letter must be at most 5 characters long.".to_string(),
        ));
    }
    Ok(NewClass {
        grade_year,
        name_letter,
    })
}

/// Resolves the submitted role and normalises the class: only students keep
/// one, and an empty selection means no class.
fn resolve_role_and_class(
    conn: &mut PgConnection,
    role_id: i64,
    raw_class_id: &str,
) -> Result<(Role, Option<i64>), AppError> {
    let code = roles_dsl::roles
        .find(role_id)
        .select(roles_dsl::code)
        .first::<String>(conn)
        .optional()?
        .ok_or_else(|| AppError::Validation(format!("Role with ID {} does not exist.", role_id)))?;
    let role = code
        .parse::<Role>()
        .map_err(|e| AppError::InternalServerError(anyhow!(e)))?;

    let raw = raw_class_id.trim();
    if role != Role::Student || raw.is_empty() {
        return Ok((role, None));
    }

    let class_id = parse_id(raw, "Class")?;
    let found = diesel::select(exists(classes_dsl::classes.find(class_id))).get_result::<bool>(conn)?;
    if !found {
        return Err(AppError::NotFound(format!(
            "Class with ID {} not found.",
            class_id
        )));
    }
    Ok((role, Some(class_id)))
}

fn ensure_role_change_allowed(
    conn: &mut PgConnection,
    actor: &Principal,
    user_id: i64,
    current: Role,
) -> Result<(), AppError> {
    match current {
        Role::Admin if actor.id == user_id => Err(AppError::Validation(
            "You cannot remove your own admin role.".to_string(),
        )),
        Role::Admin => Ok(()),
        Role::Teacher => {
            let assigned = diesel::select(exists(
                cs_dsl::class_subjects.filter(cs_dsl::teacher_id.eq(user_id)),
            ))
            .get_result::<bool>(conn)?;
            if assigned {
                Err(AppError::Validation(
                    "Teacher has assigned subjects; the role cannot change.".to_string(),
                ))
            } else {
                Ok(())
            }
        }
        Role::Student => {
            let enrolled = diesel::select(exists(
                enr_dsl::enrollments.filter(enr_dsl::student_id.eq(user_id)),
            ))
            .get_result::<bool>(conn)?;
            if enrolled {
                Err(AppError::Validation(
                    "Student has enrollments; the role cannot change.".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }
}

fn unique_conflict(err: DieselError, message: String) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::Conflict(message)
        }
        other => AppError::from(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_text_trims_and_rejects_blank() {
        assert_eq!(required_text("  Math ", "Name").unwrap(), "Math");
        assert!(matches!(required_text("   ", "Name"), Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_email_is_absent() {
        assert_eq!(optional_email(" ").unwrap(), None);
        assert_eq!(
            optional_email(" a@b.cz ").unwrap(),
            Some("a@b.cz".to_string())
        );
        assert!(optional_email("nobody").is_err());
    }

    fn class_form(grade_year: &str, name_letter: &str) -> ClassForm {
        ClassForm {
            grade_year: grade_year.to_string(),
            name_letter: name_letter.to_string(),
        }
    }

    #[test]
    fn class_letter_is_uppercased_and_bounded() {
        let class = validate_class(&class_form(" 2 ", " b ")).unwrap();
        assert_eq!(class.grade_year, 2);
        assert_eq!(class.name_letter, "B");

        assert!(validate_class(&class_form("0", "A")).is_err());
        assert!(validate_class(&class_form("1", "ABCDEF")).is_err());
    }

    #[test]
    fn grade_year_must_be_a_positive_number() {
        for raw in ["", "  ", "two", "-3", "1.5"] {
            assert!(
                matches!(validate_class(&class_form(raw, "A")), Err(AppError::Validation(_))),
                "accepted grade year {:?}",
                raw
            );
        }
    }

    #[test]
    fn ids_are_required_and_numeric() {
        assert_eq!(parse_id(" 42 ", "Teacher").unwrap(), 42);
        match parse_id("", "Role") {
            Err(AppError::Validation(message)) => assert_eq!(message, "Role is required."),
            other => panic!("unexpected result: {:?}", other),
        }
        match parse_id("abc", "Student") {
            Err(AppError::Validation(message)) => {
                assert_eq!(message, "Invalid student ID 'abc'.")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
