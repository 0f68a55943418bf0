use axum::http::StatusCode;
use gradebook_server::auth::Role;
use gradebook_server::payloads::user::LoginForm;
use gradebook_server::presentation::NoticeLevel;

mod helpers;
use helpers::{
    assert_redirect, create_test_class, create_test_user, get_page, login, login_as, messages,
    setup_test_environment,
};

// login

#[tokio::test]
async fn test_login_redirects_each_role_to_its_home() {
    let env = setup_test_environment().await;
    let class_id = create_test_class(&env.pool, 1, "A").await;
    create_test_user(&env.pool, "admin", Role::Admin, None, None).await;
    create_test_user(&env.pool, "teacher", Role::Teacher, None, None).await;
    create_test_user(&env.pool, "student", Role::Student, Some(class_id), None).await;

    for (username, home) in [
        ("admin", "/admin"),
        ("teacher", "/teacher"),
        ("student", "/student"),
    ] {
        let response = login(&env.server, username).await;
        assert_redirect(&response, home);
    }
}

#[tokio::test]
async fn test_login_wrong_password_shows_notice_once() {
    let env = setup_test_environment().await;
    create_test_user(&env.pool, "teacher", Role::Teacher, None, None).await;

    let response = env
        .server
        .post("/user/login")
        .form(&LoginForm {
            username: "teacher".to_string(),
            password: "wrong".to_string(),
        })
        .await;
    assert_redirect(&response, "/user/login");

    let page = get_page::<()>(&env.server, "/user/login").await;
    assert!(page.user.is_none());
    assert_eq!(page.notices.len(), 1);
    assert_eq!(page.notices[0].level, NoticeLevel::Error);
    assert_eq!(page.notices[0].message, "Invalid username or password.");

    let page = get_page::<()>(&env.server, "/user/login").await;
    assert!(page.notices.is_empty());
}

#[tokio::test]
async fn test_login_unknown_user_fails_like_wrong_password() {
    let env = setup_test_environment().await;

    let response = login(&env.server, "ghost").await;
    assert_redirect(&response, "/user/login");

    let page = get_page::<()>(&env.server, "/user/login").await;
    assert_eq!(
        messages(&page.notices),
        vec!["Invalid username or password.".to_string()]
    );
}

#[tokio::test]
async fn test_login_stores_principal_in_session() {
    let env = setup_test_environment().await;
    let admin_id = create_test_user(&env.pool, "admin", Role::Admin, None, None).await;

    login_as(&env.server, "admin", Role::Admin).await;

    let page = get_page::<()>(&env.server, "/user/login").await;
    let user = page.user.expect("principal in session");
    assert_eq!(user.id, admin_id);
    assert_eq!(user.username, "admin");
    assert_eq!(user.role, Role::Admin);
}

// routing guards

#[tokio::test]
async fn test_root_redirects_anonymous_to_login() {
    let env = setup_test_environment().await;

    let response = env.server.get("/").await;
    assert_redirect(&response, "/user/login");
}

#[tokio::test]
async fn test_root_redirects_signed_in_user_home() {
    let env = setup_test_environment().await;
    create_test_user(&env.pool, "teacher", Role::Teacher, None, None).await;
    login_as(&env.server, "teacher", Role::Teacher).await;

    let response = env.server.get("/").await;
    assert_redirect(&response, "/teacher");
}

#[tokio::test]
async fn test_protected_pages_require_login() {
    let env = setup_test_environment().await;

    for path in ["/admin", "/admin/classes", "/teacher", "/student"] {
        let response = env.server.get(path).await;
        assert_redirect(&response, "/user/login");
    }

    let response = env.server.post("/admin/subjects/1/delete").await;
    assert_redirect(&response, "/user/login");
}

#[tokio::test]
async fn test_wrong_role_is_sent_to_login() {
    let env = setup_test_environment().await;
    let class_id = create_test_class(&env.pool, 2, "B").await;
    create_test_user(&env.pool, "student", Role::Student, Some(class_id), None).await;
    login_as(&env.server, "student", Role::Student).await;

    let response = env.server.get("/admin").await;
    assert_redirect(&response, "/user/login");

    let response = env.server.get("/teacher").await;
    assert_redirect(&response, "/user/login");
}

// logout

#[tokio::test]
async fn test_logout_ends_the_session() {
    let env = setup_test_environment().await;
    create_test_user(&env.pool, "teacher", Role::Teacher, None, None).await;
    login_as(&env.server, "teacher", Role::Teacher).await;

    let response = env.server.get("/user/logout").await;
    assert_redirect(&response, "/user/login");

    let response = env.server.get("/teacher").await;
    assert_redirect(&response, "/user/login");

    let session_files = std::fs::read_dir(env.data_dir.join("sessions"))
        .expect("session dir")
        .count();
    assert_eq!(session_files, 0);
}

// fallback

#[tokio::test]
async fn test_unknown_path_returns_plain_404() {
    let env = setup_test_environment().await;

    let response = env.server.get("/no/such/page").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "Page \"/no/such/page\" does not exist!");
}
