use netronome::core::auth;
use netronome::Error;

#[tokio::test]
async fn bootstrap_user_roundtrip() {
    let store = crate::common::memory_store().await;

    let user = auth::register_user(&store, "admin", "hunter2hunter2")
        .await
        .unwrap();
    assert_eq!(user.username, "admin");
    assert!(user.password_hash.starts_with("$argon2"));

    let resolved = auth::verify_login(&store, "admin", "hunter2hunter2")
        .await
        .unwrap();
    assert_eq!(resolved.id, user.id);
}

#[tokio::test]
async fn registration_is_blocked_after_the_first_user() {
    let store = crate::common::memory_store().await;
    auth::register_user(&store, "admin", "hunter2hunter2")
        .await
        .unwrap();

    let second = auth::register_user(&store, "intruder", "password123").await;
    assert!(matches!(second, Err(Error::Conflict(_))), "{second:?}");
    assert_eq!(store.user_count().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_usernames_conflict() {
    let store = crate::common::memory_store().await;
    store.create_user("admin", "$argon2id$a").await.unwrap();
    let dup = store.create_user("admin", "$argon2id$b").await;
    assert!(matches!(dup, Err(Error::Conflict(_))), "{dup:?}");
}

#[tokio::test]
async fn wrong_credentials_do_not_reveal_which_part_failed() {
    let store = crate::common::memory_store().await;
    auth::register_user(&store, "admin", "hunter2hunter2")
        .await
        .unwrap();

    let bad_password = auth::verify_login(&store, "admin", "wrong-password").await;
    let bad_user = auth::verify_login(&store, "ghost", "hunter2hunter2").await;
    match (bad_password, bad_user) {
        (Err(Error::Unauthorized(a)), Err(Error::Unauthorized(b))) => assert_eq!(a, b),
        other => panic!("expected Unauthorized pair, got {other:?}"),
    }
}

#[tokio::test]
async fn change_password_rotates_the_hash() {
    let store = crate::common::memory_store().await;
    auth::register_user(&store, "admin", "hunter2hunter2")
        .await
        .unwrap();

    auth::change_password(&store, "admin", "correct horse battery")
        .await
        .unwrap();

    assert!(auth::verify_login(&store, "admin", "hunter2hunter2")
        .await
        .is_err());
    assert!(auth::verify_login(&store, "admin", "correct horse battery")
        .await
        .is_ok());

    let missing = auth::change_password(&store, "ghost", "whatever-pass").await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
}
