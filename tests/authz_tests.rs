use gopher_social::{
    AppError,
    authz::{PermissionPolicy, authorize, check_permission, require_level},
    models::{Comment, Identity, Post, Role},
};

fn identity(id: i64, level: i32) -> Identity {
    Identity {
        id,
        username: format!("user{id}"),
        email: format!("user{id}@example.com"),
        is_active: true,
        role: Role {
            id: level as i64,
            name: "test".to_string(),
            level,
        },
    }
}

fn post_owned_by(user_id: i64) -> Post {
    Post {
        id: 1,
        title: "title".to_string(),
        content: "content".to_string(),
        user_id,
        ..Post::default()
    }
}

#[test]
fn test_owner_is_allowed_regardless_of_level() {
    let owner = identity(10, 1);
    let post = post_owned_by(10);

    assert!(check_permission(&owner, &post, 3));
    assert!(check_permission(&owner, &post, i32::MAX));
    assert!(authorize(&owner, &post, 3).is_ok());
}

#[test]
fn test_non_owner_below_level_is_forbidden() {
    let user = identity(11, 1);
    let post = post_owned_by(10);

    assert!(!check_permission(&user, &post, 2));
    assert!(matches!(authorize(&user, &post, 2), Err(AppError::Forbidden)));
}

#[test]
fn test_non_owner_at_or_above_level_is_allowed() {
    let post = post_owned_by(10);

    assert!(check_permission(&identity(11, 2), &post, 2));
    assert!(check_permission(&identity(12, 3), &post, 2));
}

#[test]
fn test_default_policy_moderator_may_update_but_not_delete() {
    let policy = PermissionPolicy::default();
    let moderator = identity(20, 2);
    let post = post_owned_by(10);

    assert!(authorize(&moderator, &post, policy.update_post_level).is_ok());
    assert!(authorize(&moderator, &post, policy.delete_post_level).is_err());
}

#[test]
fn test_comments_are_owned_by_their_author() {
    let comment = Comment {
        id: 1,
        post_id: 1,
        user_id: 30,
        content: "hi".to_string(),
        ..Comment::default()
    };

    assert!(check_permission(&identity(30, 1), &comment, 3));
    assert!(!check_permission(&identity(31, 1), &comment, 3));
}

#[test]
fn test_require_level() {
    assert!(require_level(&identity(1, 3), 3).is_ok());
    assert!(matches!(require_level(&identity(1, 2), 3), Err(AppError::Forbidden)));
}
