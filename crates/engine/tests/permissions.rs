mod common;

use common::*;
use engine::{Capability, EngineError, ErrorKind};
use sea_orm::ConnectionTrait;

fn denied() -> EngineError {
    EngineError::Forbidden("access to group denied".to_string())
}

#[tokio::test]
async fn owner_receives_every_capability() {
    let (engine, _db) = engine_with_db().await;
    let group = engine.create_group(OWNER, "Flat", None).await.unwrap();

    for capability in Capability::ALL {
        assert!(
            engine
                .has_capability(OWNER, group.id, capability)
                .await
                .unwrap()
        );
    }
    let grants = engine.list_user_grants(OWNER).await.unwrap();
    assert_eq!(grants.len(), 4);
    assert!(grants.iter().all(|g| g.group_id == group.id && g.active));
}

#[tokio::test]
async fn granting_twice_is_a_no_op() {
    let (engine, db) = engine_with_db().await;
    let group = engine.create_group(OWNER, "Flat", None).await.unwrap();

    let caps = [Capability::View, Capability::Edit, Capability::View];
    engine.grant_capabilities(BOB, group.id, &caps).await.unwrap();
    engine.grant_capabilities(BOB, group.id, &caps).await.unwrap();

    let rows = count_rows(
        &db,
        "SELECT COUNT(*) FROM group_user_permissions WHERE user_id = 2",
    )
    .await;
    assert_eq!(rows, 2);
    assert!(
        !engine
            .has_capability(BOB, group.id, Capability::Delete)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn grant_racing_an_identical_grant_succeeds() {
    let (engine, db) = engine_with_db().await;
    let group = engine.create_group(OWNER, "Flat", None).await.unwrap();

    // Another writer stores the same active grant after the held-capability read.
    db.execute_unprepared(
        "CREATE TRIGGER racing_grant BEFORE INSERT ON group_user_permissions \
         WHEN NEW.user_id = 2 AND NOT EXISTS ( \
             SELECT 1 FROM group_user_permissions \
             WHERE group_id = NEW.group_id AND user_id = NEW.user_id \
             AND capability = NEW.capability AND is_active = 1 AND deleted_at IS NULL) \
         BEGIN \
             INSERT INTO group_user_permissions \
                 (group_id, user_id, capability, is_active, created_at, updated_at) \
             VALUES (NEW.group_id, NEW.user_id, NEW.capability, 1, NEW.created_at, NEW.updated_at); \
         END",
    )
    .await
    .unwrap();

    engine
        .grant_capabilities(BOB, group.id, &[Capability::View, Capability::Edit])
        .await
        .unwrap();

    let rows = count_rows(
        &db,
        "SELECT COUNT(*) FROM group_user_permissions \
         WHERE user_id = 2 AND is_active = 1 AND deleted_at IS NULL",
    )
    .await;
    assert_eq!(rows, 2);
    assert!(
        engine
            .has_capability(BOB, group.id, Capability::Edit)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn never_granted_is_false_not_an_error() {
    let (engine, _db) = engine_with_db().await;
    assert!(
        !engine
            .has_capability(MALLORY, 12345, Capability::View)
            .await
            .unwrap()
    );
    assert!(engine.list_user_grants(MALLORY).await.unwrap().is_empty());
}

#[tokio::test]
async fn revoke_all_deactivates_every_grant_of_the_group() {
    let (engine, _db) = engine_with_db().await;
    let group_id = group_of_three(&engine).await;
    let other = engine.create_group(OWNER, "Other", None).await.unwrap();

    engine.revoke_all_for_group(group_id).await.unwrap();

    for user in [OWNER, BOB, CAROL] {
        for capability in Capability::ALL {
            assert!(
                !engine
                    .has_capability(user, group_id, capability)
                    .await
                    .unwrap()
            );
        }
    }
    // Grants on other groups are untouched.
    assert!(
        engine
            .has_capability(OWNER, other.id, Capability::Delete)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn revoked_capability_can_be_granted_again() {
    let (engine, _db) = engine_with_db().await;
    let group = engine.create_group(OWNER, "Flat", None).await.unwrap();
    engine
        .grant_capabilities(BOB, group.id, &[Capability::View])
        .await
        .unwrap();
    engine.revoke_all_for_group(group.id).await.unwrap();

    engine
        .grant_capabilities(BOB, group.id, &[Capability::View])
        .await
        .unwrap();
    assert!(
        engine
            .has_capability(BOB, group.id, Capability::View)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn gate_hides_whether_the_group_exists() {
    let (engine, _db) = engine_with_db().await;
    let group = engine.create_group(OWNER, "Flat", None).await.unwrap();

    let missing_group = engine
        .validate_user_group_permission(OWNER, group.id + 100, Capability::View)
        .await
        .unwrap_err();
    let missing_capability = engine
        .validate_user_group_permission(MALLORY, group.id, Capability::View)
        .await
        .unwrap_err();

    assert_eq!(missing_group, denied());
    assert_eq!(missing_capability, missing_group);
    assert_eq!(missing_group.kind(), ErrorKind::Forbidden);

    engine
        .validate_user_group_permission(OWNER, group.id, Capability::Delete)
        .await
        .unwrap();
}

#[tokio::test]
async fn gate_denies_removed_groups() {
    let (engine, _db) = engine_with_db().await;
    let group = engine.create_group(OWNER, "Flat", None).await.unwrap();
    engine.remove_group(OWNER, group.id).await.unwrap();

    assert_eq!(
        engine
            .validate_user_group_permission(OWNER, group.id, Capability::View)
            .await
            .unwrap_err(),
        denied()
    );
}

#[tokio::test]
async fn storage_failure_is_upstream() {
    let (engine, db) = engine_with_db().await;
    drop_table(&db, "group_user_permissions").await;

    let err = engine
        .has_capability(OWNER, 1, Capability::View)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Upstream("permission check failed".to_string()));
    assert!(!err.to_string().contains("group_user_permissions"));
}
