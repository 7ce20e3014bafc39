use chrono::{TimeZone, Utc};

use nearbux_core::domain::{OwnerId, PhoneNumber, ShopContext, ShopId};
use nearbux_core::flows::{FlowKind, FlowSnapshot, Step};
use nearbux_core::verification::IdentityToken;
use nearbux_db::repositories::{FlowSnapshotRepository, SqlFlowSnapshotRepository};
use nearbux_db::{connect_with_settings, migrations, DbPool};

async fn setup_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
    migrations::run_pending(&pool).await.expect("run migrations");
    pool
}

fn verified_snapshot(session_id: &str) -> FlowSnapshot {
    FlowSnapshot {
        session_id: session_id.to_string(),
        flow: FlowKind::CustomerSignup,
        step: Step::LocationEntry,
        phone: Some(PhoneNumber::parse("9876543210").expect("phone")),
        identity: Some(IdentityToken::new("id-token-1")),
        shop: None,
        updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).single().expect("timestamp"),
    }
}

#[tokio::test]
async fn snapshot_round_trips_through_sqlite() {
    let repo = SqlFlowSnapshotRepository::new(setup_pool().await);
    let snapshot = verified_snapshot("sess-1");

    repo.save(snapshot.clone()).await.expect("save snapshot");

    let loaded = repo.load("sess-1").await.expect("load snapshot");
    assert_eq!(loaded, Some(snapshot));
}

#[tokio::test]
async fn saving_again_overwrites_the_session_row() {
    let repo = SqlFlowSnapshotRepository::new(setup_pool().await);
    repo.save(verified_snapshot("sess-2")).await.expect("save first");

    let shop = ShopContext { shop_id: ShopId(11), owner_id: OwnerId(4) };
    let promotion = FlowSnapshot {
        session_id: "sess-2".to_string(),
        flow: FlowKind::Promotion,
        step: Step::Payment,
        phone: None,
        identity: None,
        shop: Some(shop),
        updated_at: Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).single().expect("timestamp"),
    };
    repo.save(promotion.clone()).await.expect("save second");

    let loaded = repo.load("sess-2").await.expect("load").expect("present");
    assert_eq!(loaded.flow, FlowKind::Promotion);
    assert_eq!(loaded.shop, Some(shop));
    assert_eq!(loaded.identity, None);
}

#[tokio::test]
async fn delete_removes_only_the_named_session() {
    let repo = SqlFlowSnapshotRepository::new(setup_pool().await);
    repo.save(verified_snapshot("keep")).await.expect("save keep");
    repo.save(verified_snapshot("drop")).await.expect("save drop");

    repo.delete("drop").await.expect("delete");
    repo.delete("never-saved").await.expect("deleting a missing row is fine");

    assert!(repo.load("drop").await.expect("load drop").is_none());
    assert!(repo.load("keep").await.expect("load keep").is_some());
}

#[tokio::test]
async fn purge_removes_snapshots_older_than_the_cutoff() {
    let repo = SqlFlowSnapshotRepository::new(setup_pool().await);
    repo.save(verified_snapshot("old")).await.expect("save old");
    let recent = FlowSnapshot {
        updated_at: Utc.with_ymd_and_hms(2026, 3, 31, 9, 0, 0).single().expect("timestamp"),
        ..verified_snapshot("recent")
    };
    repo.save(recent).await.expect("save recent");

    let cutoff = Utc.with_ymd_and_hms(2026, 3, 31, 8, 0, 0).single().expect("cutoff");
    let purged = repo.purge_older_than(cutoff).await.expect("purge");

    assert_eq!(purged, 1);
    assert!(repo.load("old").await.expect("load old").is_none());
    assert!(repo.load("recent").await.expect("load recent").is_some());
}

#[tokio::test]
async fn unknown_flow_kind_is_a_decode_error() {
    let pool = setup_pool().await;
    let repo = SqlFlowSnapshotRepository::new(pool.clone());

    sqlx::query("PRAGMA ignore_check_constraints = ON").execute(&pool).await.expect("pragma");
    sqlx::query(
        "INSERT INTO flow_snapshot (session_id, flow, step, updated_at)
         VALUES ('bad', 'checkout', 'PhoneEntry', '2026-03-01T10:30:00Z')",
    )
    .execute(&pool)
    .await
    .expect("insert raw row");

    let error = repo.load("bad").await.expect_err("unknown flow");
    assert!(error.to_string().contains("unknown flow kind `checkout`"));
}
