//! Startup recovery: interrupted filesystem transactions and stale leases.

mod common;

use std::time::Duration;

use common::StubGateway;
use common::engine_with;
use common::register_chain;
use deespec_fs_txn::TxnManager;
use deespec_protocol::SbiStatus;
use deespec_state::LockFamily;
use deespec_state::LockType;
use pretty_assertions::assert_eq;

#[tokio::test]
async fn engine_startup_replays_interrupted_commits() {
    let (engine, _dir) = engine_with(StubGateway::always("DECISION: SUCCEEDED")).await;
    let home = engine.workspace().home().to_path_buf();

    // Simulate a crash mid-commit: staged {x, y}, intent marked, only x
    // renamed into place.
    let manager = TxnManager::new(engine.workspace().txn_root());
    let mut txn = manager.begin().expect("begin");
    txn.stage_file("reports/sbi/sbi-crash/implement_1.md", b"x")
        .expect("stage x");
    txn.stage_file("reports/sbi/sbi-crash/review_1.md", b"y")
        .expect("stage y");
    txn.mark_intent(&home).expect("intent");
    std::fs::create_dir_all(home.join("reports/sbi/sbi-crash")).expect("target dir");
    std::fs::rename(
        txn.dir().join("reports/sbi/sbi-crash/implement_1.md"),
        home.join("reports/sbi/sbi-crash/implement_1.md"),
    )
    .expect("partial rename");
    drop(txn);

    // A fresh engine over the same workspace runs recovery in new().
    let prompts = std::sync::Arc::new(deespec_core::FsPromptRepository::new(
        engine.workspace().prompts_dir(),
    ));
    let reopened = deespec_core::Engine::new(
        engine.workspace().clone(),
        StubGateway::always("DECISION: SUCCEEDED"),
        prompts,
        deespec_core::EngineConfig::default(),
    )
    .await
    .expect("reopen");

    assert_eq!(
        std::fs::read(home.join("reports/sbi/sbi-crash/implement_1.md")).expect("x"),
        b"x"
    );
    assert_eq!(
        std::fs::read(home.join("reports/sbi/sbi-crash/review_1.md")).expect("y"),
        b"y"
    );
    assert_eq!(
        std::fs::read_dir(reopened.workspace().txn_root())
            .expect("txn root")
            .count(),
        0,
        "staging directories swept"
    );
}

#[tokio::test]
async fn expired_lease_does_not_stall_the_queue() {
    let (engine, _dir) = engine_with(StubGateway::always("DECISION: SUCCEEDED")).await;
    let sbis = register_chain(&engine, 1).await;
    let id = sbis[0].id.clone();

    // A leftover lease whose TTL has lapsed (dead-owner reclamation before
    // expiry is covered by the lock manager's own tests).
    let granted = engine
        .store()
        .acquire_lock(
            LockFamily::Run,
            id.as_str(),
            LockType::Run,
            Duration::from_millis(1),
        )
        .await
        .expect("acquire");
    assert!(granted.is_some());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The next tick reclaims the lease inline and executes the pick turn.
    let cancel = tokio_util::sync::CancellationToken::new();
    let outcome = engine.execute_one_turn(&cancel).await.expect("turn");
    match outcome {
        deespec_core::ExecuteOutcome::Turn(turn) => {
            assert_eq!(turn.next_status, SbiStatus::Picked);
        }
        deespec_core::ExecuteOutcome::NoOp { reason } => {
            panic!("expected a turn, got no-op: {reason}");
        }
    }
}
