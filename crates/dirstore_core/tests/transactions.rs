//! Integration tests for operation and user transactions through the
//! backend interface.

use dirstore_core::{
    Backend, BackendConfig, ChangeKind, Database, EntryId, MdbBackend, MemoryIndexCatalog,
    NewEntry, TxnMode, TxnState, WriteTxnCounter,
};
use dirstore_storage::InMemoryEngine;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

struct Fixture {
    backend: MdbBackend,
    main: Arc<InMemoryEngine>,
    counter: Arc<WriteTxnCounter>,
}

fn open_with(config: BackendConfig) -> Fixture {
    let main = Arc::new(InMemoryEngine::new());
    let counter = Arc::new(WriteTxnCounter::new());
    let backend = MdbBackend::open(
        config,
        main.clone(),
        Arc::new(InMemoryEngine::new()),
        Arc::new(MemoryIndexCatalog::new()),
        Arc::clone(&counter),
    )
    .unwrap();
    Fixture {
        backend,
        main,
        counter,
    }
}

fn open() -> Fixture {
    open_with(BackendConfig::default())
}

fn visible_elsewhere(backend: &MdbBackend, dn: &str) -> bool {
    thread::scope(|scope| {
        scope
            .spawn(|| {
                let ctx = backend.new_context();
                backend.dn_to_entry_id(&ctx, dn).is_ok()
            })
            .join()
            .unwrap()
    })
}

#[test]
fn user_transaction_spans_operations_and_is_isolated() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    fx.backend.begin_user_txn(&mut ctx, "T1").unwrap();
    assert_eq!(ctx.txns().main().state(), TxnState::PendingStart);

    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    let parent = ctx.txns().main().parent();
    assert_eq!(ctx.txns().main().state(), TxnState::UserInProgress);
    assert_eq!(ctx.txns().main().child(), None);

    fx.backend.add_entry(&mut ctx, NewEntry::new("ou=people,dc=example")).unwrap();
    assert_eq!(ctx.txns().main().parent(), parent);

    assert!(fx.backend.dn_to_entry_id(&ctx, "ou=people,dc=example").is_ok());
    assert!(!visible_elsewhere(&fx.backend, "ou=people,dc=example"));
    assert!(fx.backend.read_journal(Database::Main).unwrap().is_empty());

    fx.backend.commit_user_txn(&mut ctx).unwrap();
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert_eq!(ctx.client_txn_id(), None);
    assert!(visible_elsewhere(&fx.backend, "ou=people,dc=example"));

    let journal = fx.backend.read_journal(Database::Main).unwrap();
    assert_eq!(journal.len(), 2);
    assert!(journal.iter().all(|(_, record)| record.kind == ChangeKind::Add));
    assert_eq!(fx.main.open_transactions(), 0);
    assert_eq!(fx.counter.outstanding(), 0);
}

#[test]
fn second_client_transaction_id_discards_the_user_transaction() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    fx.backend.begin_user_txn(&mut ctx, "T1").unwrap();
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();

    ctx.set_client_txn_id(Some("T2".to_string()));
    let err = fx
        .backend
        .add_entry(&mut ctx, NewEntry::new("ou=people,dc=example"))
        .unwrap_err();
    assert!(err.is_unwilling());
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert_eq!(ctx.client_txn_id(), None);
    assert_eq!(fx.main.open_transactions(), 0);
    assert_eq!(fx.counter.outstanding(), 0);

    assert!(!visible_elsewhere(&fx.backend, "dc=example"));
    assert!(fx.backend.read_journal(Database::Main).unwrap().is_empty());
    assert_eq!(fx.backend.stats().unwilling, 1);
    assert!(fx.backend.abort_user_txn(&mut ctx).unwrap_err().is_unwilling());

    // the next operation runs on its own
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert!(visible_elsewhere(&fx.backend, "dc=example"));
}

#[test]
fn failed_operation_inside_user_transaction_keeps_earlier_work() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    fx.backend.begin_user_txn(&mut ctx, "T1").unwrap();
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();

    assert!(fx
        .backend
        .add_entry(&mut ctx, NewEntry::new("cn=x,ou=missing,dc=example"))
        .is_err());
    assert_eq!(ctx.txns().main().state(), TxnState::UserInProgress);

    fx.backend.commit_user_txn(&mut ctx).unwrap();
    assert!(visible_elsewhere(&fx.backend, "dc=example"));
    assert_eq!(fx.backend.read_journal(Database::Main).unwrap().len(), 1);
}

#[test]
fn expired_user_transaction_must_be_aborted() {
    let fx = open_with(BackendConfig::default().max_user_txn_duration(Duration::from_millis(1)));
    let mut ctx = fx.backend.new_context();
    fx.backend.begin_user_txn(&mut ctx, "T1").unwrap();
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    thread::sleep(Duration::from_millis(20));

    assert!(fx
        .backend
        .add_entry(&mut ctx, NewEntry::new("ou=people,dc=example"))
        .unwrap_err()
        .is_unwilling());
    assert!(fx.backend.commit_user_txn(&mut ctx).unwrap_err().is_unwilling());
    assert_eq!(ctx.client_txn_id(), Some("T1"));

    fx.backend.abort_user_txn(&mut ctx).unwrap();
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert!(!visible_elsewhere(&fx.backend, "dc=example"));
    assert_eq!(fx.main.open_transactions(), 0);
}

#[test]
fn caller_transaction_groups_operations() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    assert!(fx.backend.txn_begin(&mut ctx, Database::Main, TxnMode::Write).unwrap());
    assert!(!fx.backend.txn_begin(&mut ctx, Database::Main, TxnMode::Read).unwrap());

    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    fx.backend.add_entry(&mut ctx, NewEntry::new("ou=people,dc=example")).unwrap();
    assert_eq!(ctx.txns().main().state(), TxnState::OpInProgress);
    assert_eq!(fx.counter.outstanding(), 0);
    assert!(!visible_elsewhere(&fx.backend, "dc=example"));

    fx.backend.txn_commit(&mut ctx, Database::Main).unwrap();
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert!(visible_elsewhere(&fx.backend, "ou=people,dc=example"));
    assert_eq!(fx.backend.read_journal(Database::Main).unwrap().len(), 2);
}

#[test]
fn caller_abort_discards_grouped_operations() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    fx.backend.txn_begin(&mut ctx, Database::Main, TxnMode::Write).unwrap();
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    fx.backend.txn_abort(&mut ctx, Database::Main);

    assert!(!visible_elsewhere(&fx.backend, "dc=example"));
    assert!(fx.backend.read_journal(Database::Main).unwrap().is_empty());
    assert_eq!(fx.backend.max_entry_id(&ctx).unwrap(), None);
}

#[test]
fn write_inside_read_transaction_is_refused() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    assert!(fx.backend.txn_begin(&mut ctx, Database::Main, TxnMode::Read).unwrap());

    let err = fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap_err();
    assert!(err.is_unwilling());
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert_eq!(fx.main.open_transactions(), 0);
    assert!(fx.backend.txn_commit(&mut ctx, Database::Main).is_err());
}

#[test]
fn downgrade_inside_write_transaction_keeps_write_mode() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    assert!(fx.backend.txn_begin(&mut ctx, Database::Main, TxnMode::Write).unwrap());
    assert!(!fx.backend.txn_begin(&mut ctx, Database::Main, TxnMode::Read).unwrap());
    assert_eq!(ctx.txns().main().mode(), TxnMode::Write);

    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    fx.backend.txn_commit(&mut ctx, Database::Main).unwrap();
    assert!(visible_elsewhere(&fx.backend, "dc=example"));
}

#[test]
fn commit_without_begin_fails() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    assert!(fx.backend.txn_commit(&mut ctx, Database::Main).is_err());
    assert!(fx.backend.txn_commit(&mut ctx, Database::Log).is_err());
    assert!(fx.backend.commit_user_txn(&mut ctx).unwrap_err().is_unwilling());
}

#[test]
fn log_database_runs_its_own_transactions() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    ctx.set_client_txn_id(Some("T1".to_string()));

    assert!(fx.backend.txn_begin(&mut ctx, Database::Log, TxnMode::Write).unwrap());
    assert_eq!(ctx.txns().log().state(), TxnState::OpInProgress);
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert!(fx
        .backend
        .txn_begin(&mut ctx, Database::Log, TxnMode::Write)
        .map(|began| !began)
        .unwrap());

    fx.backend.txn_commit(&mut ctx, Database::Log).unwrap();
    assert_eq!(ctx.txns().log().state(), TxnState::None);
    assert_eq!(fx.counter.outstanding(), 0);
}

#[test]
fn abort_all_cleans_up_after_a_lost_connection() {
    let fx = open();
    let mut ctx = fx.backend.new_context();
    fx.backend.begin_user_txn(&mut ctx, "T1").unwrap();
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    fx.backend.txn_begin(&mut ctx, Database::Log, TxnMode::Read).unwrap();

    fx.backend.abort_all(&mut ctx);
    assert_eq!(ctx.txns().main().state(), TxnState::None);
    assert_eq!(ctx.txns().log().state(), TxnState::None);
    assert_eq!(ctx.client_txn_id(), None);
    assert_eq!(fx.main.open_transactions(), 0);
    assert_eq!(fx.counter.outstanding(), 0);

    // the writer slot is free again
    fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    assert_eq!(
        fx.backend.dn_to_entry_id(&ctx, "dc=example").unwrap(),
        EntryId::new(100)
    );
}

#[test]
fn writers_on_different_threads_are_serialized() {
    let fx = open();
    {
        let mut ctx = fx.backend.new_context();
        fx.backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
    }

    thread::scope(|scope| {
        for worker in 0..4 {
            let backend = &fx.backend;
            scope.spawn(move || {
                let mut ctx = backend.new_context();
                for n in 0..10 {
                    let dn = format!("cn=w{worker}n{n},dc=example");
                    backend.add_entry(&mut ctx, NewEntry::new(dn)).unwrap();
                }
            });
        }
    });

    let ctx = fx.backend.new_context();
    assert_eq!(fx.backend.max_entry_id(&ctx).unwrap(), Some(EntryId::new(140)));
    assert_eq!(fx.backend.read_journal(Database::Main).unwrap().len(), 41);
    assert_eq!(fx.backend.stats().entries_added, 41);
    assert_eq!(fx.counter.outstanding(), 0);
}
