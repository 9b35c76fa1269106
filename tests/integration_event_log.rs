//! Event log over the filesystem blob store

use chrono::Utc;
use rust_decimal_macros::dec;

use event_ledger::aggregate::{replay, Account};
use event_ledger::event_log::{BlobEventLog, EventLog, FsBlobStore, LogError};
use event_ledger::{AccountEvent, AccountId, Amount};

fn id(s: &str) -> AccountId {
    AccountId::new(s).unwrap()
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();

    {
        let log = BlobEventLog::new(FsBlobStore::open(dir.path()).await.unwrap());
        log.append(&id("a"), &AccountEvent::created(id("a"), now)).await.unwrap();
        log.append(
            &id("a"),
            &AccountEvent::deposited(id("a"), Amount::new(dec!(8)).unwrap(), now),
        )
        .await
        .unwrap();
    }

    let log = BlobEventLog::new(FsBlobStore::open(dir.path()).await.unwrap());
    let events = log.read_all(&id("a")).await.unwrap().unwrap();
    let account: Account = replay(id("a"), &events);

    assert_eq!(events.len(), 2);
    assert_eq!(account.balance, dec!(8));
    assert_eq!(log.list_aggregates().await.unwrap(), vec![id("a")]);
}

#[tokio::test]
async fn test_blob_is_one_json_line_per_event() {
    let dir = tempfile::tempdir().unwrap();
    let log = BlobEventLog::new(FsBlobStore::open(dir.path()).await.unwrap());

    log.append(&id("acct-1"), &AccountEvent::created(id("acct-1"), Utc::now()))
        .await
        .unwrap();
    log.append(&id("acct-1"), &AccountEvent::created(id("acct-1"), Utc::now()))
        .await
        .unwrap();

    let raw = std::fs::read_to_string(dir.path().join("acct-1.jsonl")).unwrap();
    let lines: Vec<&str> = raw.lines().filter(|line| !line.is_empty()).collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["type"], "AccountCreated");
        assert_eq!(value["account_id"], "acct-1");
    }
}

#[tokio::test]
async fn test_damaged_file_reports_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let log = BlobEventLog::new(FsBlobStore::open(dir.path()).await.unwrap());
    log.append(&id("a"), &AccountEvent::created(id("a"), Utc::now()))
        .await
        .unwrap();

    let path = dir.path().join("a.jsonl");
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{not json\n");
    std::fs::write(&path, raw).unwrap();

    let err = log.read_all(&id("a")).await.unwrap_err();
    assert!(matches!(err, LogError::Corrupt { line: 2, .. }));

    // never overwrite what cannot be parsed
    let err = log
        .append(&id("a"), &AccountEvent::created(id("a"), Utc::now()))
        .await
        .unwrap_err();
    assert!(err.is_corrupt());
}

#[tokio::test]
async fn test_longest_valid_id_fits_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let log = BlobEventLog::new(FsBlobStore::open(dir.path()).await.unwrap());

    let long = "x".repeat(200);
    let account = id(&long);
    log.append(&account, &AccountEvent::created(account.clone(), Utc::now()))
        .await
        .unwrap();

    assert_eq!(log.read_all(&account).await.unwrap().unwrap().len(), 1);
    assert_eq!(log.list_aggregates().await.unwrap(), vec![account]);
    assert!(AccountId::new(".hidden").is_err());
}
