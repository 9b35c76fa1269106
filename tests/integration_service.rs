//! Account service scenarios over the in-memory stack

use rust_decimal_macros::dec;

use event_ledger::cache::AccountCache;
use event_ledger::event_log::EventLog;
use event_ledger::handlers::{CreateAccountCommand, DepositCommand, WithdrawCommand};
use event_ledger::projection::ReadModel;
use event_ledger::{AccountId, AppError, DomainError};

mod common;

use common::TestStack;

fn id(s: &str) -> AccountId {
    AccountId::new(s).unwrap()
}

async fn log_len(stack: &TestStack, account: &str) -> usize {
    stack
        .log
        .read_all(&id(account))
        .await
        .unwrap()
        .map(|events| events.len())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_end_to_end_balance_and_projection() {
    let stack = TestStack::new();

    stack.service.create_account(CreateAccountCommand::new("x")).await.unwrap();
    stack.service.deposit(DepositCommand::new("x", dec!(50))).await.unwrap();
    stack.service.withdraw(WithdrawCommand::new("x", dec!(20))).await.unwrap();

    let account = stack.service.get_account("x").await.unwrap();
    assert_eq!(account.balance, dec!(30));
    assert_eq!(account.version, 3);

    // read model lags until the consumer drains the transport
    assert_eq!(stack.read_model.balance(&id("x")).await.unwrap(), None);
    assert_eq!(stack.drain_projection().await, 3);
    assert_eq!(stack.read_model.balance(&id("x")).await.unwrap(), Some(dec!(30)));
}

#[tokio::test]
async fn test_deposit_then_read_reflects_new_balance() {
    let stack = TestStack::new();

    stack.service.create_account(CreateAccountCommand::new("a")).await.unwrap();
    // cache the zero balance before the deposit
    assert_eq!(stack.service.get_account("a").await.unwrap().balance, dec!(0));

    stack.service.deposit(DepositCommand::new("a", dec!(100))).await.unwrap();
    assert_eq!(stack.service.get_account("a").await.unwrap().balance, dec!(100));
}

#[tokio::test]
async fn test_cache_miss_matches_cache_hit() {
    let stack = TestStack::new();

    stack.service.create_account(CreateAccountCommand::new("a")).await.unwrap();
    stack.service.deposit(DepositCommand::new("a", dec!(12.5))).await.unwrap();

    let populated = stack.service.get_account("a").await.unwrap();
    assert!(stack.cache.get(&id("a")).await.unwrap().is_some());

    stack.cache.invalidate(&id("a")).await.unwrap();
    let replayed = stack.service.get_account("a").await.unwrap();

    assert_eq!(populated, replayed);
}

#[tokio::test]
async fn test_overdraft_rejected_without_append() {
    let stack = TestStack::new();

    stack.service.create_account(CreateAccountCommand::new("a")).await.unwrap();
    stack.service.deposit(DepositCommand::new("a", dec!(40))).await.unwrap();
    let before = log_len(&stack, "a").await;

    let err = stack
        .service
        .withdraw(WithdrawCommand::new("a", dec!(41)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Domain(DomainError::InsufficientFunds { .. })
    ));

    assert_eq!(log_len(&stack, "a").await, before);
    assert_eq!(stack.transport.published().await.len(), before);
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let stack = TestStack::new();

    let err = stack.service.get_account("never-created").await.unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::AccountNotFound(_))));
}

#[tokio::test]
async fn test_redelivered_events_project_once() {
    let stack = TestStack::new();

    stack.service.create_account(CreateAccountCommand::new("a")).await.unwrap();
    stack.service.deposit(DepositCommand::new("a", dec!(10))).await.unwrap();

    // the broker hands every message out a second time
    for payload in stack.transport.published().await {
        stack.transport.publish_raw("a", payload).await;
    }

    assert_eq!(stack.drain_projection().await, 4);
    assert_eq!(stack.read_model.balance(&id("a")).await.unwrap(), Some(dec!(10)));
    assert_eq!(stack.read_model.applied_count().await, 2);
}

#[tokio::test]
async fn test_accounts_are_independent() {
    let stack = TestStack::new();

    for name in ["a", "b"] {
        stack.service.create_account(CreateAccountCommand::new(name)).await.unwrap();
    }
    stack.service.deposit(DepositCommand::new("a", dec!(5))).await.unwrap();
    stack.service.deposit(DepositCommand::new("b", dec!(7))).await.unwrap();

    assert_eq!(stack.service.get_account("a").await.unwrap().balance, dec!(5));
    assert_eq!(stack.service.get_account("b").await.unwrap().balance, dec!(7));

    let mut ids = stack.log.list_aggregates().await.unwrap();
    ids.sort();
    assert_eq!(ids, vec![id("a"), id("b")]);
}
