mod common;

use async_trait::async_trait;
use builder_ledger::sources::indexer::{COHORT_BUILDERS_QUERY, COHORT_INFORMATION_QUERY, WITHDRAWALS_QUERY};
use builder_ledger::sources::{GraphqlTransport, IndexerClient, TransactionSource};
use builder_ledger::{AggregateOptions, Aggregator, DateWindow, LedgerError, LedgerResult, StreamBook};
use common::*;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replays canned responses per query document and records the variables it was sent.
#[derive(Default)]
struct ScriptedIndexer {
    withdrawals: Mutex<VecDeque<LedgerResult<Value>>>,
    cohorts: Mutex<VecDeque<LedgerResult<Value>>>,
    builders: Mutex<VecDeque<LedgerResult<Value>>>,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedIndexer {
    fn with_withdrawals(self, responses: Vec<LedgerResult<Value>>) -> Self {
        *self.withdrawals.lock().unwrap() = responses.into();
        self
    }

    fn with_cohorts(self, response: Value) -> Self {
        self.cohorts.lock().unwrap().push_back(Ok(response));
        self
    }

    fn with_builders(self, response: Value) -> Self {
        self.builders.lock().unwrap().push_back(Ok(response));
        self
    }

    /// Shared log of the variables sent, readable after the transport moves into a client.
    fn sent_log(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl GraphqlTransport for ScriptedIndexer {
    async fn execute(&self, query: &str, variables: Value) -> LedgerResult<Value> {
        self.sent.lock().unwrap().push(variables);
        let queue = if query == WITHDRAWALS_QUERY {
            &self.withdrawals
        } else if query == COHORT_INFORMATION_QUERY {
            &self.cohorts
        } else if query == COHORT_BUILDERS_QUERY {
            &self.builders
        } else {
            panic!("unexpected query: {query}");
        };
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LedgerError::IndexerTransport("no scripted response left".into())))
    }
}

fn withdrawal_item(id: &str, builder: &str, amount: &str, timestamp: i64) -> Value {
    json!({
        "id": id,
        "builder": builder,
        "amount": amount,
        "reason": format!("work {id}"),
        "timestamp": timestamp.to_string(),
        "cohortContractAddress": "0xC0C0000000000000000000000000000000000001",
    })
}

fn withdrawal_page(items: Vec<Value>, next: Option<&str>) -> Value {
    json!({
        "data": {
            "cohortWithdrawals": {
                "items": items,
                "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next },
            }
        }
    })
}

fn cohorts() -> Value {
    json!({
        "data": {
            "cohortInformations": {
                "items": [
                    { "address": "0xc0c0000000000000000000000000000000000001", "name": "Sand Garden", "url": null, "chainId": 10 }
                ]
            }
        }
    })
}

fn builders() -> Value {
    json!({
        "data": {
            "cohortBuilders": {
                "items": [
                    { "address": ALICE, "ens": "alice.eth", "cohortContractAddress": null },
                    { "address": BOB, "ens": "", "cohortContractAddress": null }
                ],
                "pageInfo": { "hasNextPage": false, "endCursor": null }
            }
        }
    })
}

const JAN_2: i64 = 1_735_819_200;

#[tokio::test]
async fn test_follows_cursor_across_pages() {
    let transport = ScriptedIndexer::default().with_withdrawals(vec![
        Ok(withdrawal_page(
            vec![withdrawal_item("w1", ALICE, "1.0", JAN_2), withdrawal_item("w2", BOB, "2.0", JAN_2)],
            Some("c1"),
        )),
        Ok(withdrawal_page(vec![withdrawal_item("w3", ALICE, "1.5", JAN_2)], Some("c2"))),
        Ok(withdrawal_page(vec![], None)),
    ]);
    let client = IndexerClient::new(transport, 2);
    let window = DateWindow::parse("2025-01-01", "2025-01-10").unwrap();

    let withdrawals = client.fetch_withdrawals(Some(&window)).await.unwrap();
    let ids: Vec<_> = withdrawals.iter().map(|w| w.id.as_str()).collect();
    assert_eq!(ids, vec!["w1", "w2", "w3"]);
}

#[tokio::test]
async fn test_page_variables_carry_window_and_cursor() {
    let transport = ScriptedIndexer::default().with_withdrawals(vec![
        Ok(withdrawal_page(vec![withdrawal_item("w1", ALICE, "1", JAN_2)], Some("c1"))),
        Ok(withdrawal_page(vec![], None)),
    ]);
    let sent_log = transport.sent_log();
    let client = IndexerClient::new(transport, 500);
    let window = DateWindow::parse("2025-01-01", "2025-01-10").unwrap();
    client.fetch_withdrawals(Some(&window)).await.unwrap();

    let sent = sent_log.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["startTime"], "1735689600");
    assert_eq!(sent[0]["endTime"], "1736553599");
    assert_eq!(sent[0]["limit"], 500);
    assert!(sent[0]["after"].is_null());
    assert_eq!(sent[1]["after"], "c1");
}

#[tokio::test]
async fn test_failure_on_any_page_aborts_the_load() {
    let transport = ScriptedIndexer::default().with_withdrawals(vec![
        Ok(withdrawal_page(vec![withdrawal_item("w1", ALICE, "1", JAN_2)], Some("c1"))),
        Err(LedgerError::IndexerStatus {
            status: 502,
            body: "bad gateway".into(),
        }),
    ]);
    let client = IndexerClient::new(transport, 1);

    let err = client.fetch_withdrawals(None).await.unwrap_err();
    assert!(matches!(err, LedgerError::IndexerStatus { status: 502, .. }));
}

#[tokio::test]
async fn test_graphql_errors_are_surfaced() {
    let transport = ScriptedIndexer::default().with_withdrawals(vec![Ok(json!({
        "data": null,
        "errors": [{ "message": "Cannot query field \"amount\"" }, { "message": "second" }]
    }))]);
    let client = IndexerClient::new(transport, 10);

    let err = client.fetch_withdrawals(None).await.unwrap_err();
    match &err {
        LedgerError::IndexerQuery { query, messages } => {
            assert_eq!(*query, "cohortWithdrawals");
            assert_eq!(messages.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("second"));
}

#[tokio::test]
async fn test_schema_mismatch_is_rejected() {
    let transport = ScriptedIndexer::default().with_withdrawals(vec![Ok(json!({
        "data": { "cohortWithdrawals": { "items": [{ "id": 7 }] } }
    }))]);
    let client = IndexerClient::new(transport, 10);

    let err = client.fetch_withdrawals(None).await.unwrap_err();
    assert!(matches!(err, LedgerError::IndexerSchema { query: "cohortWithdrawals", .. }));
}

#[tokio::test]
async fn test_stuck_cursor_is_rejected() {
    let transport = ScriptedIndexer::default().with_withdrawals(vec![
        Ok(withdrawal_page(vec![withdrawal_item("w1", ALICE, "1", JAN_2)], Some("same"))),
        Ok(withdrawal_page(vec![withdrawal_item("w2", ALICE, "1", JAN_2)], Some("same"))),
    ]);
    let client = IndexerClient::new(transport, 1);

    let err = client.fetch_withdrawals(None).await.unwrap_err();
    assert!(err.to_string().contains("did not advance"), "{err}");
}

#[tokio::test]
async fn test_load_produces_labelled_transactions() {
    let transport = ScriptedIndexer::default()
        .with_cohorts(cohorts())
        .with_builders(builders())
        .with_withdrawals(vec![Ok(withdrawal_page(
            vec![
                withdrawal_item("w1", ALICE, "1.0", JAN_2),
                withdrawal_item("w2", BOB, "2.0", JAN_2),
            ],
            None,
        ))]);
    let client = IndexerClient::new(transport, 1000);

    let records = client.transactions(None).await.unwrap();
    assert_eq!(client.name(), "indexer");
    assert_eq!(records.len(), 2);

    let alice = &records[0];
    assert_eq!(alice.raw_identity, "alice.eth");
    assert_eq!(alice.payee_address, ALICE);
    assert_eq!(alice.category, "Sand Garden");
    assert_eq!(alice.note, "work w1");
    assert_eq!(alice.amount_primary, dec!(1.0));
    assert_eq!(alice.date(), Some(day("2025-01-02")));
    assert_eq!(alice.extra.get("withdrawalId").map(String::as_str), Some("w1"));

    // Empty ENS falls back to the raw builder address.
    assert_eq!(records[1].raw_identity, BOB);
}

#[tokio::test]
async fn test_history_names_the_paying_cohort() {
    let transport = ScriptedIndexer::default()
        .with_cohorts(cohorts())
        .with_builders(builders())
        .with_withdrawals(vec![Ok(withdrawal_page(
            vec![withdrawal_item("w1", ALICE, "1.0", JAN_2)],
            None,
        ))]);
    let client = IndexerClient::new(transport, 1000);
    let records = client.transactions(None).await.unwrap();
    assert_eq!(records[0].counterparty_raw, "Sand Garden");

    let book = StreamBook::empty();
    let report = Aggregator::new(&book).aggregate(&records, &AggregateOptions::default());
    let entry = &report.payees[0].history[0];
    assert_eq!(entry.from_display_name, "Sand Garden");
    assert_eq!(entry.to_display_name, "alice.eth");
}
