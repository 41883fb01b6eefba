//! On-chain event indexer adapter.
//!
//! The indexer exposes GraphQL collections with a cursor contract:
//! `{ items: [...], pageInfo: { hasNextPage, endCursor } }`. Pages are fetched strictly in
//! cursor order and accumulated before anything is returned; a failure on any page aborts the
//! whole load, since a partial withdrawal list would understate totals.
//!
//! Responses are parsed into the typed structs below at this boundary, so malformed upstream
//! JSON surfaces as [`LedgerError::IndexerSchema`] instead of leaking into aggregation.

use super::TransactionSource;
use crate::error::{LedgerError, LedgerResult};
use crate::identity;
use crate::models::{parse_amount, DateWindow, SourceKind, Transaction};
use crate::timestamp_parser::TimestampParser;
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const WITHDRAWALS_QUERY: &str = r#"
  query CohortWithdrawals($startTime: BigInt!, $endTime: BigInt!, $limit: Int, $after: String) {
    cohortWithdrawals(
      where: { timestamp_gte: $startTime, timestamp_lte: $endTime }
      orderBy: "timestamp"
      orderDirection: "asc"
      limit: $limit
      after: $after
    ) {
      items { id builder amount reason timestamp cohortContractAddress }
      pageInfo { hasNextPage endCursor }
    }
  }
"#;

pub const COHORT_INFORMATION_QUERY: &str = r#"
  query CohortInformations {
    cohortInformations {
      items { address name url chainId }
    }
  }
"#;

pub const COHORT_BUILDERS_QUERY: &str = r#"
  query CohortBuilders($limit: Int, $after: String) {
    cohortBuilders(orderBy: "timestamp", orderDirection: "asc", limit: $limit, after: $after) {
      items { address ens cohortContractAddress }
      pageInfo { hasNextPage endCursor }
    }
  }
"#;

/// Contracts the indexer has no name for but we do.
const KNOWN_CONTRACTS: &[(&str, &str)] = &[("0x2ea63c9c9c114ae85b1027697a906420a23e8572", "OldSandGarden")];

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphqlErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphqlErrorMessage {
    message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub page_info: Option<PageInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortWithdrawal {
    pub id: String,
    pub builder: String,
    pub amount: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: String,
    pub cohort_contract_address: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortInfo {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub chain_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortBuilder {
    pub address: String,
    #[serde(default)]
    pub ens: Option<String>,
    #[serde(default)]
    pub cohort_contract_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalsData {
    cohort_withdrawals: Page<CohortWithdrawal>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CohortInfoData {
    cohort_informations: Page<CohortInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildersData {
    cohort_builders: Page<CohortBuilder>,
}

/// Sends one GraphQL document and returns the raw response body.
#[async_trait]
pub trait GraphqlTransport: Send + Sync {
    async fn execute(&self, query: &str, variables: Value) -> LedgerResult<Value>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> LedgerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::IndexerTransport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GraphqlTransport for HttpTransport {
    async fn execute(&self, query: &str, variables: Value) -> LedgerResult<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| LedgerError::IndexerTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::IndexerStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LedgerError::IndexerTransport(format!("invalid JSON body: {e}")))
    }
}

/// Everything one indexer load produced: withdrawals plus the two label lookup tables.
#[derive(Debug, Clone, Default)]
pub struct IndexerSnapshot {
    pub withdrawals: Vec<CohortWithdrawal>,
    /// Lowercase contract address to cohort name.
    pub cohort_names: HashMap<String, String>,
    /// Lowercase wallet address to ENS name.
    pub ens_names: HashMap<String, String>,
}

impl IndexerSnapshot {
    pub fn cohort_label(&self, contract_address: &str) -> String {
        let lower = contract_address.to_ascii_lowercase();
        if let Some(name) = self.cohort_names.get(&lower) {
            return name.clone();
        }
        if let Some((_, name)) = KNOWN_CONTRACTS.iter().find(|(addr, _)| *addr == lower) {
            return (*name).to_string();
        }
        let prefix: String = contract_address.chars().take(8).collect();
        format!("Contract:{prefix}...")
    }

    pub fn to_transactions(&self) -> Vec<Transaction> {
        self.withdrawals
            .iter()
            .map(|withdrawal| self.to_transaction(withdrawal))
            .collect()
    }

    fn to_transaction(&self, withdrawal: &CohortWithdrawal) -> Transaction {
        let address = identity::extract_address(&withdrawal.builder).unwrap_or_default();
        let raw_identity = self
            .ens_names
            .get(&address)
            .cloned()
            .unwrap_or_else(|| withdrawal.builder.clone());

        let timestamp = match TimestampParser::parse_epoch_seconds(&withdrawal.timestamp) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(withdrawal_id = %withdrawal.id, error = %e, "Withdrawal has unreadable timestamp");
                None
            }
        };

        let cohort = self.cohort_label(&withdrawal.cohort_contract_address);
        let mut transaction = Transaction::new(SourceKind::Indexer, raw_identity, parse_amount(&withdrawal.amount));
        transaction.payee_address = address;
        transaction.counterparty_raw = cohort.clone();
        transaction.timestamp = timestamp;
        transaction.category = cohort;
        transaction.note = withdrawal.reason.clone().unwrap_or_default();
        transaction.source_group = withdrawal.cohort_contract_address.to_ascii_lowercase();
        transaction
            .extra
            .insert("withdrawalId".to_string(), withdrawal.id.clone());
        transaction
    }
}

pub struct IndexerClient<T: GraphqlTransport> {
    transport: T,
    page_size: u32,
}

impl<T: GraphqlTransport> IndexerClient<T> {
    pub fn new(transport: T, page_size: u32) -> Self {
        Self {
            transport,
            page_size: page_size.max(1),
        }
    }


    async fn query<D: DeserializeOwned>(&self, name: &'static str, query: &str, variables: Value) -> LedgerResult<D> {
        let body = self.transport.execute(query, variables).await?;
        let response: GraphqlResponse<D> = serde_json::from_value(body).map_err(|e| LedgerError::IndexerSchema {
            query: name,
            reason: e.to_string(),
        })?;

        if !response.errors.is_empty() {
            return Err(LedgerError::IndexerQuery {
                query: name,
                messages: response.errors.into_iter().map(|e| e.message).collect(),
            });
        }

        response.data.ok_or_else(|| LedgerError::IndexerSchema {
            query: name,
            reason: "response has no data".to_string(),
        })
    }

    /// Follow `endCursor` until `hasNextPage` is false.
    async fn fetch_all<D, I>(
        &self,
        name: &'static str,
        query: &str,
        variables: Value,
        extract: fn(D) -> Page<I>,
    ) -> LedgerResult<Vec<I>>
    where
        D: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut page_vars = variables.clone();
            page_vars["limit"] = json!(self.page_size);
            page_vars["after"] = json!(cursor);

            let page = extract(self.query::<D>(name, query, page_vars).await?);
            pages += 1;
            items.extend(page.items);

            let info = page.page_info.unwrap_or_default();
            if !info.has_next_page {
                break;
            }

            debug!(query = name, pages, fetched = items.len(), "Fetching next indexer page");
            match info.end_cursor {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                Some(_) => {
                    return Err(LedgerError::IndexerSchema {
                        query: name,
                        reason: "endCursor did not advance".to_string(),
                    })
                }
                None => {
                    return Err(LedgerError::IndexerSchema {
                        query: name,
                        reason: "hasNextPage is true but endCursor is missing".to_string(),
                    })
                }
            }
        }

        debug!(query = name, pages, fetched = items.len(), "Indexer pagination complete");
        Ok(items)
    }

    pub async fn fetch_withdrawals(&self, window: Option<&DateWindow>) -> LedgerResult<Vec<CohortWithdrawal>> {
        let (start, end) = match window {
            Some(w) => (w.start_epoch(), w.end_epoch()),
            None => (0, Utc::now().timestamp()),
        };
        let variables = json!({
            "startTime": start.to_string(),
            "endTime": end.to_string(),
        });
        self.fetch_all("cohortWithdrawals", WITHDRAWALS_QUERY, variables, |d: WithdrawalsData| {
            d.cohort_withdrawals
        })
        .await
    }

    /// Contract address (lowercase) to cohort name.
    pub async fn fetch_cohort_names(&self) -> LedgerResult<HashMap<String, String>> {
        let data: CohortInfoData = self
            .query("cohortInformations", COHORT_INFORMATION_QUERY, json!({}))
            .await?;
        Ok(data
            .cohort_informations
            .items
            .into_iter()
            .map(|cohort| (cohort.address.to_ascii_lowercase(), cohort.name))
            .collect())
    }

    /// Builder address (lowercase) to ENS name, for builders that have one.
    pub async fn fetch_ens_names(&self) -> LedgerResult<HashMap<String, String>> {
        let builders = self
            .fetch_all("cohortBuilders", COHORT_BUILDERS_QUERY, json!({}), |d: BuildersData| {
                d.cohort_builders
            })
            .await?;
        Ok(builders
            .into_iter()
            .filter_map(|builder| {
                let ens = builder.ens.filter(|e| !e.trim().is_empty())?;
                Some((builder.address.to_ascii_lowercase(), ens))
            })
            .collect())
    }

    pub async fn load(&self, window: Option<&DateWindow>) -> LedgerResult<IndexerSnapshot> {
        let cohort_names = self.fetch_cohort_names().await?;
        info!(cohorts = cohort_names.len(), "Fetched cohort information from indexer");

        let ens_names = self.fetch_ens_names().await?;
        info!(builders = ens_names.len(), "Fetched builder ENS names from indexer");

        let withdrawals = self.fetch_withdrawals(window).await?;
        info!(withdrawals = withdrawals.len(), "Fetched withdrawal events from indexer");

        Ok(IndexerSnapshot {
            withdrawals,
            cohort_names,
            ens_names,
        })
    }
}

#[async_trait]
impl<T: GraphqlTransport> TransactionSource for IndexerClient<T> {
    fn name(&self) -> &str {
        "indexer"
    }

    async fn transactions(&self, window: Option<&DateWindow>) -> LedgerResult<Vec<Transaction>> {
        Ok(self.load(window).await?.to_transactions())
    }
}
