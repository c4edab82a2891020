//! The external coin-ledger collaborator.
//!
//! Balance storage and the transaction log live outside this engine; all we
//! hold is the calling contract. Every mutation carries a caller-chosen
//! reference (wager id for payouts), and implementations treat a repeated
//! reference as already-applied, so a retried settlement never double-pays.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    /// Transient failure; callers retry with backoff.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Coin ledger operations. Credits and debits are idempotent by reference.
#[async_trait]
pub trait CoinLedger: Send + Sync {
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
        reason: &str,
    ) -> Result<(), LedgerError>;

    async fn debit(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
        reason: &str,
    ) -> Result<(), LedgerError>;

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError>;
}

// ==================== HTTP client ====================

#[derive(Serialize)]
struct MutationRequest<'a> {
    user_id: &'a str,
    amount: i64,
    reference: &'a str,
    reason: &'a str,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: i64,
}

#[derive(Deserialize)]
struct LedgerErrorBody {
    error: String,
    #[serde(default)]
    balance: i64,
    #[serde(default)]
    required: i64,
}

/// Client for the platform's coin-ledger service.
pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedger {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn post_mutation(
        &self,
        path: &str,
        req: &MutationRequest<'_>,
    ) -> Result<(), LedgerError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }

        // 409 means the reference was already applied: idempotent success.
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }

        if response.status() == reqwest::StatusCode::PAYMENT_REQUIRED {
            let body: LedgerErrorBody = response
                .json()
                .await
                .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
            return Err(LedgerError::InsufficientFunds {
                balance: body.balance,
                required: body.required,
            });
        }

        let status = response.status();
        let detail = response
            .json::<LedgerErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_default();
        Err(LedgerError::Unavailable(format!("{}: {}", status, detail)))
    }
}

#[async_trait]
impl CoinLedger for HttpLedger {
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.post_mutation(
            "credit",
            &MutationRequest {
                user_id,
                amount,
                reference,
                reason,
            },
        )
        .await
    }

    async fn debit(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.post_mutation(
            "debit",
            &MutationRequest {
                user_id,
                amount,
                reference,
                reason,
            },
        )
        .await
    }

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let url = format!(
            "{}/balance/{}",
            self.base_url.trim_end_matches('/'),
            user_id
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LedgerError::Unavailable(response.status().to_string()));
        }
        let body: BalanceResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;
        Ok(body.balance)
    }
}

// ==================== In-memory ledger ====================

struct LedgerBook {
    balances: HashMap<String, i64>,
    applied: HashSet<String>,
}

/// Development/test ledger holding balances in memory. New users start at a
/// configured balance. Mutations dedupe on reference like the real service.
pub struct InMemoryLedger {
    book: Mutex<LedgerBook>,
    starting_balance: i64,
}

impl InMemoryLedger {
    pub fn new(starting_balance: i64) -> Self {
        Self {
            book: Mutex::new(LedgerBook {
                balances: HashMap::new(),
                applied: HashSet::new(),
            }),
            starting_balance,
        }
    }
}

#[async_trait]
impl CoinLedger for InMemoryLedger {
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
        _reason: &str,
    ) -> Result<(), LedgerError> {
        let mut book = self.book.lock().await;
        if !book.applied.insert(reference.to_string()) {
            return Ok(());
        }
        let starting = self.starting_balance;
        let balance = book
            .balances
            .entry(user_id.to_string())
            .or_insert(starting);
        *balance += amount;
        Ok(())
    }

    async fn debit(
        &self,
        user_id: &str,
        amount: i64,
        reference: &str,
        _reason: &str,
    ) -> Result<(), LedgerError> {
        let mut book = self.book.lock().await;
        if book.applied.contains(reference) {
            return Ok(());
        }
        let starting = self.starting_balance;
        let balance = book
            .balances
            .entry(user_id.to_string())
            .or_insert(starting);
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance: *balance,
                required: amount,
            });
        }
        *balance -= amount;
        book.applied.insert(reference.to_string());
        Ok(())
    }

    async fn balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let book = self.book.lock().await;
        Ok(book
            .balances
            .get(user_id)
            .copied()
            .unwrap_or(self.starting_balance))
    }
}
