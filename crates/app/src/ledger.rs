use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use thiserror::Error;
use tracing::info;

use soderia_core::ledger::{
    open_purchase, recalculate, reverse_purchase, LedgerError, PriceTable, PurchaseDraft,
};
use soderia_core::types::{Client, ClientBalance, Purchase};
use soderia_storage::{ClientError, Database, NewPurchase, ProductError, PurchaseError};

use crate::error::ApiError;

/// Result of a ledger write: the stored purchase and the client balance it produced.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReceipt {
    pub purchase: Purchase,
    pub client: Client,
}

/// Applies purchases to client ledgers. Each operation takes the write lock,
/// reads the client, the purchase and the price table and writes both records
/// in one transaction, so concurrent writers queue instead of failing.
#[derive(Clone)]
pub struct LedgerExecutor {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl LedgerExecutor {
    pub fn new(database: Database, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { database, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Records a new purchase for `client_id`.
    pub async fn record_purchase(
        &self,
        client_id: i64,
        draft: &PurchaseDraft,
    ) -> Result<LedgerReceipt, LedgerExecutorError> {
        let mut tx = self.database.begin().await?;
        self.database.clients().lock_in(&mut tx, client_id).await?;
        let client = self.load_client(&mut tx, client_id).await?;
        let prices = self.load_prices(&mut tx).await?;

        let outcome = open_purchase(&client.balance(), draft, &prices)?;
        let purchase = self
            .database
            .purchases()
            .insert(
                &mut tx,
                &NewPurchase {
                    client_id,
                    entry: outcome.entry,
                    purchased_at: self.now(),
                },
            )
            .await?;
        let client = self.store_balance(&mut tx, client, outcome.balance).await?;
        tx.commit().await?;

        counter!("ledger_operations_total", "op" => "create").increment(1);
        info!(
            stage = "ledger",
            client_id,
            purchase_id = purchase.id,
            total = purchase.total,
            paid = purchase.paid,
            debt = client.debt,
            "purchase recorded"
        );
        Ok(LedgerReceipt { purchase, client })
    }

    /// Replaces the quantities, returns and payment of an existing purchase and
    /// moves the client balance by the exact difference.
    pub async fn modify_purchase(
        &self,
        purchase_id: i64,
        draft: &PurchaseDraft,
    ) -> Result<LedgerReceipt, LedgerExecutorError> {
        let mut tx = self.database.begin().await?;
        self.database.purchases().lock_owner_in(&mut tx, purchase_id).await?;
        let original = self.load_purchase(&mut tx, purchase_id).await?;
        let client = self.load_client(&mut tx, original.client_id).await?;
        let prices = self.load_prices(&mut tx).await?;

        let outcome = recalculate(&original.entry(), draft, &client.balance(), &prices)?;
        let purchase = self
            .database
            .purchases()
            .update_entry(&mut tx, purchase_id, &outcome.entry)
            .await?
            .ok_or(LedgerExecutorError::PurchaseNotFound(purchase_id))?;
        let client = self.store_balance(&mut tx, client, outcome.balance).await?;
        tx.commit().await?;

        counter!("ledger_operations_total", "op" => "modify").increment(1);
        info!(
            stage = "ledger",
            client_id = client.id,
            purchase_id,
            total_before = original.total,
            total = purchase.total,
            debt = client.debt,
            "purchase modified"
        );
        Ok(LedgerReceipt { purchase, client })
    }

    /// Deletes a purchase and reverses its effect using the stored total.
    pub async fn remove_purchase(&self, purchase_id: i64) -> Result<LedgerReceipt, LedgerExecutorError> {
        let mut tx = self.database.begin().await?;
        self.database.purchases().lock_owner_in(&mut tx, purchase_id).await?;
        let purchase = self.load_purchase(&mut tx, purchase_id).await?;
        let client = self.load_client(&mut tx, purchase.client_id).await?;

        let balance = reverse_purchase(&purchase.entry(), &client.balance())?;
        if !self.database.purchases().delete(&mut tx, purchase_id).await? {
            return Err(LedgerExecutorError::PurchaseNotFound(purchase_id));
        }
        let client = self.store_balance(&mut tx, client, balance).await?;
        tx.commit().await?;

        counter!("ledger_operations_total", "op" => "delete").increment(1);
        info!(
            stage = "ledger",
            client_id = client.id,
            purchase_id,
            debt = client.debt,
            "purchase deleted"
        );
        Ok(LedgerReceipt { purchase, client })
    }

    async fn load_client(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        client_id: i64,
    ) -> Result<Client, LedgerExecutorError> {
        self.database
            .clients()
            .fetch_in(tx, client_id)
            .await?
            .ok_or(LedgerExecutorError::ClientNotFound(client_id))
    }

    async fn load_purchase(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        purchase_id: i64,
    ) -> Result<Purchase, LedgerExecutorError> {
        self.database
            .purchases()
            .fetch_in(tx, purchase_id)
            .await?
            .ok_or(LedgerExecutorError::PurchaseNotFound(purchase_id))
    }

    async fn load_prices(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
    ) -> Result<PriceTable, LedgerExecutorError> {
        let prices = self.database.products().price_table(tx).await?;
        if prices.is_empty() {
            return Err(LedgerExecutorError::EmptyCatalog);
        }
        Ok(prices)
    }

    async fn store_balance(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        client: Client,
        balance: ClientBalance,
    ) -> Result<Client, LedgerExecutorError> {
        let updated = self
            .database
            .clients()
            .update_balance(tx, client.id, &balance)
            .await?;
        if !updated {
            return Err(LedgerExecutorError::ClientNotFound(client.id));
        }
        Ok(Client {
            debt: balance.debt,
            siphons_held: balance.siphons_held,
            jugs_held: balance.jugs_held,
            ..client
        })
    }
}

#[derive(Debug, Error)]
pub enum LedgerExecutorError {
    #[error("client {0} not found")]
    ClientNotFound(i64),
    #[error("purchase {0} not found")]
    PurchaseNotFound(i64),
    #[error("product catalog is empty")]
    EmptyCatalog,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("client storage error: {0}")]
    Client(#[from] ClientError),
    #[error("purchase storage error: {0}")]
    Purchase(#[from] PurchaseError),
    #[error("product storage error: {0}")]
    Product(#[from] ProductError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LedgerExecutorError> for ApiError {
    fn from(err: LedgerExecutorError) -> Self {
        match err {
            LedgerExecutorError::ClientNotFound(_)
            | LedgerExecutorError::PurchaseNotFound(_)
            | LedgerExecutorError::EmptyCatalog => ApiError::not_found(err.to_string()),
            LedgerExecutorError::Ledger(inner) => inner.into(),
            LedgerExecutorError::Client(inner) => inner.into(),
            LedgerExecutorError::Purchase(inner) => inner.into(),
            LedgerExecutorError::Product(inner) => inner.into(),
            LedgerExecutorError::Database(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soderia_core::types::{LineItems, Returns};
    use soderia_storage::NewClient;

    async fn setup() -> (Database, LedgerExecutor) {
        let db = Database::connect("sqlite::memory:").await.expect("connect");
        db.run_migrations().await.expect("migrations");
        let executor = LedgerExecutor::new(db.clone(), Arc::new(Utc::now));
        (db, executor)
    }

    async fn client_with(db: &Database, opening: ClientBalance) -> Client {
        db.clients()
            .insert(&NewClient {
                name: "Almacen Don Pepe",
                phone: None,
                opening,
                created_at: Utc::now(),
            })
            .await
            .expect("insert client")
    }

    fn draft(siphons: i64, jugs_6l: i64, jugs_12l: i64, paid: i64, returns: (i64, i64)) -> PurchaseDraft {
        PurchaseDraft::new(
            LineItems {
                siphons,
                jugs_6l,
                jugs_12l,
            },
            paid,
            Returns {
                siphons: returns.0,
                jugs: returns.1,
            },
        )
        .expect("valid draft")
    }

    async fn reaggregated_debt(db: &Database, client_id: i64, opening_debt: i64) -> i64 {
        let purchases = db
            .purchases()
            .list_for_client(client_id)
            .await
            .expect("list purchases");
        opening_debt
            + purchases
                .iter()
                .map(|purchase| purchase.total - purchase.paid)
                .sum::<i64>()
    }

    #[tokio::test]
    async fn record_prices_items_and_moves_balance() {
        let (db, executor) = setup().await;
        let client = client_with(&db, ClientBalance::default()).await;

        let receipt = executor
            .record_purchase(client.id, &draft(2, 1, 0, 100, (0, 0)))
            .await
            .expect("record");

        assert_eq!(receipt.purchase.total, 200);
        assert_eq!(receipt.purchase.debt_after, 100);
        assert_eq!(receipt.client.debt, 100);
        assert_eq!(receipt.client.siphons_held, 2);
        assert_eq!(receipt.client.jugs_held, 0);

        let stored = db.clients().fetch(client.id).await.expect("fetch").expect("client");
        assert_eq!(stored, receipt.client);
    }

    #[tokio::test]
    async fn modify_with_identical_values_is_a_no_op() {
        let (db, executor) = setup().await;
        let client = client_with(&db, ClientBalance::default()).await;
        let first = executor
            .record_purchase(client.id, &draft(1, 2, 1, 150, (1, 0)))
            .await
            .expect("record");

        let again = executor
            .modify_purchase(first.purchase.id, &draft(1, 2, 1, 150, (1, 0)))
            .await
            .expect("modify");

        assert_eq!(again.client.balance(), first.client.balance());
        assert_eq!(again.purchase.total, first.purchase.total);
    }

    #[tokio::test]
    async fn modify_can_leave_balance_unchanged_while_changing_the_purchase() {
        let (db, executor) = setup().await;
        let client = client_with(&db, ClientBalance::default()).await;
        let created = executor
            .record_purchase(client.id, &draft(2, 0, 0, 50, (0, 0)))
            .await
            .expect("record");
        assert_eq!(created.client.debt, 10);
        assert_eq!(created.client.siphons_held, 2);

        let modified = executor
            .modify_purchase(created.purchase.id, &draft(3, 0, 0, 80, (1, 0)))
            .await
            .expect("modify");

        assert_eq!(modified.client.debt, 10);
        assert_eq!(modified.client.siphons_held, 2);
        assert_eq!(modified.purchase.total, 90);
        assert_eq!(modified.purchase.paid, 80);
        assert_eq!(modified.purchase.returned_siphons, 1);
        assert_eq!(modified.purchase.purchased_at, created.purchase.purchased_at);
    }

    #[tokio::test]
    async fn incremental_debt_matches_full_reaggregation() {
        let (db, executor) = setup().await;
        let opening = ClientBalance {
            debt: 75,
            siphons_held: 1,
            jugs_held: 2,
        };
        let client = client_with(&db, opening).await;

        let a = executor
            .record_purchase(client.id, &draft(2, 1, 0, 100, (0, 0)))
            .await
            .expect("a");
        let b = executor
            .record_purchase(client.id, &draft(0, 0, 2, 400, (0, 1)))
            .await
            .expect("b");
        executor
            .record_purchase(client.id, &draft(1, 0, 0, 0, (1, 0)))
            .await
            .expect("c");
        executor
            .modify_purchase(a.purchase.id, &draft(4, 0, 1, 20, (2, 0)))
            .await
            .expect("modify a");
        let last = executor.remove_purchase(b.purchase.id).await.expect("remove b");

        assert_eq!(last.client.debt, reaggregated_debt(&db, client.id, opening.debt).await);

        let purchases = db.purchases().list_for_client(client.id).await.expect("list");
        let siphons: i64 = purchases
            .iter()
            .map(|p| p.siphons - p.returned_siphons)
            .sum();
        let jugs: i64 = purchases.iter().map(|p| p.jugs_12l - p.returned_jugs).sum();
        assert_eq!(last.client.siphons_held, opening.siphons_held + siphons);
        assert_eq!(last.client.jugs_held, opening.jugs_held + jugs);
    }

    #[tokio::test]
    async fn remove_reverses_a_purchase_exactly() {
        let (db, executor) = setup().await;
        let opening = ClientBalance {
            debt: -40,
            siphons_held: 3,
            jugs_held: 1,
        };
        let client = client_with(&db, opening).await;
        let created = executor
            .record_purchase(client.id, &draft(2, 1, 1, 120, (1, 1)))
            .await
            .expect("record");

        let removed = executor
            .remove_purchase(created.purchase.id)
            .await
            .expect("remove");

        assert_eq!(removed.client.balance(), opening);
        assert_eq!(removed.purchase.id, created.purchase.id);
        assert!(matches!(
            executor.remove_purchase(created.purchase.id).await,
            Err(LedgerExecutorError::PurchaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn missing_product_prices_as_zero_and_empty_catalog_is_rejected() {
        let (db, executor) = setup().await;
        let client = client_with(&db, ClientBalance::default()).await;

        sqlx::query("DELETE FROM products WHERE name = 'jug-6l'")
            .execute(db.pool())
            .await
            .expect("delete product");
        let receipt = executor
            .record_purchase(client.id, &draft(1, 3, 0, 0, (0, 0)))
            .await
            .expect("record");
        assert_eq!(receipt.purchase.total, 30);

        sqlx::query("DELETE FROM products")
            .execute(db.pool())
            .await
            .expect("clear catalog");
        assert!(matches!(
            executor
                .record_purchase(client.id, &draft(1, 0, 0, 0, (0, 0)))
                .await,
            Err(LedgerExecutorError::EmptyCatalog)
        ));
    }

    #[tokio::test]
    async fn unknown_records_are_not_found() {
        let (_db, executor) = setup().await;

        assert!(matches!(
            executor.record_purchase(404, &draft(1, 0, 0, 0, (0, 0))).await,
            Err(LedgerExecutorError::ClientNotFound(404))
        ));
        assert!(matches!(
            executor.modify_purchase(404, &draft(1, 0, 0, 0, (0, 0))).await,
            Err(LedgerExecutorError::PurchaseNotFound(404))
        ));
    }

    #[tokio::test]
    async fn modify_after_price_change_keeps_debt_consistent() {
        let (db, executor) = setup().await;
        let client = client_with(&db, ClientBalance::default()).await;
        let created = executor
            .record_purchase(client.id, &draft(2, 0, 0, 0, (0, 0)))
            .await
            .expect("record");
        assert_eq!(created.purchase.total, 60);

        let siphon = db
            .products()
            .list()
            .await
            .expect("products")
            .into_iter()
            .find(|product| product.name == "siphon")
            .expect("siphon");
        db.products()
            .update_price(siphon.id, 50)
            .await
            .expect("update price")
            .expect("product");

        let modified = executor
            .modify_purchase(created.purchase.id, &draft(2, 0, 0, 0, (0, 0)))
            .await
            .expect("modify");
        assert_eq!(modified.purchase.total, 100);
        assert_eq!(modified.client.debt, 100);
        assert_eq!(modified.client.debt, reaggregated_debt(&db, client.id, 0).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_on_one_client_all_commit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let db = Database::connect(&url).await.expect("connect");
        db.run_migrations().await.expect("migrations");
        let executor = LedgerExecutor::new(db.clone(), Arc::new(Utc::now));
        let client = client_with(&db, ClientBalance::default()).await;
        let seed = executor
            .record_purchase(client.id, &draft(1, 0, 0, 0, (0, 0)))
            .await
            .expect("seed");

        let mut tasks = Vec::new();
        for idx in 0..20 {
            let executor = executor.clone();
            let seed_id = seed.purchase.id;
            let client_id = client.id;
            tasks.push(tokio::spawn(async move {
                if idx % 5 == 0 {
                    executor
                        .modify_purchase(seed_id, &draft(1, 0, 0, idx, (0, 0)))
                        .await
                        .map(|_| ())
                } else {
                    executor
                        .record_purchase(client_id, &draft(1, 0, 0, 0, (0, 0)))
                        .await
                        .map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("ledger write");
        }

        let purchases = db.purchases().list_for_client(client.id).await.expect("list");
        assert_eq!(purchases.len(), 17);
        let stored = db.clients().fetch(client.id).await.expect("fetch").expect("client");
        assert_eq!(stored.debt, reaggregated_debt(&db, client.id, 0).await);
        assert_eq!(stored.siphons_held, 17);
    }

    #[tokio::test]
    async fn overflow_leaves_ledger_untouched() {
        let (db, executor) = setup().await;
        let client = client_with(&db, ClientBalance::default()).await;
        let created = executor
            .record_purchase(client.id, &draft(1, 0, 0, 30, (0, 0)))
            .await
            .expect("record");

        let result = executor
            .modify_purchase(created.purchase.id, &draft(i64::MAX, 0, 0, 0, (0, 0)))
            .await;
        assert!(matches!(
            result,
            Err(LedgerExecutorError::Ledger(LedgerError::Overflow))
        ));

        let stored = db.clients().fetch(client.id).await.expect("fetch").expect("client");
        assert_eq!(stored.balance(), created.client.balance());
        let purchases = db.purchases().list_for_client(client.id).await.expect("list");
        assert_eq!(purchases, vec![created.purchase]);
    }
}
