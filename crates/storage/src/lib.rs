use std::{borrow::Cow, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

use soderia_core::ledger::PriceTable;
use soderia_core::report::BilledPurchase;
use soderia_core::types::{Client, ClientBalance, Product, Purchase, PurchaseEntry, Role, User};

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a SQLite transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for client ledger accounts.
    pub fn clients(&self) -> ClientRepository {
        ClientRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for purchase records.
    pub fn purchases(&self) -> PurchaseRepository {
        PurchaseRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the product catalog.
    pub fn products(&self) -> ProductRepository {
        ProductRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for user accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for stored refresh credentials.
    pub fn refresh_tokens(&self) -> RefreshTokenRepository {
        RefreshTokenRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn constraint_code(err: &sqlx::Error) -> Option<Cow<'_, str>> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

const CLIENT_COLUMNS: &str = "id, name, phone, debt, siphons_held, jugs_held, created_at";

/// Repository for client ledger accounts.
#[derive(Clone)]
pub struct ClientRepository {
    pool: SqlitePool,
}

impl ClientRepository {
    /// Inserts a client with its opening balance.
    pub async fn insert(&self, client: &NewClient<'_>) -> Result<Client, ClientError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "INSERT INTO clients (name, phone, debt, siphons_held, jugs_held, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(client.name)
        .bind(client.phone)
        .bind(client.opening.debt)
        .bind(client.opening.siphons_held)
        .bind(client.opening.jugs_held)
        .bind(to_rfc3339(client.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(ClientError::from_insert)?;

        Ok(row.into_domain())
    }

    pub async fn fetch(&self, id: i64) -> Result<Option<Client>, ClientError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ClientRow::into_domain))
    }

    /// Takes the database write lock inside `tx` by touching the client row.
    ///
    /// Must be the first statement of a read-modify-write transaction: a deferred
    /// transaction that reads first cannot wait for the lock and fails with
    /// `SQLITE_BUSY` when another writer commits in between.
    pub async fn lock_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), ClientError> {
        sqlx::query("UPDATE clients SET debt = debt WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Loads a client inside an open transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<Client>, ClientError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(ClientRow::into_domain))
    }

    /// Case-insensitive substring search on the client name.
    pub async fn search(&self, fragment: &str) -> Result<Vec<Client>, ClientError> {
        let rows = sqlx::query_as::<_, ClientRow>(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients \
             WHERE instr(lower(name), lower(?)) > 0 \
             ORDER BY name"
        ))
        .bind(fragment)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ClientRow::into_domain).collect())
    }

    /// Applies a manual correction; `None` fields keep their stored value.
    pub async fn update_details(
        &self,
        id: i64,
        update: &ClientUpdate,
    ) -> Result<Option<Client>, ClientError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "UPDATE clients SET \
                 name = COALESCE(?, name), \
                 phone = COALESCE(?, phone), \
                 debt = COALESCE(?, debt), \
                 siphons_held = COALESCE(?, siphons_held), \
                 jugs_held = COALESCE(?, jugs_held) \
             WHERE id = ? \
             RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(update.name.as_deref())
        .bind(update.phone.as_deref())
        .bind(update.debt)
        .bind(update.siphons_held)
        .bind(update.jugs_held)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ClientError::from_insert)?;

        Ok(row.map(ClientRow::into_domain))
    }

    /// Writes the ledger aggregate. Returns `false` when the client no longer exists.
    pub async fn update_balance(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        balance: &ClientBalance,
    ) -> Result<bool, ClientError> {
        let result = sqlx::query(
            "UPDATE clients SET debt = ?, siphons_held = ?, jugs_held = ? WHERE id = ?",
        )
        .bind(balance.debt)
        .bind(balance.siphons_held)
        .bind(balance.jugs_held)
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Deletes a client together with its purchases, returning the removed record.
    pub async fn delete(&self, id: i64) -> Result<Option<Client>, ClientError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!(
            "DELETE FROM clients WHERE id = ? RETURNING {CLIENT_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ClientRow::into_domain))
    }
}

/// Data required to create a client.
pub struct NewClient<'a> {
    pub name: &'a str,
    pub phone: Option<&'a str>,
    pub opening: ClientBalance,
    pub created_at: DateTime<Utc>,
}

/// Partial client update.
#[derive(Debug, Clone, Default)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub debt: Option<i64>,
    pub siphons_held: Option<i64>,
    pub jugs_held: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: i64,
    name: String,
    phone: Option<String>,
    debt: i64,
    siphons_held: i64,
    jugs_held: i64,
    created_at: DateTime<Utc>,
}

impl ClientRow {
    fn into_domain(self) -> Client {
        Client {
            id: self.id,
            name: self.name,
            phone: self.phone,
            debt: self.debt,
            siphons_held: self.siphons_held,
            jugs_held: self.jugs_held,
            created_at: self.created_at,
        }
    }
}

/// Errors that can occur while reading or mutating clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a client with the same name already exists")]
    DuplicateName,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ClientError {
    fn from_insert(err: sqlx::Error) -> Self {
        if constraint_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) {
            Self::DuplicateName
        } else {
            Self::Database(err)
        }
    }
}

// ---------------------------------------------------------------------------
// Purchases
// ---------------------------------------------------------------------------

const PURCHASE_COLUMNS: &str = "id, client_id, siphons, jugs_6l, jugs_12l, returned_siphons, \
                                returned_jugs, paid, total, debt_after, purchased_at";

/// Repository for purchase records.
#[derive(Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
}

impl PurchaseRepository {
    /// Inserts a priced purchase inside the ledger transaction.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        purchase: &NewPurchase,
    ) -> Result<Purchase, PurchaseError> {
        let entry = &purchase.entry;
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "INSERT INTO purchases \
             (client_id, siphons, jugs_6l, jugs_12l, returned_siphons, returned_jugs, paid, total, debt_after, purchased_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(purchase.client_id)
        .bind(entry.items.siphons)
        .bind(entry.items.jugs_6l)
        .bind(entry.items.jugs_12l)
        .bind(entry.returns.siphons)
        .bind(entry.returns.jugs)
        .bind(entry.paid)
        .bind(entry.total)
        .bind(entry.debt_after)
        .bind(to_rfc3339(purchase.purchased_at))
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| {
            if constraint_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
                PurchaseError::MissingClient
            } else {
                PurchaseError::Database(err)
            }
        })?;

        Ok(row.into_domain())
    }

    /// Takes the database write lock inside `tx` through the purchase's client row.
    /// See [`ClientRepository::lock_in`].
    pub async fn lock_owner_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), PurchaseError> {
        sqlx::query(
            "UPDATE clients SET debt = debt \
             WHERE id = (SELECT client_id FROM purchases WHERE id = ?)",
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Loads a purchase inside an open transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<Purchase>, PurchaseError> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(PurchaseRow::into_domain))
    }

    /// Overwrites the ledger fields of a purchase, keeping its client and timestamp.
    pub async fn update_entry(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        entry: &PurchaseEntry,
    ) -> Result<Option<Purchase>, PurchaseError> {
        let row = sqlx::query_as::<_, PurchaseRow>(&format!(
            "UPDATE purchases SET \
                 siphons = ?, jugs_6l = ?, jugs_12l = ?, \
                 returned_siphons = ?, returned_jugs = ?, \
                 paid = ?, total = ?, debt_after = ? \
             WHERE id = ? \
             RETURNING {PURCHASE_COLUMNS}"
        ))
        .bind(entry.items.siphons)
        .bind(entry.items.jugs_6l)
        .bind(entry.items.jugs_12l)
        .bind(entry.returns.siphons)
        .bind(entry.returns.jugs)
        .bind(entry.paid)
        .bind(entry.total)
        .bind(entry.debt_after)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(PurchaseRow::into_domain))
    }

    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<bool, PurchaseError> {
        let result = sqlx::query("DELETE FROM purchases WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Lists a client's purchases, newest first.
    pub async fn list_for_client(&self, client_id: i64) -> Result<Vec<Purchase>, PurchaseError> {
        let rows = sqlx::query_as::<_, PurchaseRow>(&format!(
            "SELECT {PURCHASE_COLUMNS} FROM purchases \
             WHERE client_id = ? \
             ORDER BY purchased_at DESC, id DESC"
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PurchaseRow::into_domain).collect())
    }

    /// Lists purchases made within `[start, end]` joined with their client, oldest first.
    pub async fn list_billed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BilledPurchase>, PurchaseError> {
        let rows = sqlx::query_as::<_, BilledPurchaseRow>(
            r#"
SELECT p.client_id,
       c.name AS client_name,
       c.debt AS client_debt,
       p.siphons,
       p.jugs_6l,
       p.jugs_12l,
       p.paid,
       p.total
  FROM purchases AS p
  JOIN clients AS c ON c.id = p.client_id
 WHERE p.purchased_at >= ?
   AND p.purchased_at <= ?
 ORDER BY p.purchased_at ASC, p.id ASC
            "#,
        )
        .bind(to_rfc3339(start))
        .bind(to_rfc3339(end))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BilledPurchase {
                client_id: row.client_id,
                client_name: row.client_name,
                client_debt: row.client_debt,
                siphons: row.siphons,
                jugs_6l: row.jugs_6l,
                jugs_12l: row.jugs_12l,
                paid: row.paid,
                total: row.total,
            })
            .collect())
    }
}

/// Parameters required to insert a purchase.
pub struct NewPurchase {
    pub client_id: i64,
    pub entry: PurchaseEntry,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseRow {
    id: i64,
    client_id: i64,
    siphons: i64,
    jugs_6l: i64,
    jugs_12l: i64,
    returned_siphons: i64,
    returned_jugs: i64,
    paid: i64,
    total: i64,
    debt_after: i64,
    purchased_at: DateTime<Utc>,
}

impl PurchaseRow {
    fn into_domain(self) -> Purchase {
        Purchase {
            id: self.id,
            client_id: self.client_id,
            siphons: self.siphons,
            jugs_6l: self.jugs_6l,
            jugs_12l: self.jugs_12l,
            returned_siphons: self.returned_siphons,
            returned_jugs: self.returned_jugs,
            paid: self.paid,
            total: self.total,
            debt_after: self.debt_after,
            purchased_at: self.purchased_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BilledPurchaseRow {
    client_id: i64,
    client_name: String,
    client_debt: i64,
    siphons: i64,
    jugs_6l: i64,
    jugs_12l: i64,
    paid: i64,
    total: i64,
}

/// Errors that can occur while mutating purchases.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("purchase references a client that does not exist")]
    MissingClient,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// Repository for the product catalog.
#[derive(Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub async fn list(&self) -> Result<Vec<Product>, ProductError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, price, stock FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProductRow::into_domain).collect())
    }

    /// Loads the prices of the ledger products inside the ledger transaction.
    pub async fn price_table(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
    ) -> Result<PriceTable, ProductError> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT id, name, price, stock FROM products")
            .fetch_all(&mut **tx)
            .await?;

        Ok(PriceTable::from_catalog(
            rows.iter().map(|row| (row.name.as_str(), row.price)),
        ))
    }

    pub async fn update_price(&self, id: i64, price: i64) -> Result<Option<Product>, ProductError> {
        let row = sqlx::query_as::<_, ProductRow>(
            "UPDATE products SET price = ? WHERE id = ? RETURNING id, name, price, stock",
        )
        .bind(price)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProductRow::into_domain))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    price: i64,
    stock: i64,
}

impl ProductRow {
    fn into_domain(self) -> Product {
        Product {
            id: self.id,
            name: self.name,
            price: self.price,
            stock: self.stock,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Repository for user accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Creates an account. The first account in an empty table becomes `ADMIN`.
    pub async fn create(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user: &NewUser<'_>,
    ) -> Result<User, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (username, password_hash, role, created_at) \
             VALUES (?, ?, CASE WHEN EXISTS (SELECT 1 FROM users) THEN 'USER' ELSE 'ADMIN' END, ?) \
             RETURNING id, username, password_hash, role, created_at",
        )
        .bind(user.username)
        .bind(user.password_hash)
        .bind(to_rfc3339(user.created_at))
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| {
            if constraint_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE) {
                UserError::DuplicateUsername
            } else {
                UserError::Database(err)
            }
        })?;

        Ok(row.into_credentials()?.user)
    }

    /// Loads an account with its password hash for sign-in.
    pub async fn fetch_credentials(
        &self,
        username: &str,
    ) -> Result<Option<UserCredentials>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_credentials).transpose()
    }

    /// Loads an account inside an open transaction.
    pub async fn fetch_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, username, password_hash, role, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row
            .map(UserRow::into_credentials)
            .transpose()?
            .map(|credentials| credentials.user))
    }
}

/// Data required to create a user.
pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_credentials(self) -> Result<UserCredentials, UserError> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(UserError::InvalidRole)?;
        Ok(UserCredentials {
            user: User {
                id: self.id,
                username: self.username,
                role,
                created_at: self.created_at,
            },
            password_hash: self.password_hash,
        })
    }
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("username is already registered")]
    DuplicateUsername,
    #[error("stored role is invalid: {0}")]
    InvalidRole(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

/// Repository for hashed refresh credentials.
#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: SqlitePool,
}

impl RefreshTokenRepository {
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        token: &NewRefreshToken<'_>,
    ) -> Result<(), RefreshTokenError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(token.token_hash)
        .bind(to_rfc3339(token.expires_at))
        .bind(to_rfc3339(token.created_at))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Removes an unexpired credential by its selector and returns it.
    ///
    /// Of two transactions taking the same selector only one gets the row.
    /// Rolling back restores the credential.
    pub async fn take_active(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredRefreshToken>, RefreshTokenError> {
        let row = sqlx::query_as::<_, StoredRefreshToken>(
            "DELETE FROM refresh_tokens WHERE id = ? AND expires_at > ? \
             RETURNING id, user_id, token_hash, expires_at",
        )
        .bind(id)
        .bind(to_rfc3339(now))
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Deletes up to `limit` credentials that expired at or before `now`.
    pub async fn delete_expired_batch(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE id IN \
             (SELECT id FROM refresh_tokens WHERE expires_at <= ? LIMIT ?)",
        )
        .bind(to_rfc3339(now))
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Payload required to store a refresh credential.
pub struct NewRefreshToken<'a> {
    pub id: &'a str,
    pub user_id: i64,
    pub token_hash: &'a str,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Stored refresh credential row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRefreshToken {
    pub id: String,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RefreshTokenError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
