// ABOUTME: SQLite-backed account storage, balance ledger and session log
// Handles schema creation, password hashing and atomic debits

use super::ledger::{
    apply_debit, Account, AccountLedger, AccountRole, AccountStore, NewAccount,
};
use super::session::Session;
use crate::utils::cost_calculator::round_cost;
use crate::utils::error::{ChatMeterError, Result};
use chrono::Local;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL,
    balance REAL NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id),
    start_time TEXT NOT NULL,
    end_time TEXT,
    request_count INTEGER NOT NULL,
    accumulated_cost REAL NOT NULL
);
";

const ACCOUNT_COLUMNS: &str =
    "id, username, first_name, last_name, email, role, balance, password_hash";

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Salted hash stored as `salt$digest`
fn new_password_hash(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, hash_password(password, &salt))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => hash_password(password, salt) == digest,
        None => false,
    }
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<(Account, String)> {
    let role: String = row.get(5)?;
    let role = role.parse::<AccountRole>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok((
        Account {
            id: row.get(0)?,
            username: row.get(1)?,
            first_name: row.get(2)?,
            last_name: row.get(3)?,
            email: row.get(4)?,
            role,
            balance: row.get(6)?,
        },
        row.get(7)?,
    ))
}

pub struct AccountDatabase {
    conn: Arc<Mutex<Connection>>,
    pub db_path: Option<PathBuf>,
}

impl AccountDatabase {
    /// Open (creating if needed) the database file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        };
        db.init_schema()?;
        tracing::debug!(path = %path.display(), "opened account database");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            db_path: None,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock()?)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<(Account, String)>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM accounts WHERE username = ?1", ACCOUNT_COLUMNS);
        Ok(conn.query_row(&sql, [username], row_to_account).optional()?)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM accounts ORDER BY username", ACCOUNT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], row_to_account)?
            .map(|r| r.map(|(account, _)| account))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    /// Change a user's role; returns false when the username is unknown
    pub fn set_role(&self, username: &str, role: AccountRole) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE accounts SET role = ?1 WHERE username = ?2",
            params![role.as_str(), username],
        )?;
        Ok(updated > 0)
    }

    /// Add funds to an account and return the new balance
    pub fn credit(&self, username: &str, amount: f64) -> Result<f64> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ChatMeterError::InvalidParameter {
                name: "amount".to_string(),
                value: amount.to_string(),
                reason: "must be a positive number".to_string(),
            });
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let balance: Option<f64> = tx
            .query_row(
                "SELECT balance FROM accounts WHERE username = ?1",
                [username],
                |row| row.get(0),
            )
            .optional()?;
        let balance =
            balance.ok_or_else(|| ChatMeterError::AccountNotFound(username.to_string()))?;

        let updated = round_cost(balance + amount);
        tx.execute(
            "UPDATE accounts SET balance = ?1 WHERE username = ?2",
            params![updated, username],
        )?;
        tx.commit()?;

        tracing::info!(username, amount, balance = updated, "credited account");
        Ok(updated)
    }

    /// Persist a finished session
    pub fn record_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sessions
                (id, account_id, start_time, end_time, request_count, accumulated_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.account_id,
                session.start_time.to_rfc3339(),
                session.end_time.map(|t| t.to_rfc3339()),
                session.request_count,
                session.accumulated_cost,
            ],
        )?;
        tracing::debug!(session = %session.id, requests = session.request_count, "recorded session");
        Ok(())
    }

    /// Number of recorded sessions and their total cost for an account
    pub fn spending_summary(&self, account_id: &str) -> Result<(u32, f64)> {
        let conn = self.conn()?;
        let (count, total): (u32, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), SUM(accumulated_cost) FROM sessions WHERE account_id = ?1",
            [account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((count, round_cost(total.unwrap_or(0.0))))
    }
}

impl AccountStore for AccountDatabase {
    fn authenticate(&self, username: &str, password: &str) -> Result<Option<Account>> {
        match self.find_by_username(username)? {
            Some((account, stored)) if verify_password(password, &stored) => Ok(Some(account)),
            Some(_) => {
                tracing::debug!(username, "password mismatch");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn create_account(&self, fields: NewAccount) -> Result<Account> {
        if fields.username.trim().is_empty() {
            return Err(ChatMeterError::InvalidParameter {
                name: "username".to_string(),
                value: fields.username,
                reason: "must not be empty".to_string(),
            });
        }

        let role = AccountRole::User;
        let account = Account {
            id: Uuid::new_v4().to_string(),
            username: fields.username.trim().to_string(),
            first_name: fields.first_name,
            last_name: fields.last_name,
            email: fields.email,
            role,
            balance: role.starting_balance(),
        };

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO accounts
                (id, username, first_name, last_name, email, password_hash, role, balance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.id,
                account.username,
                account.first_name,
                account.last_name,
                account.email,
                new_password_hash(&fields.password),
                account.role.as_str(),
                account.balance,
                Local::now().to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => {
                tracing::info!(username = %account.username, "created account");
                Ok(account)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(ChatMeterError::DuplicateUsername(account.username))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn load_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.find_by_username(username)?.map(|(account, _)| account))
    }
}

impl AccountLedger for AccountDatabase {
    fn balance(&self, account_id: &str) -> Result<f64> {
        let conn = self.conn()?;
        let balance: Option<f64> = conn
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .optional()?;
        balance.ok_or_else(|| ChatMeterError::AccountNotFound(account_id.to_string()))
    }

    fn debit(&self, account_id: &str, amount: f64) -> Result<f64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let available: Option<f64> = tx
            .query_row(
                "SELECT balance FROM accounts WHERE id = ?1",
                [account_id],
                |row| row.get(0),
            )
            .optional()?;
        let available =
            available.ok_or_else(|| ChatMeterError::AccountNotFound(account_id.to_string()))?;

        let (remaining, clamped) = apply_debit(available, amount);
        tx.execute(
            "UPDATE accounts SET balance = ?1 WHERE id = ?2",
            params![remaining, account_id],
        )?;
        tx.commit()?;

        tracing::debug!(account = account_id, amount, remaining, "debited account");
        if clamped {
            return Err(ChatMeterError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        Ok(remaining)
    }
}
