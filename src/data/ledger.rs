// ABOUTME: Account model and the ledger/authentication seams consumed by the core
// The ledger is the single authority for balances; the core never re-derives them

use crate::utils::cost_calculator::round_cost;
use crate::utils::error::{ChatMeterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    User,
    Guest,
    Admin,
}

impl AccountRole {
    /// Balance granted when an account with this role is created
    pub fn starting_balance(&self) -> f64 {
        match self {
            Self::User => 1.0,
            Self::Guest => 0.2,
            Self::Admin => 100.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Guest => "guest",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountRole {
    type Err = ChatMeterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "guest" => Ok(Self::Guest),
            "admin" => Ok(Self::Admin),
            other => Err(ChatMeterError::InvalidParameter {
                name: "role".to_string(),
                value: other.to_string(),
                reason: "must be one of user, guest, admin".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: AccountRole,
    pub balance: f64,
}

impl Account {
    /// Transient guest account; never written to storage
    pub fn guest() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: "guest".to_string(),
            first_name: "Guest".to_string(),
            last_name: String::new(),
            email: String::new(),
            role: AccountRole::Guest,
            balance: AccountRole::Guest.starting_balance(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }

    pub fn is_guest(&self) -> bool {
        self.role == AccountRole::Guest
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User: {} {} {} ({})", self.username, self.email, self.id, self.role)
    }
}

/// Fields collected at signup
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

/// Balance authority consulted before and after every exchange
pub trait AccountLedger: Send + Sync {
    fn balance(&self, account_id: &str) -> Result<f64>;

    /// Debit `amount` and return the new balance.
    ///
    /// A debit larger than the balance clamps the balance to zero and
    /// returns `InsufficientFunds`; the clamped balance is still stored.
    fn debit(&self, account_id: &str, amount: f64) -> Result<f64>;
}

/// Authentication and account storage
pub trait AccountStore: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Result<Option<Account>>;
    fn create_account(&self, fields: NewAccount) -> Result<Account>;
    fn load_account_by_username(&self, username: &str) -> Result<Option<Account>>;
}

/// Apply a debit to `balance`, returning the stored value and whether it clamped
pub(crate) fn apply_debit(balance: f64, amount: f64) -> (f64, bool) {
    let remaining = round_cost(balance - amount);
    if remaining < 0.0 {
        (0.0, true)
    } else {
        (remaining, false)
    }
}

/// Ledger kept in memory, used for guest accounts
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: Mutex<HashMap<String, f64>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(account: &Account) -> Result<Self> {
        let ledger = Self::new();
        ledger.open_account(&account.id, account.balance)?;
        Ok(ledger)
    }

    pub fn open_account(&self, account_id: &str, balance: f64) -> Result<()> {
        let mut balances = self.balances.lock()?;
        balances.insert(account_id.to_string(), round_cost(balance));
        Ok(())
    }
}

impl AccountLedger for InMemoryLedger {
    fn balance(&self, account_id: &str) -> Result<f64> {
        let balances = self.balances.lock()?;
        balances
            .get(account_id)
            .copied()
            .ok_or_else(|| ChatMeterError::AccountNotFound(account_id.to_string()))
    }

    fn debit(&self, account_id: &str, amount: f64) -> Result<f64> {
        let mut balances = self.balances.lock()?;
        let balance = balances
            .get_mut(account_id)
            .ok_or_else(|| ChatMeterError::AccountNotFound(account_id.to_string()))?;

        let available = *balance;
        let (remaining, clamped) = apply_debit(available, amount);
        *balance = remaining;
        tracing::debug!(account = account_id, amount, remaining, "debited in-memory account");

        if clamped {
            return Err(ChatMeterError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        Ok(remaining)
    }
}
