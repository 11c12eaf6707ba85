//! In-memory account store.
//!
//! Accounts live behind their own `Mutex`, held in a map guarded by an
//! `RwLock`.  The map lock is only taken to look up, insert or remove a
//! handle; balance changes happen under the account lock alone.  A transfer
//! locks both accounts in ascending id order so two opposing transfers can
//! never deadlock.
//!
//! Every committed balance change bumps the account's `version` by one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use thiserror::Error;

use crate::protocol::{AccountInfo, AccountUpdate, Currency};

/// Id handed to the first account opened.
pub const FIRST_ACCOUNT_ID: i32 = 1000;

/// Longest holder name or password accepted, in bytes.  Keeps every reply
/// and update that echoes the holder inside one datagram.
pub const MAX_FIELD_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Account {0} does not exist")]
    AccountNotFound(i32),
    #[error("Name or password mismatch")]
    CredentialMismatch,
    #[error("Currency mismatch: account holds {account}, request is in {requested}")]
    CurrencyMismatch { account: Currency, requested: Currency },
    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),
    #[error("Insufficient balance: {available:.2} available, {requested:.2} requested")]
    InsufficientBalance { available: f64, requested: f64 },
    #[error("Cannot transfer to the same account")]
    SameAccountTransfer,
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("{field} exceeds {max} bytes")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
    #[error("Opening balance cannot be negative")]
    NegativeOpeningBalance,
}

/// Parse a currency name, mapping failure into the ledger's error.
pub fn parse_currency(name: &str) -> Result<Currency, LedgerError> {
    name.parse()
        .map_err(|_| LedgerError::UnknownCurrency(name.to_string()))
}

#[derive(Debug)]
struct Account {
    id: i32,
    holder: String,
    secret: String,
    currency: Currency,
    balance: f64,
    version: i64,
    closed: bool,
}

impl Account {
    fn authorize(&self, holder: &str, secret: &str) -> Result<(), LedgerError> {
        if self.closed {
            return Err(LedgerError::AccountNotFound(self.id));
        }
        if self.holder != holder || self.secret != secret {
            return Err(LedgerError::CredentialMismatch);
        }
        Ok(())
    }

    fn require_currency(&self, requested: Currency) -> Result<(), LedgerError> {
        if self.currency != requested {
            return Err(LedgerError::CurrencyMismatch {
                account: self.currency,
                requested,
            });
        }
        Ok(())
    }

    fn set_balance(&mut self, balance: f64) {
        self.balance = balance;
        self.version += 1;
    }

    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id,
            holder: self.holder.clone(),
            currency: self.currency,
            balance: self.balance,
            version: self.version,
        }
    }
}

/// Read-only copy of an account's public state.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub id: i32,
    pub holder: String,
    pub currency: Currency,
    pub balance: f64,
    pub version: i64,
}

impl AccountSnapshot {
    pub fn to_update(&self) -> AccountUpdate {
        AccountUpdate {
            version: self.version,
            id: self.id,
            holder: self.holder.clone(),
            currency: self.currency.to_string(),
            balance: self.balance,
        }
    }

    pub fn to_info(&self) -> AccountInfo {
        AccountInfo {
            id: self.id,
            holder: self.holder.clone(),
            currency: self.currency.to_string(),
            balance: self.balance,
            version: self.version,
        }
    }
}

fn positive(amount: f64) -> Result<f64, LedgerError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

fn lock(account: &Mutex<Account>) -> MutexGuard<'_, Account> {
    account.lock().unwrap_or_else(|e| e.into_inner())
}

type Handle = Arc<Mutex<Account>>;

pub struct Ledger {
    accounts: RwLock<HashMap<i32, Handle>>,
    next_id: AtomicI32,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            next_id: AtomicI32::new(FIRST_ACCOUNT_ID),
        }
    }

    fn handle(&self, id: i32) -> Result<Handle, LedgerError> {
        self.accounts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    pub fn open_account(
        &self,
        holder: &str,
        secret: &str,
        currency: Currency,
        initial_balance: f64,
    ) -> Result<AccountSnapshot, LedgerError> {
        if holder.is_empty() {
            return Err(LedgerError::MissingField("Name"));
        }
        if secret.is_empty() {
            return Err(LedgerError::MissingField("Password"));
        }
        for (field, value) in [("Name", holder), ("Password", secret)] {
            if value.len() > MAX_FIELD_LEN {
                return Err(LedgerError::FieldTooLong {
                    field,
                    max: MAX_FIELD_LEN,
                });
            }
        }
        if initial_balance.is_nan() || initial_balance.is_infinite() {
            return Err(LedgerError::InvalidAmount(initial_balance));
        }
        if initial_balance < 0.0 {
            return Err(LedgerError::NegativeOpeningBalance);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let account = Account {
            id,
            holder: holder.to_string(),
            secret: secret.to_string(),
            currency,
            balance: initial_balance,
            version: 0,
            closed: false,
        };
        let snapshot = account.snapshot();
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::new(Mutex::new(account)));
        log::info!("[ledger] opened #{id} for {holder} ({currency} {initial_balance:.2})");
        Ok(snapshot)
    }

    /// Close an account; returns its final state.
    pub fn close_account(
        &self,
        id: i32,
        holder: &str,
        secret: &str,
    ) -> Result<AccountSnapshot, LedgerError> {
        let handle = self.handle(id)?;
        let snapshot = {
            let mut account = lock(&handle);
            account.authorize(holder, secret)?;
            account.closed = true;
            account.snapshot()
        };
        self.accounts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        log::info!("[ledger] closed #{id}");
        Ok(snapshot)
    }

    pub fn check_balance(&self, id: i32, holder: &str, secret: &str) -> Result<f64, LedgerError> {
        let handle = self.handle(id)?;
        let account = lock(&handle);
        account.authorize(holder, secret)?;
        Ok(account.balance)
    }

    pub fn account_info(
        &self,
        id: i32,
        holder: &str,
        secret: &str,
    ) -> Result<AccountSnapshot, LedgerError> {
        let handle = self.handle(id)?;
        let account = lock(&handle);
        account.authorize(holder, secret)?;
        Ok(account.snapshot())
    }

    pub fn deposit(
        &self,
        id: i32,
        holder: &str,
        secret: &str,
        currency: Currency,
        amount: f64,
    ) -> Result<AccountSnapshot, LedgerError> {
        let handle = self.handle(id)?;
        let mut account = lock(&handle);
        account.authorize(holder, secret)?;
        account.require_currency(currency)?;
        let amount = positive(amount)?;

        let balance = account.balance + amount;
        account.set_balance(balance);
        log::debug!("[ledger] #{id} +{amount:.2} → {balance:.2} (v{})", account.version);
        Ok(account.snapshot())
    }

    pub fn withdraw(
        &self,
        id: i32,
        holder: &str,
        secret: &str,
        currency: Currency,
        amount: f64,
    ) -> Result<AccountSnapshot, LedgerError> {
        let handle = self.handle(id)?;
        let mut account = lock(&handle);
        account.authorize(holder, secret)?;
        account.require_currency(currency)?;
        let amount = positive(amount)?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: account.balance,
                requested: amount,
            });
        }

        let balance = account.balance - amount;
        account.set_balance(balance);
        log::debug!("[ledger] #{id} -{amount:.2} → {balance:.2} (v{})", account.version);
        Ok(account.snapshot())
    }

    /// Move `amount` from `from_id` to `to_id`; returns `(sender, receiver)`.
    ///
    /// Either both balances change or neither does.
    pub fn transfer(
        &self,
        from_id: i32,
        holder: &str,
        secret: &str,
        to_id: i32,
        currency: Currency,
        amount: f64,
    ) -> Result<(AccountSnapshot, AccountSnapshot), LedgerError> {
        if from_id == to_id {
            return Err(LedgerError::SameAccountTransfer);
        }
        let from = self.handle(from_id)?;
        let to = self.handle(to_id)?;

        let (low, high) = if from_id < to_id { (&from, &to) } else { (&to, &from) };
        let low = lock(low);
        let high = lock(high);
        let (mut sender, mut receiver) = if from_id < to_id { (low, high) } else { (high, low) };

        sender.authorize(holder, secret)?;
        if receiver.closed {
            return Err(LedgerError::AccountNotFound(to_id));
        }
        sender.require_currency(currency)?;
        receiver.require_currency(currency)?;
        let amount = positive(amount)?;
        if sender.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                available: sender.balance,
                requested: amount,
            });
        }

        let debited = sender.balance - amount;
        let credited = receiver.balance + amount;
        sender.set_balance(debited);
        receiver.set_balance(credited);
        log::debug!("[ledger] #{from_id} → #{to_id}: {amount:.2} {currency}");
        Ok((sender.snapshot(), receiver.snapshot()))
    }

    /// Quote `amount` of `from` in `to`.  Does not touch the balance.
    pub fn exchange(
        &self,
        id: i32,
        holder: &str,
        secret: &str,
        from: Currency,
        to: Currency,
        amount: f64,
    ) -> Result<f64, LedgerError> {
        let handle = self.handle(id)?;
        lock(&handle).authorize(holder, secret)?;
        let amount = positive(amount)?;
        Ok(from.convert(to, amount))
    }

    /// Current state of an open account, without credentials.
    pub fn snapshot(&self, id: i32) -> Option<AccountSnapshot> {
        let handle = self.handle(id).ok()?;
        let account = lock(&handle);
        (!account.closed).then(|| account.snapshot())
    }

    pub fn len(&self) -> usize {
        self.accounts.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
