//! Routes bank operation codes to the [`Ledger`].
//!
//! Every successful mutation pushes the account's new state to monitor
//! subscribers; a transfer pushes both sides.

use std::time::Duration;

use udp_rpc::codec::Wire;
use udp_rpc::{Outcome, Peer, Request, Service, ServiceError};

use crate::ledger::{parse_currency, AccountSnapshot, Ledger, LedgerError};
use crate::protocol::{
    AccountId, Amount, AmountRequest, Credentials, ExchangeRequest, MonitorRequest, OpCode,
    OpenAccount, TransferRequest,
};

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        ServiceError::rejected(e)
    }
}

pub struct BankService {
    ledger: Ledger,
}

impl BankService {
    pub fn new() -> Self {
        Self::with_ledger(Ledger::new())
    }

    pub fn with_ledger(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn open_account(&self, req: OpenAccount) -> Result<Outcome, ServiceError> {
        let currency = parse_currency(&req.currency)?;
        let account = self.ledger.open_account(
            &req.holder,
            &req.secret,
            currency,
            req.initial_balance,
        )?;
        Ok(changed(
            Outcome::ok(format!("Account Created. ID: {}", account.id))
                .with_payload(AccountId(account.id).to_bytes()),
            &account,
        ))
    }

    fn close_account(&self, req: Credentials) -> Result<Outcome, ServiceError> {
        let account = self.ledger.close_account(req.id, &req.holder, &req.secret)?;
        let update = account.to_update().to_bytes();
        Ok(Outcome::ok(format!("Account Closed. ID: {}", account.id))
            .notify(format!("Account {} closed", account.id), update))
    }

    fn check_balance(&self, req: Credentials) -> Result<Outcome, ServiceError> {
        let balance = self.ledger.check_balance(req.id, &req.holder, &req.secret)?;
        Ok(Outcome::ok(format!("Current Balance: {balance:.2}"))
            .with_payload(Amount(balance).to_bytes()))
    }

    fn deposit(&self, req: AmountRequest) -> Result<Outcome, ServiceError> {
        let c = &req.credentials;
        let currency = parse_currency(&req.currency)?;
        let account = self
            .ledger
            .deposit(c.id, &c.holder, &c.secret, currency, req.amount)?;
        Ok(changed(
            Outcome::ok(format!("Deposit Success. New Balance: {:.2}", account.balance))
                .with_payload(Amount(account.balance).to_bytes()),
            &account,
        ))
    }

    fn withdraw(&self, req: AmountRequest) -> Result<Outcome, ServiceError> {
        let c = &req.credentials;
        let currency = parse_currency(&req.currency)?;
        let account = self
            .ledger
            .withdraw(c.id, &c.holder, &c.secret, currency, req.amount)?;
        Ok(changed(
            Outcome::ok(format!("Withdraw Success. New Balance: {:.2}", account.balance))
                .with_payload(Amount(account.balance).to_bytes()),
            &account,
        ))
    }

    fn transfer(&self, req: TransferRequest) -> Result<Outcome, ServiceError> {
        let c = &req.credentials;
        let currency = parse_currency(&req.currency)?;
        let (sender, receiver) = self.ledger.transfer(
            c.id,
            &c.holder,
            &c.secret,
            req.to_id,
            currency,
            req.amount,
        )?;
        let outcome = Outcome::ok(format!(
            "Transfer Success. New Balance: {:.2}",
            sender.balance
        ))
        .with_payload(Amount(sender.balance).to_bytes());
        Ok(changed(changed(outcome, &sender), &receiver))
    }

    fn exchange(&self, req: ExchangeRequest) -> Result<Outcome, ServiceError> {
        let c = &req.credentials;
        let from = parse_currency(&req.from_currency)?;
        let to = parse_currency(&req.to_currency)?;
        let converted = self
            .ledger
            .exchange(c.id, &c.holder, &c.secret, from, to, req.amount)?;
        Ok(Outcome::ok(format!(
            "Exchange Quote: {:.2} {from} = {converted:.2} {to}",
            req.amount
        ))
        .with_payload(Amount(converted).to_bytes()))
    }

    fn monitor(&self, req: MonitorRequest, peer: Peer) -> Result<Outcome, ServiceError> {
        if req.lease_seconds <= 0 {
            return Err(ServiceError::rejected(format!(
                "Invalid monitor interval: {}",
                req.lease_seconds
            )));
        }
        log::info!("[bank] {} monitoring for {}s", peer.addr, req.lease_seconds);
        Ok(Outcome::ok("Monitor Registered")
            .subscribe_caller(Duration::from_secs(req.lease_seconds as u64)))
    }

    fn account_info(&self, req: Credentials) -> Result<Outcome, ServiceError> {
        let account = self.ledger.account_info(req.id, &req.holder, &req.secret)?;
        Ok(Outcome::ok("Account Info").with_payload(account.to_info().to_bytes()))
    }
}

impl Default for BankService {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach an "account updated" callback for `account`.
fn changed(outcome: Outcome, account: &AccountSnapshot) -> Outcome {
    outcome.notify(
        format!("Account {} updated", account.id),
        account.to_update().to_bytes(),
    )
}

impl Service for BankService {
    fn call(&self, request: &Request, peer: Peer) -> Result<Outcome, ServiceError> {
        let op = OpCode::from_i32(request.op).ok_or(ServiceError::UnknownOperation(request.op))?;
        log::debug!("[bank] {op} from {}", peer.addr);

        let payload = request.payload.as_slice();
        match op {
            OpCode::OpenAccount => self.open_account(OpenAccount::from_bytes(payload)?),
            OpCode::CloseAccount => self.close_account(Credentials::from_bytes(payload)?),
            OpCode::CheckBalance => self.check_balance(Credentials::from_bytes(payload)?),
            OpCode::Deposit => self.deposit(AmountRequest::from_bytes(payload)?),
            OpCode::Withdraw => self.withdraw(AmountRequest::from_bytes(payload)?),
            OpCode::Transfer => self.transfer(TransferRequest::from_bytes(payload)?),
            OpCode::Exchange => self.exchange(ExchangeRequest::from_bytes(payload)?),
            OpCode::Monitor => self.monitor(MonitorRequest::from_bytes(payload)?, peer),
            OpCode::GetAccountInfo => self.account_info(Credentials::from_bytes(payload)?),
        }
    }
}
