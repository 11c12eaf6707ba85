//! Typed client for the bank service.
//!
//! [`BankClient`] is one session: a socket, a request-id sequence and a
//! retry policy, wrapped in methods that build the right payload, call
//! [`RpcClient::invoke`] and decode the reply.  [`Monitor`] is a separate
//! session that registers for callbacks and yields account updates until
//! its lease runs out.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use udp_rpc::codec::{CodecError, Wire};
use udp_rpc::{ClientConfig, InvokeError, Response, RpcClient, Status};

use crate::protocol::{
    AccountId, AccountInfo, AccountUpdate, Amount, AmountRequest, Credentials, Currency,
    ExchangeRequest, MonitorRequest, OpCode, OpenAccount, TransferRequest,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    /// The server answered with FAIL or ERROR.
    #[error("{status}: {message}")]
    Rejected { status: Status, message: String },
    /// The reply payload did not decode as the operation's reply type.
    #[error("malformed reply payload: {0}")]
    BadReply(#[from] CodecError),
}

impl ClientError {
    /// Server-side message for a rejected request.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Turn a non-OK reply into an error.
fn accepted(reply: Response) -> Result<Response, ClientError> {
    match reply.status {
        Status::Ok => Ok(reply),
        status => Err(ClientError::Rejected {
            status,
            message: reply.message,
        }),
    }
}

pub struct BankClient {
    rpc: RpcClient,
}

impl BankClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            rpc: RpcClient::connect(config).await?,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    /// Callbacks that arrive on this session's socket while it waits for a
    /// reply.
    pub fn callbacks(&self) -> tokio::sync::mpsc::UnboundedReceiver<Response> {
        self.rpc.callbacks()
    }

    async fn call(&self, op: OpCode, payload: impl Wire) -> Result<Response, ClientError> {
        accepted(self.rpc.invoke(op.to_i32(), payload.to_bytes()).await?)
    }

    /// Open an account; returns its id.
    pub async fn open_account(
        &self,
        holder: &str,
        secret: &str,
        currency: Currency,
        initial_balance: f64,
    ) -> Result<i32, ClientError> {
        let req = OpenAccount {
            holder: holder.to_string(),
            secret: secret.to_string(),
            currency: currency.to_string(),
            initial_balance,
        };
        let reply = self.call(OpCode::OpenAccount, req).await?;
        Ok(AccountId::from_bytes(&reply.payload)?.0)
    }

    pub async fn close_account(&self, who: &Credentials) -> Result<String, ClientError> {
        let reply = self.call(OpCode::CloseAccount, who.clone()).await?;
        Ok(reply.message)
    }

    pub async fn check_balance(&self, who: &Credentials) -> Result<f64, ClientError> {
        let reply = self.call(OpCode::CheckBalance, who.clone()).await?;
        Ok(Amount::from_bytes(&reply.payload)?.0)
    }

    /// Returns the new balance.
    pub async fn deposit(
        &self,
        who: &Credentials,
        currency: Currency,
        amount: f64,
    ) -> Result<f64, ClientError> {
        let req = AmountRequest {
            credentials: who.clone(),
            currency: currency.to_string(),
            amount,
        };
        let reply = self.call(OpCode::Deposit, req).await?;
        Ok(Amount::from_bytes(&reply.payload)?.0)
    }

    /// Returns the new balance.
    pub async fn withdraw(
        &self,
        who: &Credentials,
        currency: Currency,
        amount: f64,
    ) -> Result<f64, ClientError> {
        let req = AmountRequest {
            credentials: who.clone(),
            currency: currency.to_string(),
            amount,
        };
        let reply = self.call(OpCode::Withdraw, req).await?;
        Ok(Amount::from_bytes(&reply.payload)?.0)
    }

    /// Returns the sender's new balance.
    pub async fn transfer(
        &self,
        who: &Credentials,
        to_id: i32,
        currency: Currency,
        amount: f64,
    ) -> Result<f64, ClientError> {
        let req = TransferRequest {
            credentials: who.clone(),
            to_id,
            currency: currency.to_string(),
            amount,
        };
        let reply = self.call(OpCode::Transfer, req).await?;
        Ok(Amount::from_bytes(&reply.payload)?.0)
    }

    /// Quote `amount` of `from` in `to`.
    pub async fn exchange(
        &self,
        who: &Credentials,
        from: Currency,
        to: Currency,
        amount: f64,
    ) -> Result<f64, ClientError> {
        let req = ExchangeRequest {
            credentials: who.clone(),
            from_currency: from.to_string(),
            to_currency: to.to_string(),
            amount,
        };
        let reply = self.call(OpCode::Exchange, req).await?;
        Ok(Amount::from_bytes(&reply.payload)?.0)
    }

    pub async fn account_info(&self, who: &Credentials) -> Result<AccountInfo, ClientError> {
        let reply = self.call(OpCode::GetAccountInfo, who.clone()).await?;
        Ok(AccountInfo::from_bytes(&reply.payload)?)
    }

    pub fn close(self) {
        self.rpc.close();
    }
}

/// A callback listener with its own socket.
pub struct Monitor {
    rpc: RpcClient,
    until: Instant,
}

impl Monitor {
    /// Register for `lease` worth of callbacks.
    ///
    /// The lease is sent in whole seconds, rounded up.
    pub async fn register(config: ClientConfig, lease: Duration) -> Result<Self, ClientError> {
        let seconds = lease.as_secs() + u64::from(lease.subsec_nanos() > 0);
        let lease_seconds = i32::try_from(seconds).unwrap_or(i32::MAX);
        let started = Instant::now();

        let rpc = RpcClient::connect(config).await?;
        let reply = rpc
            .invoke(
                OpCode::Monitor.to_i32(),
                MonitorRequest { lease_seconds }.to_bytes(),
            )
            .await?;
        accepted(reply)?;

        log::info!("monitor {} registered for {lease_seconds}s", rpc.local_addr());
        Ok(Self {
            rpc,
            until: started + Duration::from_secs(lease_seconds as u64),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.rpc.local_addr()
    }

    /// When the lease is expected to end.
    pub fn expires_at(&self) -> Instant {
        self.until
    }

    /// Next account update, or `None` once the lease has run out.
    ///
    /// Callbacks whose body does not decode are skipped.
    pub async fn next_update(&self) -> Result<Option<AccountUpdate>, ClientError> {
        loop {
            let Some(callback) = self.rpc.next_callback(self.until).await? else {
                return Ok(None);
            };
            match AccountUpdate::from_bytes(&callback.payload) {
                Ok(update) => return Ok(Some(update)),
                Err(e) => log::debug!("skipping callback '{}': {e}", callback.message),
            }
        }
    }

    pub fn close(self) {
        self.rpc.close();
    }
}
