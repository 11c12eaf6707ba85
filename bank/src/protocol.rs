//! Bank operations as they appear on the wire.
//!
//! Each operation code has a request payload struct and, where the reply
//! carries data, a reply payload struct.  Field order is fixed; see
//! [`udp_rpc::codec`] for the primitive encodings.
//!
//! | op | request                                              | OK reply payload        |
//! |----|------------------------------------------------------|-------------------------|
//! | 1  | [`OpenAccount`]                                      | [`AccountId`]           |
//! | 2  | [`Credentials`]                                      | —                       |
//! | 3  | [`Credentials`]                                      | [`Amount`] (balance)    |
//! | 4  | [`AmountRequest`]                                    | [`Amount`] (balance)    |
//! | 5  | [`AmountRequest`]                                    | [`Amount`] (balance)    |
//! | 6  | [`TransferRequest`]                                  | [`Amount`] (sender)     |
//! | 7  | [`ExchangeRequest`]                                  | [`Amount`] (converted)  |
//! | 8  | [`MonitorRequest`]                                   | —                       |
//! | 9  | [`Credentials`]                                      | [`AccountInfo`]         |
//!
//! Callbacks carry an [`AccountUpdate`].

use std::fmt;
use std::str::FromStr;

use udp_rpc::codec::{CodecError, Reader, Wire, Writer};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    OpenAccount = 1,
    CloseAccount = 2,
    CheckBalance = 3,
    Deposit = 4,
    Withdraw = 5,
    Transfer = 6,
    Exchange = 7,
    Monitor = 8,
    GetAccountInfo = 9,
}

impl OpCode {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            1 => OpCode::OpenAccount,
            2 => OpCode::CloseAccount,
            3 => OpCode::CheckBalance,
            4 => OpCode::Deposit,
            5 => OpCode::Withdraw,
            6 => OpCode::Transfer,
            7 => OpCode::Exchange,
            8 => OpCode::Monitor,
            9 => OpCode::GetAccountInfo,
            _ => return None,
        })
    }

    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OpCode::OpenAccount => "open-account",
            OpCode::CloseAccount => "close-account",
            OpCode::CheckBalance => "check-balance",
            OpCode::Deposit => "deposit",
            OpCode::Withdraw => "withdraw",
            OpCode::Transfer => "transfer",
            OpCode::Exchange => "exchange",
            OpCode::Monitor => "monitor",
            OpCode::GetAccountInfo => "get-account-info",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Currency {
    SGD,
    USD,
}

impl Currency {
    /// Value of one unit in SGD.
    fn in_sgd(self) -> f64 {
        match self {
            Currency::SGD => 1.0,
            Currency::USD => 1.35,
        }
    }

    /// Convert `amount` of `self` into `to`.
    pub fn convert(self, to: Currency, amount: f64) -> f64 {
        if self == to {
            return amount;
        }
        amount * self.in_sgd() / to.in_sgd()
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SGD" => Ok(Currency::SGD),
            "USD" => Ok(Currency::USD),
            _ => Err(format!("Unknown currency: {}", s)),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Currency::SGD => write!(f, "SGD"),
            Currency::USD => write!(f, "USD"),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Account id plus the holder's name and secret; prefix of most requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub id: i32,
    pub holder: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(id: i32, holder: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id,
            holder: holder.into(),
            secret: secret.into(),
        }
    }
}

impl Wire for Credentials {
    fn write(&self, w: &mut Writer) {
        w.put_i32(self.id).put_str(&self.holder).put_str(&self.secret);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: r.get_i32()?,
            holder: r.get_str()?,
            secret: r.get_str()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAccount {
    pub holder: String,
    pub secret: String,
    /// Currency name as typed by the user; validated by the server.
    pub currency: String,
    pub initial_balance: f64,
}

impl Wire for OpenAccount {
    fn write(&self, w: &mut Writer) {
        w.put_str(&self.holder)
            .put_str(&self.secret)
            .put_str(&self.currency)
            .put_f64(self.initial_balance);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            holder: r.get_str()?,
            secret: r.get_str()?,
            currency: r.get_str()?,
            initial_balance: r.get_f64()?,
        })
    }
}

/// Deposit or withdraw.
#[derive(Debug, Clone, PartialEq)]
pub struct AmountRequest {
    pub credentials: Credentials,
    pub currency: String,
    pub amount: f64,
}

impl Wire for AmountRequest {
    fn write(&self, w: &mut Writer) {
        self.credentials.write(w);
        w.put_str(&self.currency).put_f64(self.amount);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            credentials: Credentials::read(r)?,
            currency: r.get_str()?,
            amount: r.get_f64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub credentials: Credentials,
    pub to_id: i32,
    pub currency: String,
    pub amount: f64,
}

impl Wire for TransferRequest {
    fn write(&self, w: &mut Writer) {
        self.credentials.write(w);
        w.put_i32(self.to_id)
            .put_str(&self.currency)
            .put_f64(self.amount);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            credentials: Credentials::read(r)?,
            to_id: r.get_i32()?,
            currency: r.get_str()?,
            amount: r.get_f64()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRequest {
    pub credentials: Credentials,
    pub from_currency: String,
    pub to_currency: String,
    pub amount: f64,
}

impl Wire for ExchangeRequest {
    fn write(&self, w: &mut Writer) {
        self.credentials.write(w);
        w.put_str(&self.from_currency)
            .put_str(&self.to_currency)
            .put_f64(self.amount);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            credentials: Credentials::read(r)?,
            from_currency: r.get_str()?,
            to_currency: r.get_str()?,
            amount: r.get_f64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorRequest {
    pub lease_seconds: i32,
}

impl Wire for MonitorRequest {
    fn write(&self, w: &mut Writer) {
        w.put_i32(self.lease_seconds);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            lease_seconds: r.get_i32()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Replies and callbacks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountId(pub i32);

impl Wire for AccountId {
    fn write(&self, w: &mut Writer) {
        w.put_i32(self.0);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self(r.get_i32()?))
    }
}

/// A balance or converted sum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amount(pub f64);

impl Wire for Amount {
    fn write(&self, w: &mut Writer) {
        w.put_f64(self.0);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self(r.get_f64()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountInfo {
    pub id: i32,
    pub holder: String,
    pub currency: String,
    pub balance: f64,
    pub version: i64,
}

impl Wire for AccountInfo {
    fn write(&self, w: &mut Writer) {
        w.put_i32(self.id)
            .put_str(&self.holder)
            .put_str(&self.currency)
            .put_f64(self.balance)
            .put_i64(self.version);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            id: r.get_i32()?,
            holder: r.get_str()?,
            currency: r.get_str()?,
            balance: r.get_f64()?,
            version: r.get_i64()?,
        })
    }
}

impl fmt::Display for AccountInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "#{} {} {:.2} {} (v{})",
            self.id, self.holder, self.balance, self.currency, self.version
        )
    }
}

/// Body of every account-change callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    pub version: i64,
    pub id: i32,
    pub holder: String,
    pub currency: String,
    pub balance: f64,
}

impl Wire for AccountUpdate {
    fn write(&self, w: &mut Writer) {
        w.put_i64(self.version)
            .put_i32(self.id)
            .put_str(&self.holder)
            .put_str(&self.currency)
            .put_f64(self.balance);
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: r.get_i64()?,
            id: r.get_i32()?,
            holder: r.get_str()?,
            currency: r.get_str()?,
            balance: r.get_f64()?,
        })
    }
}

impl fmt::Display for AccountUpdate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "#{} {} balance {:.2} {} (v{})",
            self.id, self.holder, self.balance, self.currency, self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_codes_match_wire_constants() {
        for code in 1..=9 {
            let op = OpCode::from_i32(code).unwrap();
            assert_eq!(op.to_i32(), code);
        }
        assert_eq!(OpCode::from_i32(0), None);
        assert_eq!(OpCode::from_i32(10), None);
        assert_eq!(OpCode::Monitor.to_i32(), 8);
    }

    #[test]
    fn currency_parsing_is_case_insensitive() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::USD);
        assert_eq!(" Sgd ".parse::<Currency>().unwrap(), Currency::SGD);
        assert_eq!(
            "EUR".parse::<Currency>().unwrap_err(),
            "Unknown currency: EUR"
        );
    }

    #[test]
    fn conversion_uses_fixed_rate() {
        assert!((Currency::USD.convert(Currency::SGD, 100.0) - 135.0).abs() < 1e-9);
        assert!((Currency::SGD.convert(Currency::USD, 135.0) - 100.0).abs() < 1e-9);
        assert_eq!(Currency::SGD.convert(Currency::SGD, 42.0), 42.0);
    }

    #[test]
    fn transfer_field_order() {
        let req = TransferRequest {
            credentials: Credentials::new(1000, "Alice", "p"),
            to_id: 1001,
            currency: "USD".into(),
            amount: 5.0,
        };
        let bytes = req.to_bytes();
        assert_eq!(&bytes[..4], &1000i32.to_le_bytes());
        // id, "Alice", "p", to_id
        let to_at = 4 + 4 + 5 + 4 + 1;
        assert_eq!(&bytes[to_at..to_at + 4], &1001i32.to_le_bytes());
        assert_eq!(TransferRequest::from_bytes(&bytes).unwrap(), req);
    }

    #[test]
    fn update_leads_with_version() {
        let update = AccountUpdate {
            version: 2,
            id: 1000,
            holder: "Alice".into(),
            currency: "USD".into(),
            balance: 75.0,
        };
        let bytes = update.to_bytes();
        assert_eq!(&bytes[..8], &2i64.to_le_bytes());
        assert_eq!(AccountUpdate::from_bytes(&bytes).unwrap(), update);
    }

    #[test]
    fn short_payload_is_a_codec_error() {
        let bytes = Credentials::new(1, "a", "b").to_bytes();
        assert!(matches!(
            AmountRequest::from_bytes(&bytes),
            Err(CodecError::Truncated { .. })
        ));
    }
}
