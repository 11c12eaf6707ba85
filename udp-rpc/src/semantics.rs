//! Invocation semantics selected on each end.
//!
//! The same enum configures both sides, with different effects:
//!
//! | Mode           | Client                                   | Server                         |
//! |----------------|------------------------------------------|--------------------------------|
//! | `AtMostOnce`   | one attempt, then "no response"          | dedup cache replays duplicates |
//! | `AtLeastOnce`  | resend until the retry deadline expires  | every arrival is executed      |

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Semantics {
    /// A request's side effect is applied zero or one times.
    #[default]
    AtMostOnce,
    /// A request is retried until answered; duplicates may re-execute.
    AtLeastOnce,
}

impl Semantics {
    /// `true` if the client should resend after an attempt times out.
    pub fn retries(self) -> bool {
        matches!(self, Semantics::AtLeastOnce)
    }

    /// `true` if the server should suppress duplicate request ids.
    pub fn deduplicates(self) -> bool {
        matches!(self, Semantics::AtMostOnce)
    }
}

impl FromStr for Semantics {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "amo" | "at-most-once" => Ok(Semantics::AtMostOnce),
            "alo" | "at-least-once" => Ok(Semantics::AtLeastOnce),
            _ => Err(format!("unknown invocation semantics: {s}")),
        }
    }
}

impl fmt::Display for Semantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Semantics::AtMostOnce => f.write_str("at-most-once"),
            Semantics::AtLeastOnce => f.write_str("at-least-once"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_names() {
        assert_eq!("amo".parse::<Semantics>().unwrap(), Semantics::AtMostOnce);
        assert_eq!("ALO".parse::<Semantics>().unwrap(), Semantics::AtLeastOnce);
        assert_eq!(
            " at-least-once ".parse::<Semantics>().unwrap(),
            Semantics::AtLeastOnce
        );
        assert!("maybe".parse::<Semantics>().is_err());
    }

    #[test]
    fn modes_split_responsibilities() {
        assert!(Semantics::AtMostOnce.deduplicates());
        assert!(!Semantics::AtMostOnce.retries());
        assert!(Semantics::AtLeastOnce.retries());
        assert!(!Semantics::AtLeastOnce.deduplicates());
    }
}
