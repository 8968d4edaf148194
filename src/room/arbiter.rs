//! Decides which side of a pair sends the initial offer.
//!
//! Both participants evaluate the same pure comparison, so exactly one of
//! them offers and no coordination message is needed.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the offer.
    Initiator,
    /// Only ever answers.
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

/// `local` initiates iff it sorts before `remote`.
pub fn role(local: &str, remote: &str) -> Role {
    if local < remote {
        Role::Initiator
    } else {
        Role::Responder
    }
}

pub fn is_initiator(local: &str, remote: &str) -> bool {
    role(local, remote) == Role::Initiator
}
