use thiserror::Error;

use crate::domain::devis::DevisStatut;
use crate::domain::facture::FactureStatut;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid devis transition from {from:?} to {to:?}")]
    InvalidDevisTransition { from: DevisStatut, to: DevisStatut },
    #[error("invalid facture transition from {from:?} to {to:?}")]
    InvalidFactureTransition { from: FactureStatut, to: FactureStatut },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
