use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::{ClientId, ContactId, OpportuniteId};
use crate::domain::facture::FactureId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevisId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LigneId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevisStatut {
    Brouillon,
    Envoye,
    Accepte,
    Refuse,
    Expire,
}

impl DevisStatut {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brouillon => "brouillon",
            Self::Envoye => "envoye",
            Self::Accepte => "accepte",
            Self::Refuse => "refuse",
            Self::Expire => "expire",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "brouillon" => Some(Self::Brouillon),
            "envoye" => Some(Self::Envoye),
            "accepte" => Some(Self::Accepte),
            "refuse" => Some(Self::Refuse),
            "expire" => Some(Self::Expire),
            _ => None,
        }
    }
}

/// Clamp a discount percentage into `[0, 100]`.
///
/// Applied at every entry point (construction and row decode); a discount of
/// 150 is truncated to 100 and zeroes the line.
pub fn clamp_remise(remise: Decimal) -> Decimal {
    remise.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
}

/// One billable line of a devis.
///
/// Lines are stored on the opportunité (schema indirection inherited from the
/// CRM), but always priced and rendered in the context of a devis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DevisLigne {
    pub id: LigneId,
    pub service_id: Option<ServiceId>,
    pub description: String,
    pub quantite: Decimal,
    pub prix_unitaire: Decimal,
    pub remise_pourcent: Decimal,
    pub position: Option<i64>,
}

impl DevisLigne {
    pub fn new(
        id: LigneId,
        service_id: Option<ServiceId>,
        description: String,
        quantite: Decimal,
        prix_unitaire: Decimal,
        remise_pourcent: Decimal,
    ) -> Self {
        Self {
            id,
            service_id,
            description,
            quantite,
            prix_unitaire,
            remise_pourcent: clamp_remise(remise_pourcent),
            position: None,
        }
    }

    /// Line total excluding VAT: `quantite * prix_unitaire * (1 - remise/100)`.
    ///
    /// The raw product is kept unrounded; rounding to 2 decimals happens only
    /// at display time.
    pub fn total_ht(&self) -> Decimal {
        let remise = clamp_remise(self.remise_pourcent);
        self.quantite * self.prix_unitaire * (Decimal::ONE - remise / Decimal::ONE_HUNDRED)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Devis {
    pub id: DevisId,
    pub numero: String,
    pub opportunite_id: OpportuniteId,
    pub client_id: ClientId,
    pub contact_id: Option<ContactId>,
    pub statut: DevisStatut,
    pub taux_tva: Option<Decimal>,
    pub conditions_paiement: Option<String>,
    pub date_validite: Option<NaiveDate>,
    // Persisted totals are a snapshot taken at save or generation time and
    // can diverge from the live lines afterwards.
    pub total_ht: Decimal,
    pub tva: Decimal,
    pub total_ttc: Decimal,
    pub facture_id: Option<FactureId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Devis {
    /// A devis carrying a facture back-link is considered converted and no
    /// longer eligible for single-invoice generation.
    pub fn est_converti(&self) -> bool {
        self.facture_id.is_some()
    }

    pub fn can_transition_to(&self, next: DevisStatut) -> bool {
        matches!(
            (self.statut, next),
            (DevisStatut::Brouillon, DevisStatut::Envoye)
                | (DevisStatut::Brouillon, DevisStatut::Accepte)
                | (DevisStatut::Envoye, DevisStatut::Accepte)
                | (DevisStatut::Envoye, DevisStatut::Refuse)
                | (DevisStatut::Envoye, DevisStatut::Expire)
        )
    }

    pub fn transition_to(&mut self, next: DevisStatut) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.statut = next;
            return Ok(());
        }

        Err(DomainError::InvalidDevisTransition { from: self.statut, to: next })
    }
}
