use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::client::{ClientId, ContactId};
use crate::domain::devis::DevisId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactureId(pub String);

/// Invoicing mode for a devis: full amount in one invoice, a deposit, or the
/// remaining balance after deposits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFacture {
    Unique,
    Acompte,
    Solde,
}

impl TypeFacture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::Acompte => "acompte",
            Self::Solde => "solde",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unique" => Some(Self::Unique),
            "acompte" => Some(Self::Acompte),
            "solde" => Some(Self::Solde),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactureStatut {
    Brouillon,
    Envoyee,
    Payee,
    EnRetard,
    Annulee,
}

impl FactureStatut {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brouillon => "brouillon",
            Self::Envoyee => "envoyee",
            Self::Payee => "payee",
            Self::EnRetard => "en_retard",
            Self::Annulee => "annulee",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "brouillon" => Some(Self::Brouillon),
            "envoyee" => Some(Self::Envoyee),
            "payee" => Some(Self::Payee),
            "en_retard" => Some(Self::EnRetard),
            "annulee" => Some(Self::Annulee),
            _ => None,
        }
    }
}

/// Storage outcome of the generated PDF.
///
/// An invoice row exists before (and possibly without) its stored artifact;
/// the variant makes that partial state queryable instead of inferring it
/// from a missing URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtefactStatut {
    EnAttente,
    Stocke,
    Echec,
}

impl ArtefactStatut {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnAttente => "en_attente",
            Self::Stocke => "stocke",
            Self::Echec => "echec",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en_attente" => Some(Self::EnAttente),
            "stocke" => Some(Self::Stocke),
            "echec" => Some(Self::Echec),
            _ => None,
        }
    }
}

/// VAT rate actually applied when computing TTC amounts.
///
/// `None` means the rate was never set and falls back to 20%. A present 0%
/// is a genuine zero rate and is honored as such.
pub fn taux_ou_defaut(taux_tva: Option<Decimal>) -> Decimal {
    taux_tva.unwrap_or_else(|| Decimal::from(20))
}

/// `montant_ht * (1 + taux/100)` with the default-rate rule above.
pub fn montant_ttc(montant_ht: Decimal, taux_tva: Option<Decimal>) -> Decimal {
    montant_ht + montant_ht * taux_ou_defaut(taux_tva) / Decimal::ONE_HUNDRED
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Facture {
    pub id: FactureId,
    pub numero: String,
    pub devis_id: DevisId,
    pub client_id: ClientId,
    pub contact_id: Option<ContactId>,
    pub statut: FactureStatut,
    pub type_facture: TypeFacture,
    pub montant_ht: Decimal,
    pub taux_tva: Option<Decimal>,
    pub date_emission: NaiveDate,
    pub date_echeance: NaiveDate,
    pub date_paiement: Option<NaiveDate>,
    pub pourcentage_acompte: Option<Decimal>,
    pub facture_parent_id: Option<FactureId>,
    /// Snapshot of the devis total HT at generation time; later balance
    /// computations read this, not the live devis.
    pub montant_total_projet: Option<Decimal>,
    pub niveau_relance: i64,
    pub niveau_relance_envoye: i64,
    pub date_derniere_relance: Option<DateTime<Utc>>,
    pub pdf_url: Option<String>,
    pub artefact_statut: ArtefactStatut,
    pub created_at: DateTime<Utc>,
}

impl Facture {
    pub fn montant_tva(&self) -> Decimal {
        self.montant_ht * taux_ou_defaut(self.taux_tva) / Decimal::ONE_HUNDRED
    }

    pub fn montant_ttc(&self) -> Decimal {
        montant_ttc(self.montant_ht, self.taux_tva)
    }

    pub fn can_transition_to(&self, next: FactureStatut) -> bool {
        matches!(
            (self.statut, next),
            (FactureStatut::Brouillon, FactureStatut::Envoyee)
                | (FactureStatut::Envoyee, FactureStatut::Payee)
                | (FactureStatut::Envoyee, FactureStatut::EnRetard)
                | (FactureStatut::EnRetard, FactureStatut::Payee)
                | (FactureStatut::Brouillon, FactureStatut::Annulee)
                | (FactureStatut::Envoyee, FactureStatut::Annulee)
                | (FactureStatut::EnRetard, FactureStatut::Annulee)
        )
    }

    pub fn transition_to(&mut self, next: FactureStatut) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.statut = next;
            return Ok(());
        }

        Err(DomainError::InvalidFactureTransition { from: self.statut, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{montant_ttc, ArtefactStatut, Facture, FactureId, FactureStatut, TypeFacture};
    use crate::domain::client::ClientId;
    use crate::domain::devis::DevisId;

    fn facture(statut: FactureStatut) -> Facture {
        Facture {
            id: FactureId("F-1".to_string()),
            numero: "FAC-2026-0001".to_string(),
            devis_id: DevisId("D-1".to_string()),
            client_id: ClientId("C-1".to_string()),
            contact_id: None,
            statut,
            type_facture: TypeFacture::Unique,
            montant_ht: Decimal::from(1000),
            taux_tva: None,
            date_emission: NaiveDate::from_ymd_opt(2026, 8, 5).unwrap(),
            date_echeance: NaiveDate::from_ymd_opt(2026, 9, 4).unwrap(),
            date_paiement: None,
            pourcentage_acompte: None,
            facture_parent_id: None,
            montant_total_projet: None,
            niveau_relance: 0,
            niveau_relance_envoye: 0,
            date_derniere_relance: None,
            pdf_url: None,
            artefact_statut: ArtefactStatut::EnAttente,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ttc_defaults_to_twenty_percent_when_rate_is_absent() {
        assert_eq!(montant_ttc(Decimal::from(1000), None), Decimal::from(1200));
    }

    #[test]
    fn ttc_honors_an_explicit_zero_rate() {
        assert_eq!(montant_ttc(Decimal::from(1000), Some(Decimal::ZERO)), Decimal::from(1000));
    }

    #[test]
    fn ttc_applies_a_present_rate() {
        let ttc = montant_ttc(Decimal::from(200), Some(Decimal::from(10)));
        assert_eq!(ttc, Decimal::from(220));
    }

    #[test]
    fn draft_invoice_can_be_sent_then_paid() {
        let mut facture = facture(FactureStatut::Brouillon);
        facture.transition_to(FactureStatut::Envoyee).expect("brouillon -> envoyee");
        facture.transition_to(FactureStatut::Payee).expect("envoyee -> payee");
        assert_eq!(facture.statut, FactureStatut::Payee);
    }

    #[test]
    fn overdue_invoice_can_still_be_paid() {
        let mut facture = facture(FactureStatut::EnRetard);
        facture.transition_to(FactureStatut::Payee).expect("en_retard -> payee");
        assert_eq!(facture.statut, FactureStatut::Payee);
    }

    #[test]
    fn paid_invoice_cannot_be_cancelled() {
        let mut facture = facture(FactureStatut::Payee);
        assert!(facture.transition_to(FactureStatut::Annulee).is_err());
    }

    #[test]
    fn draft_cannot_jump_straight_to_paid() {
        let mut facture = facture(FactureStatut::Brouillon);
        assert!(facture.transition_to(FactureStatut::Payee).is_err());
    }
}
