use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use facturo_core::billing::totals::TotauxDevis;
use facturo_core::domain::client::{Client, ClientId, Contact, ContactId, Opportunite, OpportuniteId};
use facturo_core::domain::devis::{Devis, DevisId, DevisLigne};
use facturo_core::domain::entreprise::ProfilEntreprise;
use facturo_core::domain::facture::{
    ArtefactStatut, Facture, FactureId, FactureStatut, TypeFacture,
};

pub mod devis;
pub mod entreprise;
pub mod facture;

pub use devis::SqlDevisRepository;
pub use entreprise::SqlEntrepriseRepository;
pub use facture::SqlFactureRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Devis joined with the opportunité/client/contact display data invoice
/// generation needs.
#[derive(Clone, Debug)]
pub struct ContexteDevis {
    pub devis: Devis,
    pub opportunite: Opportunite,
    pub client: Client,
    pub contact: Option<Contact>,
}

/// A billable line with its catalog service denormalized in.
#[derive(Clone, Debug)]
pub struct LigneFacturable {
    pub ligne: DevisLigne,
    pub service_nom: Option<String>,
    pub service_categorie: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NouvelleFacture {
    pub id: FactureId,
    pub numero: String,
    pub devis_id: DevisId,
    pub client_id: ClientId,
    pub contact_id: Option<ContactId>,
    pub type_facture: TypeFacture,
    pub montant_ht: Decimal,
    pub taux_tva: Option<Decimal>,
    pub date_emission: NaiveDate,
    pub date_echeance: NaiveDate,
    pub pourcentage_acompte: Option<Decimal>,
    pub facture_parent_id: Option<FactureId>,
    pub montant_total_projet: Option<Decimal>,
}

/// How the devis back-link is written when a facture is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeLiaison {
    /// Single-invoice conversion: conditional on `facture_id IS NULL`, so a
    /// raced duplicate rolls the whole insert back.
    Exclusive,
    /// Acompte/solde chain: the devis always points at the latest facture.
    Chainee,
}

#[derive(Debug, Error)]
pub enum CreationFactureError {
    #[error("devis `{0}` is already converted to a facture")]
    DevisDejaConverti(String),
    #[error("devis `{0}` not found while linking the facture")]
    DevisIntrouvable(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone, Debug, Default)]
pub struct FiltreFactures {
    pub statut: Option<FactureStatut>,
    pub devis_id: Option<DevisId>,
}

#[async_trait]
pub trait DevisRepository: Send + Sync {
    async fn contexte_facturation(
        &self,
        id: &DevisId,
    ) -> Result<Option<ContexteDevis>, RepositoryError>;

    async fn lignes_facturables(
        &self,
        opportunite_id: &OpportuniteId,
    ) -> Result<Vec<LigneFacturable>, RepositoryError>;

    async fn enregistrer_totaux(
        &self,
        id: &DevisId,
        totaux: &TotauxDevis,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait FactureRepository: Send + Sync {
    /// Insert the facture and write the devis back-link in one transaction.
    async fn creer(
        &self,
        nouvelle: NouvelleFacture,
        liaison: ModeLiaison,
    ) -> Result<Facture, CreationFactureError>;

    async fn trouver(&self, id: &FactureId) -> Result<Option<Facture>, RepositoryError>;

    async fn lister(&self, filtre: &FiltreFactures) -> Result<Vec<Facture>, RepositoryError>;

    /// Factures already issued against a devis, in creation order.
    async fn pour_devis(&self, devis_id: &DevisId) -> Result<Vec<Facture>, RepositoryError>;

    /// Database-side sequential numbering (atomic upsert on
    /// `facture_sequences`).
    async fn prochain_numero(&self, annee: i32) -> Result<String, RepositoryError>;

    async fn enregistrer_artefact(
        &self,
        id: &FactureId,
        statut: ArtefactStatut,
        pdf_url: Option<&str>,
    ) -> Result<(), RepositoryError>;

    async fn mettre_a_jour_statut(
        &self,
        id: &FactureId,
        statut: FactureStatut,
        date_paiement: Option<NaiveDate>,
    ) -> Result<(), RepositoryError>;

    async fn enregistrer_relance(&self, id: &FactureId) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EntrepriseRepository: Send + Sync {
    async fn profil(&self) -> Result<Option<ProfilEntreprise>, RepositoryError>;
    async fn enregistrer(&self, profil: &ProfilEntreprise) -> Result<(), RepositoryError>;
}

pub(crate) fn decode_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal value for `{field}`: {error}"))
    })
}

pub(crate) fn decode_decimal_opt(
    field: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value.map(|raw| decode_decimal(field, &raw)).transpose()
}

pub(crate) fn decode_date(field: &str, value: &str) -> Result<NaiveDate, RepositoryError> {
    value.parse::<NaiveDate>().map_err(|error| {
        RepositoryError::Decode(format!("invalid date value for `{field}`: {error}"))
    })
}

pub(crate) fn decode_date_opt(
    field: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value.map(|raw| decode_date(field, &raw)).transpose()
}

pub(crate) fn decode_datetime(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|parsed| parsed.with_timezone(&Utc)).map_err(|error| {
        RepositoryError::Decode(format!("invalid timestamp value for `{field}`: {error}"))
    })
}

pub(crate) fn decode_datetime_opt(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|raw| decode_datetime(field, &raw)).transpose()
}
