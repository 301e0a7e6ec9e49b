pub mod billing;
pub mod config;
pub mod domain;
pub mod errors;

pub use billing::numbering::{numero_secours, numero_sequentiel};
pub use billing::resolver::{
    resoudre_montant, somme_acomptes, AvertissementFacturation, FactureAnterieure,
    ResolutionError, ResolutionMontant,
};
pub use billing::totals::{totaux_devis, TotauxDevis};
pub use domain::client::{Client, ClientId, Contact, ContactId, Opportunite, OpportuniteId};
pub use domain::devis::{Devis, DevisId, DevisLigne, DevisStatut, LigneId, ServiceId};
pub use domain::entreprise::ProfilEntreprise;
pub use domain::facture::{
    montant_ttc, taux_ou_defaut, ArtefactStatut, Facture, FactureId, FactureStatut, TypeFacture,
};
pub use errors::DomainError;
