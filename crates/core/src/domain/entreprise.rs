use serde::{Deserialize, Serialize};

/// Issuing-company profile rendered on invoice documents.
///
/// Every field is optional: invoice generation must succeed with a blank
/// profile when settings were never filled in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilEntreprise {
    pub nom: Option<String>,
    pub forme_juridique: Option<String>,
    pub siret: Option<String>,
    pub tva_intracommunautaire: Option<String>,
    pub adresse: Option<String>,
    pub ville: Option<String>,
    pub code_postal: Option<String>,
    pub iban: Option<String>,
    pub bic: Option<String>,
    pub couleur: Option<String>,
    pub logo_url: Option<String>,
    pub conditions_paiement: Option<String>,
}
