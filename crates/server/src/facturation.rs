//! Invoice generation and management endpoints.
//!
//! - `POST /api/v1/factures/generer` — convert a devis into a facture
//!   (unique / acompte / solde) and return the PDF bytes
//! - `GET  /api/v1/factures` — list factures, filterable by statut/devis
//! - `GET  /api/v1/factures/{id}` — facture detail
//! - `POST /api/v1/factures/{id}/statut` — lifecycle transition
//! - `POST /api/v1/factures/{id}/relance` — reminder tracking
//!
//! Generation runs the whole pipeline in order: load + conflict checks,
//! amount resolution, numbering (with a random fallback), HTML render, PDF
//! conversion, then a single transaction persisting the facture and the
//! devis back-link. The artifact upload happens after the commit and never
//! fails the request.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use facturo_core::billing::numbering::numero_secours;
use facturo_core::billing::resolver::{
    pourcentage_restant, resoudre_montant, somme_acomptes, AvertissementFacturation,
    FactureAnterieure, ResolutionError, ResolutionMontant,
};
use facturo_core::billing::totals::{totaux_devis, TotauxDevis};
use facturo_core::domain::client::Contact;
use facturo_core::domain::devis::{clamp_remise, DevisId};
use facturo_core::domain::entreprise::ProfilEntreprise;
use facturo_core::domain::facture::{
    taux_ou_defaut, ArtefactStatut, Facture, FactureId, FactureStatut, TypeFacture,
};
use facturo_db::repositories::{
    ContexteDevis, CreationFactureError, DevisRepository, EntrepriseRepository, FactureRepository,
    FiltreFactures, LigneFacturable, ModeLiaison, NouvelleFacture, RepositoryError,
    SqlDevisRepository, SqlEntrepriseRepository, SqlFactureRepository,
};
use facturo_db::DbPool;

use crate::pdf::{DocumentRenderer, FactureRenderer, PdfError};
use crate::storage::ArtefactStorage;

const CONDITIONS_PAIEMENT_DEFAUT: &str = "Paiement a 30 jours";
const ECHEANCE_JOURS: i64 = 30;

pub const HEADER_FACTURE_ID: &str = "x-facture-id";
pub const HEADER_FACTURE_NUMERO: &str = "x-facture-numero";

#[derive(Clone)]
pub struct FacturationState {
    devis: Arc<dyn DevisRepository>,
    factures: Arc<dyn FactureRepository>,
    entreprise: Arc<dyn EntrepriseRepository>,
    renderer: Arc<FactureRenderer>,
    convertisseur: Arc<dyn DocumentRenderer>,
    stockage: Option<Arc<dyn ArtefactStorage>>,
}

pub fn router(
    db_pool: DbPool,
    renderer: Arc<FactureRenderer>,
    convertisseur: Arc<dyn DocumentRenderer>,
    stockage: Option<Arc<dyn ArtefactStorage>>,
) -> Router {
    let state = FacturationState {
        devis: Arc::new(SqlDevisRepository::new(db_pool.clone())),
        factures: Arc::new(SqlFactureRepository::new(db_pool.clone())),
        entreprise: Arc::new(SqlEntrepriseRepository::new(db_pool)),
        renderer,
        convertisseur,
        stockage,
    };

    Router::new()
        .route("/api/v1/factures/generer", post(generer_facture))
        .route("/api/v1/factures", get(lister_factures))
        .route("/api/v1/factures/{id}", get(detail_facture))
        .route("/api/v1/factures/{id}/statut", post(changer_statut))
        .route("/api/v1/factures/{id}/relance", post(declencher_relance))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub devis_id: String,
    #[serde(default)]
    pub type_facture: Option<String>,
    #[serde(default)]
    pub pourcentage_acompte: Option<Decimal>,
    #[serde(default)]
    pub facture_parent_id: Option<String>,
    #[serde(default)]
    pub montant_total_projet: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangementStatutRequest {
    pub statut: String,
    #[serde(default)]
    pub date_paiement: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListeFacturesQuery {
    #[serde(default)]
    pub statut: Option<String>,
    #[serde(default)]
    pub devis_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FactureReponse {
    pub id: String,
    pub numero: String,
    pub devis_id: String,
    pub client_id: String,
    pub contact_id: Option<String>,
    pub statut: String,
    pub type_facture: String,
    #[serde(rename = "montantHT")]
    pub montant_ht: Decimal,
    pub taux_tva: Option<Decimal>,
    #[serde(rename = "montantTTC")]
    pub montant_ttc: Decimal,
    pub date_emission: String,
    pub date_echeance: String,
    pub date_paiement: Option<String>,
    pub pourcentage_acompte: Option<Decimal>,
    pub facture_parent_id: Option<String>,
    pub montant_total_projet: Option<Decimal>,
    pub niveau_relance: i64,
    pub pdf_url: Option<String>,
    pub artefact_statut: String,
}

impl From<&Facture> for FactureReponse {
    fn from(facture: &Facture) -> Self {
        Self {
            id: facture.id.0.clone(),
            numero: facture.numero.clone(),
            devis_id: facture.devis_id.0.clone(),
            client_id: facture.client_id.0.clone(),
            contact_id: facture.contact_id.as_ref().map(|contact| contact.0.clone()),
            statut: facture.statut.as_str().to_string(),
            type_facture: facture.type_facture.as_str().to_string(),
            montant_ht: facture.montant_ht,
            taux_tva: facture.taux_tva,
            montant_ttc: facture.montant_ttc(),
            date_emission: facture.date_emission.to_string(),
            date_echeance: facture.date_echeance.to_string(),
            date_paiement: facture.date_paiement.map(|date| date.to_string()),
            pourcentage_acompte: facture.pourcentage_acompte,
            facture_parent_id: facture.facture_parent_id.as_ref().map(|parent| parent.0.clone()),
            montant_total_projet: facture.montant_total_projet,
            niveau_relance: facture.niveau_relance,
            pdf_url: facture.pdf_url.clone(),
            artefact_statut: facture.artefact_statut.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.into() }))
}

fn not_found(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::NOT_FOUND, Json(ApiError { error: message.into() }))
}

fn internal(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: message.into() }))
}

fn repository_error(error: RepositoryError) -> (StatusCode, Json<ApiError>) {
    error!(error = %error, "facturation repository error");
    internal("an internal repository error occurred")
}

fn rendering_error(error: PdfError) -> (StatusCode, Json<ApiError>) {
    error!(error = %error, "invoice document rendering failed");
    internal(format!("document rendering failed: {error}"))
}

// ---------------------------------------------------------------------------
// Generation orchestrator
// ---------------------------------------------------------------------------

async fn generer_facture(
    State(state): State<FacturationState>,
    Json(payload): Json<GenerationRequest>,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let correlation_id = Uuid::new_v4().simple().to_string();

    if payload.devis_id.trim().is_empty() {
        return Err(bad_request("devisId is required"));
    }
    let type_facture = match payload.type_facture.as_deref() {
        None => TypeFacture::Unique,
        Some(raw) => TypeFacture::parse(raw)
            .ok_or_else(|| bad_request(format!("unknown typeFacture `{raw}`")))?,
    };
    let pourcentage_acompte = payload.pourcentage_acompte.map(clamp_remise);

    // Devis with its opportunité/client/contact display data.
    let contexte = state
        .devis
        .contexte_facturation(&DevisId(payload.devis_id.clone()))
        .await
        .map_err(repository_error)?
        .ok_or_else(|| not_found(format!("devis `{}` not found", payload.devis_id)))?;
    let devis = &contexte.devis;

    // Billable lines come from the opportunité, freshly totalled; the caller
    // may pin the project total it negotiated against instead.
    let lignes = state
        .devis
        .lignes_facturables(&devis.opportunite_id)
        .await
        .map_err(repository_error)?;
    let totaux = totaux_devis(
        &lignes.iter().map(|ligne| ligne.ligne.clone()).collect::<Vec<_>>(),
        devis.taux_tva,
    );
    let total_projet = payload.montant_total_projet.unwrap_or(totaux.total_ht);

    let existantes = state.factures.pour_devis(&devis.id).await.map_err(repository_error)?;
    let anterieures: Vec<FactureAnterieure> = existantes
        .iter()
        .map(|facture| FactureAnterieure {
            id: facture.id.clone(),
            type_facture: facture.type_facture,
            montant_ht: facture.montant_ht,
            statut: facture.statut,
        })
        .collect();
    let deja_facture = somme_acomptes(&anterieures);

    let resolution = resoudre_montant(
        total_projet,
        devis.taux_tva,
        type_facture,
        pourcentage_acompte,
        devis.est_converti(),
        &anterieures,
    )
    .map_err(|error| match error {
        ResolutionError::DevisDejaConverti => {
            bad_request(format!("devis `{}` is already converted to a facture", devis.id.0))
        }
        ResolutionError::PourcentageManquant => {
            bad_request("pourcentageAcompte is required for an acompte facture")
        }
        ResolutionError::CumulAcomptesDepasse { .. } => bad_request(error.to_string()),
    })?;

    for avertissement in &resolution.avertissements {
        let AvertissementFacturation::AcompteEleve { pourcentage } = avertissement;
        warn!(
            event_name = "facturation.acompte_eleve",
            correlation_id = %correlation_id,
            devis_id = %devis.id.0,
            pourcentage = %pourcentage,
            "acompte percentage above the usual range"
        );
    }

    if type_facture == TypeFacture::Acompte {
        let restant = total_projet - deja_facture - resolution.montant_ht;
        info!(
            event_name = "facturation.acompte_resolu",
            correlation_id = %correlation_id,
            devis_id = %devis.id.0,
            montant_ht = %resolution.montant_ht,
            restant_pourcent = %pourcentage_restant(restant, total_projet),
            "acompte amount resolved"
        );
    }

    let facture_parent_id = payload
        .facture_parent_id
        .clone()
        .map(FactureId)
        .or_else(|| resolution.facture_parent_id.clone());

    // Company profile is optional; generation proceeds with blank fields.
    let profil = state.entreprise.profil().await.map_err(repository_error)?.unwrap_or_default();
    let conditions_paiement = devis
        .conditions_paiement
        .clone()
        .or_else(|| profil.conditions_paiement.clone())
        .unwrap_or_else(|| CONDITIONS_PAIEMENT_DEFAUT.to_string());

    // Sequential number, or a random same-shape number when the sequence
    // fails (availability over strict sequentiality).
    let aujourd_hui = Utc::now().date_naive();
    let annee = aujourd_hui.year();
    let numero = match state.factures.prochain_numero(annee).await {
        Ok(numero) => numero,
        Err(erreur) => {
            let secours = numero_secours(annee);
            warn!(
                event_name = "facturation.numerotation_secours",
                correlation_id = %correlation_id,
                devis_id = %devis.id.0,
                error = %erreur,
                numero = %secours,
                "sequence numbering failed, falling back to a random number"
            );
            secours
        }
    };
    let date_echeance = aujourd_hui + Duration::days(ECHEANCE_JOURS);

    // Render then convert before touching persisted state: a failure here
    // must leave nothing behind.
    let donnees = donnees_rendu(
        &profil,
        &contexte,
        &lignes,
        &totaux,
        &numero,
        type_facture,
        &resolution,
        pourcentage_acompte,
        total_projet,
        deja_facture,
        &conditions_paiement,
        aujourd_hui,
        date_echeance,
    );
    let html = state.renderer.render_facture(&donnees).map_err(rendering_error)?;
    let pdf_bytes = state.convertisseur.html_to_pdf(&html).await.map_err(rendering_error)?;

    // Facture insert + devis back-link in one transaction; unique conversion
    // is conditional on the link still being free.
    let liaison = match type_facture {
        TypeFacture::Unique => ModeLiaison::Exclusive,
        TypeFacture::Acompte | TypeFacture::Solde => ModeLiaison::Chainee,
    };
    let facture = state
        .factures
        .creer(
            NouvelleFacture {
                id: FactureId(format!("FCT-{}", Uuid::new_v4().simple())),
                numero,
                devis_id: devis.id.clone(),
                client_id: devis.client_id.clone(),
                contact_id: devis
                    .contact_id
                    .clone()
                    .or_else(|| contexte.contact.as_ref().map(|contact| contact.id.clone())),
                type_facture,
                montant_ht: resolution.montant_ht,
                taux_tva: devis.taux_tva,
                date_emission: aujourd_hui,
                date_echeance,
                pourcentage_acompte: match type_facture {
                    TypeFacture::Acompte => pourcentage_acompte,
                    _ => None,
                },
                facture_parent_id,
                montant_total_projet: Some(total_projet),
            },
            liaison,
        )
        .await
        .map_err(|error| match error {
            CreationFactureError::DevisDejaConverti(id) => {
                bad_request(format!("devis `{id}` is already converted to a facture"))
            }
            CreationFactureError::DevisIntrouvable(id) => not_found(format!("devis `{id}` not found")),
            CreationFactureError::Repository(error) => repository_error(error),
        })?;

    // Refresh the persisted totals snapshot; divergence is tolerated, so a
    // failure here only warns.
    if let Err(erreur) = state.devis.enregistrer_totaux(&devis.id, &totaux).await {
        warn!(
            event_name = "facturation.totaux_non_enregistres",
            correlation_id = %correlation_id,
            devis_id = %devis.id.0,
            error = %erreur,
            "failed to refresh the devis totals snapshot"
        );
    }

    televerser_artefact(&state, &correlation_id, &facture, pdf_bytes.clone()).await;

    info!(
        event_name = "facturation.generee",
        correlation_id = %correlation_id,
        devis_id = %devis.id.0,
        facture_id = %facture.id.0,
        numero = %facture.numero,
        type_facture = facture.type_facture.as_str(),
        montant_ht = %facture.montant_ht,
        "facture generated"
    );

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.pdf\"", facture.numero),
        )
        .header(HEADER_FACTURE_ID, facture.id.0.clone())
        .header(HEADER_FACTURE_NUMERO, facture.numero.clone())
        .body(Body::from(pdf_bytes))
        .map_err(|error| internal(format!("failed to build response: {error}")))?;

    Ok(response)
}

/// Post-commit artifact upload. Success records the public URL, failure is
/// logged and recorded as `echec`; either way the request keeps its PDF.
async fn televerser_artefact(
    state: &FacturationState,
    correlation_id: &str,
    facture: &Facture,
    pdf_bytes: Vec<u8>,
) {
    let Some(stockage) = &state.stockage else {
        info!(
            event_name = "facturation.stockage_desactive",
            correlation_id = %correlation_id,
            facture_id = %facture.id.0,
            "artifact storage disabled, PDF returned in the response only"
        );
        return;
    };

    let cle = format!("{}.pdf", facture.id.0);
    let issue = match stockage.upload(&cle, pdf_bytes).await {
        Ok(url) => {
            info!(
                event_name = "facturation.artefact_stocke",
                correlation_id = %correlation_id,
                facture_id = %facture.id.0,
                url = %url,
                "invoice PDF stored"
            );
            (ArtefactStatut::Stocke, Some(url))
        }
        Err(erreur) => {
            error!(
                event_name = "facturation.artefact_echec",
                correlation_id = %correlation_id,
                facture_id = %facture.id.0,
                error = %erreur,
                "invoice PDF upload failed, facture kept without artifact"
            );
            (ArtefactStatut::Echec, None)
        }
    };

    if let Err(erreur) =
        state.factures.enregistrer_artefact(&facture.id, issue.0, issue.1.as_deref()).await
    {
        warn!(
            event_name = "facturation.artefact_non_enregistre",
            correlation_id = %correlation_id,
            facture_id = %facture.id.0,
            error = %erreur,
            "failed to record the artifact outcome"
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn donnees_rendu(
    profil: &ProfilEntreprise,
    contexte: &ContexteDevis,
    lignes: &[LigneFacturable],
    totaux: &TotauxDevis,
    numero: &str,
    type_facture: TypeFacture,
    resolution: &ResolutionMontant,
    pourcentage_acompte: Option<Decimal>,
    total_projet: Decimal,
    deja_facture: Decimal,
    conditions_paiement: &str,
    date_emission: NaiveDate,
    date_echeance: NaiveDate,
) -> serde_json::Value {
    let type_libelle = match type_facture {
        TypeFacture::Unique => "Facture".to_string(),
        TypeFacture::Acompte => match pourcentage_acompte {
            Some(pourcentage) => format!("Facture d'acompte ({pourcentage} %)"),
            None => "Facture d'acompte".to_string(),
        },
        TypeFacture::Solde => "Facture de solde".to_string(),
    };

    let lignes_json: Vec<serde_json::Value> = lignes
        .iter()
        .map(|ligne| {
            serde_json::json!({
                "description": ligne.ligne.description,
                "quantite": ligne.ligne.quantite.to_string(),
                "prix_unitaire": ligne.ligne.prix_unitaire.to_string(),
                "remise_pourcent": ligne.ligne.remise_pourcent.to_string(),
                "total_ht": ligne.ligne.total_ht().to_string(),
                "service_categorie": ligne.service_categorie,
            })
        })
        .collect();

    let contact_json = contexte
        .contact
        .as_ref()
        .map(|contact: &Contact| {
            serde_json::json!({
                "nom_complet": contact.nom_complet(),
                "email": contact.email,
                "fonction": contact.fonction,
            })
        })
        .unwrap_or(serde_json::Value::Null);

    serde_json::json!({
        "facture": {
            "numero": numero,
            "type_facture": type_facture.as_str(),
            "type_libelle": type_libelle,
            "date_emission": date_emission.format("%d/%m/%Y").to_string(),
            "date_echeance": date_echeance.format("%d/%m/%Y").to_string(),
            "conditions_paiement": conditions_paiement,
            "montant_ht": resolution.montant_ht.to_string(),
            "montant_tva": resolution.montant_tva.to_string(),
            "montant_ttc": resolution.montant_ttc.to_string(),
            "pourcentage_acompte": pourcentage_acompte.map(|pct| pct.to_string()),
            "montant_total_projet": total_projet.to_string(),
            "deja_facture": deja_facture.to_string(),
        },
        "devis": { "numero": contexte.devis.numero },
        "entreprise": profil,
        "client": contexte.client,
        "contact": contact_json,
        "lignes": lignes_json,
        "totaux": {
            "total_ht": totaux.total_ht.to_string(),
            "tva": totaux.tva.to_string(),
            "total_ttc": totaux.total_ttc.to_string(),
            "taux_tva": taux_ou_defaut(contexte.devis.taux_tva).to_string(),
        },
        "couleur": profil.couleur.clone().unwrap_or_else(|| "#1d4ed8".to_string()),
    })
}

// ---------------------------------------------------------------------------
// Management handlers
// ---------------------------------------------------------------------------

async fn lister_factures(
    State(state): State<FacturationState>,
    Query(query): Query<ListeFacturesQuery>,
) -> Result<Json<Vec<FactureReponse>>, (StatusCode, Json<ApiError>)> {
    let statut = query
        .statut
        .as_deref()
        .map(|raw| {
            FactureStatut::parse(raw).ok_or_else(|| bad_request(format!("unknown statut `{raw}`")))
        })
        .transpose()?;

    let filtre =
        FiltreFactures { statut, devis_id: query.devis_id.map(DevisId) };
    let factures = state.factures.lister(&filtre).await.map_err(repository_error)?;

    Ok(Json(factures.iter().map(FactureReponse::from).collect()))
}

async fn detail_facture(
    Path(id): Path<String>,
    State(state): State<FacturationState>,
) -> Result<Json<FactureReponse>, (StatusCode, Json<ApiError>)> {
    let facture = state
        .factures
        .trouver(&FactureId(id.clone()))
        .await
        .map_err(repository_error)?
        .ok_or_else(|| not_found(format!("facture `{id}` not found")))?;

    Ok(Json(FactureReponse::from(&facture)))
}

async fn changer_statut(
    Path(id): Path<String>,
    State(state): State<FacturationState>,
    Json(payload): Json<ChangementStatutRequest>,
) -> Result<Json<FactureReponse>, (StatusCode, Json<ApiError>)> {
    let statut = FactureStatut::parse(&payload.statut)
        .ok_or_else(|| bad_request(format!("unknown statut `{}`", payload.statut)))?;

    let facture_id = FactureId(id.clone());
    let facture = state
        .factures
        .trouver(&facture_id)
        .await
        .map_err(repository_error)?
        .ok_or_else(|| not_found(format!("facture `{id}` not found")))?;

    if !facture.can_transition_to(statut) {
        return Err(bad_request(format!(
            "invalid facture transition from `{}` to `{}`",
            facture.statut.as_str(),
            statut.as_str()
        )));
    }

    let date_paiement = match statut {
        FactureStatut::Payee => {
            Some(payload.date_paiement.unwrap_or_else(|| Utc::now().date_naive()))
        }
        _ => None,
    };

    state
        .factures
        .mettre_a_jour_statut(&facture_id, statut, date_paiement)
        .await
        .map_err(repository_error)?;

    info!(
        event_name = "facturation.statut_change",
        facture_id = %facture_id.0,
        de = facture.statut.as_str(),
        vers = statut.as_str(),
        "facture status updated"
    );

    let facture = state
        .factures
        .trouver(&facture_id)
        .await
        .map_err(repository_error)?
        .ok_or_else(|| internal("facture vanished during status update"))?;

    Ok(Json(FactureReponse::from(&facture)))
}

async fn declencher_relance(
    Path(id): Path<String>,
    State(state): State<FacturationState>,
) -> Result<Json<FactureReponse>, (StatusCode, Json<ApiError>)> {
    let facture_id = FactureId(id.clone());
    let facture = state
        .factures
        .trouver(&facture_id)
        .await
        .map_err(repository_error)?
        .ok_or_else(|| not_found(format!("facture `{id}` not found")))?;

    if !matches!(facture.statut, FactureStatut::Envoyee | FactureStatut::EnRetard) {
        return Err(bad_request(format!(
            "cannot send a reminder for a facture in statut `{}`",
            facture.statut.as_str()
        )));
    }

    state.factures.enregistrer_relance(&facture_id).await.map_err(repository_error)?;

    let facture = state
        .factures
        .trouver(&facture_id)
        .await
        .map_err(repository_error)?
        .ok_or_else(|| internal("facture vanished during reminder update"))?;

    Ok(Json(FactureReponse::from(&facture)))
}
