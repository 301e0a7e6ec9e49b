//! Invoice amount resolution.
//!
//! Decides how much a new facture bills for a devis, given the invoicing
//! type (unique / acompte / solde) and the factures already issued against
//! the same devis. Pure computation: persistence, numbering and rendering
//! are the orchestrator's concern.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::domain::devis::clamp_remise;
use crate::domain::facture::{taux_ou_defaut, FactureId, FactureStatut, TypeFacture};

/// Minimal view of an already-issued facture, in creation order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FactureAnterieure {
    pub id: FactureId,
    pub type_facture: TypeFacture,
    pub montant_ht: Decimal,
    /// Carried but not filtered on: the solde computation deliberately
    /// includes unpaid acomptes (see DESIGN.md open questions).
    pub statut: FactureStatut,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "code")]
pub enum AvertissementFacturation {
    /// Deposit above 50% is unusual; surfaced to the operator, never blocking.
    AcompteEleve { pourcentage: Decimal },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionMontant {
    pub montant_ht: Decimal,
    pub montant_tva: Decimal,
    pub montant_ttc: Decimal,
    pub facture_parent_id: Option<FactureId>,
    pub avertissements: Vec<AvertissementFacturation>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("devis already converted to a facture")]
    DevisDejaConverti,
    #[error("pourcentage_acompte is required for an acompte facture")]
    PourcentageManquant,
    #[error("cumulative acomptes ({cumul}) would exceed the devis total ({total})")]
    CumulAcomptesDepasse { cumul: Decimal, total: Decimal },
}

/// Sum of all prior acompte amounts, payment status ignored.
pub fn somme_acomptes(anterieures: &[FactureAnterieure]) -> Decimal {
    anterieures
        .iter()
        .filter(|facture| facture.type_facture == TypeFacture::Acompte)
        .map(|facture| facture.montant_ht)
        .sum()
}

fn dernier_acompte(anterieures: &[FactureAnterieure]) -> Option<&FactureAnterieure> {
    anterieures.iter().rev().find(|facture| facture.type_facture == TypeFacture::Acompte)
}

/// Share of the devis total still uninvoiced, as a percentage.
pub fn pourcentage_restant(restant: Decimal, total_devis_ht: Decimal) -> Decimal {
    if total_devis_ht.is_zero() {
        return Decimal::ZERO;
    }
    restant / total_devis_ht * Decimal::ONE_HUNDRED
}

pub fn resoudre_montant(
    total_devis_ht: Decimal,
    taux_tva: Option<Decimal>,
    type_facture: TypeFacture,
    pourcentage_acompte: Option<Decimal>,
    devis_converti: bool,
    anterieures: &[FactureAnterieure],
) -> Result<ResolutionMontant, ResolutionError> {
    match type_facture {
        TypeFacture::Unique => {
            if devis_converti {
                return Err(ResolutionError::DevisDejaConverti);
            }
            Ok(resolution(total_devis_ht, taux_tva, None, Vec::new()))
        }
        TypeFacture::Acompte => {
            let pourcentage =
                clamp_remise(pourcentage_acompte.ok_or(ResolutionError::PourcentageManquant)?);
            let montant_ht = total_devis_ht * pourcentage / Decimal::ONE_HUNDRED;

            let cumul = somme_acomptes(anterieures) + montant_ht;
            if cumul > total_devis_ht {
                return Err(ResolutionError::CumulAcomptesDepasse {
                    cumul,
                    total: total_devis_ht,
                });
            }

            let mut avertissements = Vec::new();
            if pourcentage > Decimal::from(50) {
                avertissements.push(AvertissementFacturation::AcompteEleve { pourcentage });
            }

            Ok(resolution(montant_ht, taux_tva, None, avertissements))
        }
        TypeFacture::Solde => {
            // With no prior acompte this degenerates to the full total; the
            // caller disables the option in that case, the resolver does not
            // re-validate.
            let montant_ht = total_devis_ht - somme_acomptes(anterieures);
            let parent = dernier_acompte(anterieures).map(|facture| facture.id.clone());

            Ok(resolution(montant_ht, taux_tva, parent, Vec::new()))
        }
    }
}

fn resolution(
    montant_ht: Decimal,
    taux_tva: Option<Decimal>,
    facture_parent_id: Option<FactureId>,
    avertissements: Vec<AvertissementFacturation>,
) -> ResolutionMontant {
    let montant_tva = montant_ht * taux_ou_defaut(taux_tva) / Decimal::ONE_HUNDRED;

    ResolutionMontant {
        montant_ht,
        montant_tva,
        montant_ttc: montant_ht + montant_tva,
        facture_parent_id,
        avertissements,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{
        pourcentage_restant, resoudre_montant, somme_acomptes, AvertissementFacturation,
        FactureAnterieure, ResolutionError,
    };
    use crate::domain::facture::{FactureId, FactureStatut, TypeFacture};

    fn acompte(id: &str, montant: i64) -> FactureAnterieure {
        FactureAnterieure {
            id: FactureId(id.to_string()),
            type_facture: TypeFacture::Acompte,
            montant_ht: Decimal::from(montant),
            statut: FactureStatut::Envoyee,
        }
    }

    #[test]
    fn unique_bills_the_full_total() {
        let resolution = resoudre_montant(
            Decimal::from(50_000),
            None,
            TypeFacture::Unique,
            None,
            false,
            &[],
        )
        .expect("unique");

        assert_eq!(resolution.montant_ht, Decimal::from(50_000));
        assert_eq!(resolution.montant_ttc, Decimal::from(60_000));
        assert!(resolution.facture_parent_id.is_none());
    }

    #[test]
    fn unique_on_a_converted_devis_is_a_conflict() {
        let error = resoudre_montant(
            Decimal::from(50_000),
            None,
            TypeFacture::Unique,
            None,
            true,
            &[],
        )
        .expect_err("must conflict");

        assert_eq!(error, ResolutionError::DevisDejaConverti);
    }

    #[test]
    fn acompte_bills_the_requested_share() {
        let resolution = resoudre_montant(
            Decimal::from(50_000),
            None,
            TypeFacture::Acompte,
            Some(Decimal::from(30)),
            false,
            &[],
        )
        .expect("acompte");

        assert_eq!(resolution.montant_ht, Decimal::from(15_000));
        assert!(resolution.avertissements.is_empty());
    }

    #[test]
    fn acompte_above_fifty_percent_warns_without_blocking() {
        let resolution = resoudre_montant(
            Decimal::from(10_000),
            None,
            TypeFacture::Acompte,
            Some(Decimal::from(60)),
            false,
            &[],
        )
        .expect("acompte");

        assert_eq!(resolution.montant_ht, Decimal::from(6_000));
        assert_eq!(
            resolution.avertissements,
            vec![AvertissementFacturation::AcompteEleve { pourcentage: Decimal::from(60) }]
        );
    }

    #[test]
    fn acompte_requires_a_percentage() {
        let error =
            resoudre_montant(Decimal::from(10_000), None, TypeFacture::Acompte, None, false, &[])
                .expect_err("missing percentage");
        assert_eq!(error, ResolutionError::PourcentageManquant);
    }

    #[test]
    fn cumulative_acomptes_cannot_exceed_the_devis_total() {
        let error = resoudre_montant(
            Decimal::from(10_000),
            None,
            TypeFacture::Acompte,
            Some(Decimal::from(50)),
            true,
            &[acompte("F-1", 4_000), acompte("F-2", 4_000)],
        )
        .expect_err("overage");

        assert_eq!(
            error,
            ResolutionError::CumulAcomptesDepasse {
                cumul: Decimal::from(13_000),
                total: Decimal::from(10_000),
            }
        );
    }

    #[test]
    fn cumulative_acomptes_may_reach_exactly_one_hundred_percent() {
        let resolution = resoudre_montant(
            Decimal::from(10_000),
            None,
            TypeFacture::Acompte,
            Some(Decimal::from(50)),
            true,
            &[acompte("F-1", 5_000)],
        )
        .expect("exact fill");

        assert_eq!(resolution.montant_ht, Decimal::from(5_000));
    }

    #[test]
    fn solde_bills_the_total_minus_prior_acomptes() {
        let resolution = resoudre_montant(
            Decimal::from(50_000),
            None,
            TypeFacture::Solde,
            None,
            true,
            &[acompte("F-1", 15_000)],
        )
        .expect("solde");

        assert_eq!(resolution.montant_ht, Decimal::from(35_000));
        assert_eq!(resolution.facture_parent_id, Some(FactureId("F-1".to_string())));
    }

    #[test]
    fn solde_links_to_the_most_recent_acompte() {
        let resolution = resoudre_montant(
            Decimal::from(50_000),
            None,
            TypeFacture::Solde,
            None,
            true,
            &[acompte("F-1", 10_000), acompte("F-2", 10_000)],
        )
        .expect("solde");

        assert_eq!(resolution.montant_ht, Decimal::from(30_000));
        assert_eq!(resolution.facture_parent_id, Some(FactureId("F-2".to_string())));
    }

    #[test]
    fn solde_ignores_payment_status_of_prior_acomptes() {
        let mut impaye = acompte("F-1", 20_000);
        impaye.statut = FactureStatut::Brouillon;

        let resolution = resoudre_montant(
            Decimal::from(50_000),
            None,
            TypeFacture::Solde,
            None,
            true,
            &[impaye],
        )
        .expect("solde");

        assert_eq!(resolution.montant_ht, Decimal::from(30_000));
    }

    #[test]
    fn solde_without_acomptes_degenerates_to_the_full_total() {
        let resolution =
            resoudre_montant(Decimal::from(50_000), None, TypeFacture::Solde, None, false, &[])
                .expect("degenerate solde");

        assert_eq!(resolution.montant_ht, Decimal::from(50_000));
        assert!(resolution.facture_parent_id.is_none());
    }

    #[test]
    fn somme_acomptes_skips_non_acompte_invoices() {
        let unique = FactureAnterieure {
            id: FactureId("F-0".to_string()),
            type_facture: TypeFacture::Unique,
            montant_ht: Decimal::from(99_999),
            statut: FactureStatut::Payee,
        };
        assert_eq!(somme_acomptes(&[unique, acompte("F-1", 1_000)]), Decimal::from(1_000));
    }

    #[test]
    fn remaining_percentage_guards_a_zero_total() {
        assert_eq!(pourcentage_restant(Decimal::from(100), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(
            pourcentage_restant(Decimal::from(35_000), Decimal::from(50_000)),
            Decimal::from(70)
        );
    }
}
