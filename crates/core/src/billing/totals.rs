use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::devis::DevisLigne;
use crate::domain::facture::taux_ou_defaut;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotauxDevis {
    pub total_ht: Decimal,
    pub tva: Decimal,
    pub total_ttc: Decimal,
}

/// Reduce a devis's lines into HT / TVA / TTC totals.
///
/// The UI recomputes this live on every edit; the persisted devis columns are
/// a snapshot taken server-side at save or generation time, so the two can
/// diverge and callers must not assume they agree.
pub fn totaux_devis(lignes: &[DevisLigne], taux_tva: Option<Decimal>) -> TotauxDevis {
    let total_ht: Decimal = lignes.iter().map(DevisLigne::total_ht).sum();
    let tva = total_ht * taux_ou_defaut(taux_tva) / Decimal::ONE_HUNDRED;

    TotauxDevis { total_ht, tva, total_ttc: total_ht + tva }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::totaux_devis;
    use crate::domain::devis::{DevisLigne, LigneId};

    fn ligne(id: &str, quantite: i64, prix: i64, remise: i64) -> DevisLigne {
        DevisLigne::new(
            LigneId(id.to_string()),
            None,
            "Prestation".to_string(),
            Decimal::from(quantite),
            Decimal::from(prix),
            Decimal::from(remise),
        )
    }

    #[test]
    fn empty_line_list_yields_zero_totals() {
        let totaux = totaux_devis(&[], None);
        assert_eq!(totaux.total_ht, Decimal::ZERO);
        assert_eq!(totaux.tva, Decimal::ZERO);
        assert_eq!(totaux.total_ttc, Decimal::ZERO);
    }

    #[test]
    fn totals_are_the_sum_of_line_totals() {
        let lignes = vec![ligne("L-1", 2, 1000, 10), ligne("L-2", 1, 500, 0)];
        let totaux = totaux_devis(&lignes, None);

        assert_eq!(totaux.total_ht, Decimal::from(2300));
        assert_eq!(totaux.tva, Decimal::from(460));
        assert_eq!(totaux.total_ttc, Decimal::from(2760));
    }

    #[test]
    fn explicit_zero_rate_produces_no_vat() {
        let lignes = vec![ligne("L-1", 1, 100, 0)];
        let totaux = totaux_devis(&lignes, Some(Decimal::ZERO));

        assert_eq!(totaux.total_ht, Decimal::from(100));
        assert_eq!(totaux.tva, Decimal::ZERO);
        assert_eq!(totaux.total_ttc, Decimal::from(100));
    }

    #[test]
    fn custom_rate_is_applied() {
        let lignes = vec![ligne("L-1", 1, 1000, 0)];
        let totaux = totaux_devis(&lignes, Some(Decimal::from(10)));

        assert_eq!(totaux.tva, Decimal::from(100));
        assert_eq!(totaux.total_ttc, Decimal::from(1100));
    }
}
