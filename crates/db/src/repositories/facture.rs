use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::Row;

use facturo_core::billing::numbering::numero_sequentiel;
use facturo_core::domain::client::{ClientId, ContactId};
use facturo_core::domain::devis::DevisId;
use facturo_core::domain::facture::{
    ArtefactStatut, Facture, FactureId, FactureStatut, TypeFacture,
};

use super::{
    decode_date, decode_date_opt, decode_datetime, decode_datetime_opt, decode_decimal,
    decode_decimal_opt, CreationFactureError, FactureRepository, FiltreFactures, ModeLiaison,
    NouvelleFacture, RepositoryError,
};
use crate::DbPool;

const COLONNES_FACTURE: &str = "id, numero, devis_id, client_id, contact_id, statut, type_facture,
    montant_ht, taux_tva, date_emission, date_echeance, date_paiement, pourcentage_acompte,
    facture_parent_id, montant_total_projet, niveau_relance, niveau_relance_envoye,
    date_derniere_relance, pdf_url, artefact_statut, created_at";

pub struct SqlFactureRepository {
    pool: DbPool,
}

impl SqlFactureRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FactureRepository for SqlFactureRepository {
    async fn creer(
        &self,
        nouvelle: NouvelleFacture,
        liaison: ModeLiaison,
    ) -> Result<Facture, CreationFactureError> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        sqlx::query(
            "INSERT INTO factures (
                id, numero, devis_id, client_id, contact_id, statut, type_facture,
                montant_ht, taux_tva, date_emission, date_echeance, pourcentage_acompte,
                facture_parent_id, montant_total_projet, artefact_statut, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&nouvelle.id.0)
        .bind(&nouvelle.numero)
        .bind(&nouvelle.devis_id.0)
        .bind(&nouvelle.client_id.0)
        .bind(nouvelle.contact_id.as_ref().map(|contact| contact.0.as_str()))
        .bind(FactureStatut::Brouillon.as_str())
        .bind(nouvelle.type_facture.as_str())
        .bind(nouvelle.montant_ht.to_string())
        .bind(nouvelle.taux_tva.map(|taux| taux.to_string()))
        .bind(nouvelle.date_emission.to_string())
        .bind(nouvelle.date_echeance.to_string())
        .bind(nouvelle.pourcentage_acompte.map(|pct| pct.to_string()))
        .bind(nouvelle.facture_parent_id.as_ref().map(|parent| parent.0.as_str()))
        .bind(nouvelle.montant_total_projet.map(|montant| montant.to_string()))
        .bind(ArtefactStatut::EnAttente.as_str())
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        // Back-link write in the same transaction: losing the exclusive race
        // rolls the insert back, so no orphan facture row survives.
        let liaison_query = match liaison {
            ModeLiaison::Exclusive => {
                "UPDATE devis SET facture_id = ?, statut = 'accepte', updated_at = ?
                 WHERE id = ? AND facture_id IS NULL"
            }
            ModeLiaison::Chainee => {
                "UPDATE devis SET facture_id = ?, statut = 'accepte', updated_at = ? WHERE id = ?"
            }
        };
        let lien = sqlx::query(liaison_query)
            .bind(&nouvelle.id.0)
            .bind(created_at.to_rfc3339())
            .bind(&nouvelle.devis_id.0)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::from)?;

        if lien.rows_affected() == 0 {
            tx.rollback().await.map_err(RepositoryError::from)?;
            return Err(match liaison {
                ModeLiaison::Exclusive => {
                    CreationFactureError::DevisDejaConverti(nouvelle.devis_id.0)
                }
                ModeLiaison::Chainee => {
                    CreationFactureError::DevisIntrouvable(nouvelle.devis_id.0)
                }
            });
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        Ok(Facture {
            id: nouvelle.id,
            numero: nouvelle.numero,
            devis_id: nouvelle.devis_id,
            client_id: nouvelle.client_id,
            contact_id: nouvelle.contact_id,
            statut: FactureStatut::Brouillon,
            type_facture: nouvelle.type_facture,
            montant_ht: nouvelle.montant_ht,
            taux_tva: nouvelle.taux_tva,
            date_emission: nouvelle.date_emission,
            date_echeance: nouvelle.date_echeance,
            date_paiement: None,
            pourcentage_acompte: nouvelle.pourcentage_acompte,
            facture_parent_id: nouvelle.facture_parent_id,
            montant_total_projet: nouvelle.montant_total_projet,
            niveau_relance: 0,
            niveau_relance_envoye: 0,
            date_derniere_relance: None,
            pdf_url: None,
            artefact_statut: ArtefactStatut::EnAttente,
            created_at,
        })
    }

    async fn trouver(&self, id: &FactureId) -> Result<Option<Facture>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLONNES_FACTURE} FROM factures WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(facture_from_row).transpose()
    }

    async fn lister(&self, filtre: &FiltreFactures) -> Result<Vec<Facture>, RepositoryError> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {COLONNES_FACTURE} FROM factures WHERE 1 = 1"
        ));
        if let Some(statut) = filtre.statut {
            builder.push(" AND statut = ").push_bind(statut.as_str());
        }
        if let Some(devis_id) = &filtre.devis_id {
            builder.push(" AND devis_id = ").push_bind(devis_id.0.clone());
        }
        builder.push(" ORDER BY created_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(facture_from_row).collect()
    }

    async fn pour_devis(&self, devis_id: &DevisId) -> Result<Vec<Facture>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLONNES_FACTURE} FROM factures WHERE devis_id = ? ORDER BY created_at, id"
        ))
        .bind(&devis_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(facture_from_row).collect()
    }

    async fn prochain_numero(&self, annee: i32) -> Result<String, RepositoryError> {
        let dernier: i64 = sqlx::query_scalar(
            "INSERT INTO facture_sequences (annee, dernier) VALUES (?, 1)
             ON CONFLICT(annee) DO UPDATE SET dernier = dernier + 1
             RETURNING dernier",
        )
        .bind(annee)
        .fetch_one(&self.pool)
        .await?;

        Ok(numero_sequentiel(annee, dernier))
    }

    async fn enregistrer_artefact(
        &self,
        id: &FactureId,
        statut: ArtefactStatut,
        pdf_url: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE factures SET artefact_statut = ?, pdf_url = ? WHERE id = ?")
            .bind(statut.as_str())
            .bind(pdf_url)
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mettre_a_jour_statut(
        &self,
        id: &FactureId,
        statut: FactureStatut,
        date_paiement: Option<NaiveDate>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE factures SET statut = ?, date_paiement = COALESCE(?, date_paiement)
             WHERE id = ?",
        )
        .bind(statut.as_str())
        .bind(date_paiement.map(|date| date.to_string()))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn enregistrer_relance(&self, id: &FactureId) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE factures SET niveau_relance = niveau_relance + 1,
                    niveau_relance_envoye = niveau_relance_envoye + 1,
                    date_derniere_relance = ?
             WHERE id = ?",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn facture_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Facture, RepositoryError> {
    let statut_raw: String = row.try_get("statut")?;
    let statut = FactureStatut::parse(&statut_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown facture statut `{statut_raw}`")))?;

    let type_raw: String = row.try_get("type_facture")?;
    let type_facture = TypeFacture::parse(&type_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown type_facture `{type_raw}`")))?;

    let artefact_raw: String = row.try_get("artefact_statut")?;
    let artefact_statut = ArtefactStatut::parse(&artefact_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown artefact_statut `{artefact_raw}`"))
    })?;

    Ok(Facture {
        id: FactureId(row.try_get("id")?),
        numero: row.try_get("numero")?,
        devis_id: DevisId(row.try_get("devis_id")?),
        client_id: ClientId(row.try_get("client_id")?),
        contact_id: row.try_get::<Option<String>, _>("contact_id")?.map(ContactId),
        statut,
        type_facture,
        montant_ht: decode_decimal("montant_ht", &row.try_get::<String, _>("montant_ht")?)?,
        taux_tva: decode_decimal_opt("taux_tva", row.try_get("taux_tva")?)?,
        date_emission: decode_date("date_emission", &row.try_get::<String, _>("date_emission")?)?,
        date_echeance: decode_date("date_echeance", &row.try_get::<String, _>("date_echeance")?)?,
        date_paiement: decode_date_opt("date_paiement", row.try_get("date_paiement")?)?,
        pourcentage_acompte: decode_decimal_opt(
            "pourcentage_acompte",
            row.try_get("pourcentage_acompte")?,
        )?,
        facture_parent_id: row.try_get::<Option<String>, _>("facture_parent_id")?.map(FactureId),
        montant_total_projet: decode_decimal_opt(
            "montant_total_projet",
            row.try_get("montant_total_projet")?,
        )?,
        niveau_relance: row.try_get("niveau_relance")?,
        niveau_relance_envoye: row.try_get("niveau_relance_envoye")?,
        date_derniere_relance: decode_datetime_opt(
            "date_derniere_relance",
            row.try_get("date_derniere_relance")?,
        )?,
        pdf_url: row.try_get("pdf_url")?,
        artefact_statut,
        created_at: decode_datetime("created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use facturo_core::domain::client::ClientId;
    use facturo_core::domain::devis::DevisId;
    use facturo_core::domain::facture::{
        ArtefactStatut, FactureId, FactureStatut, TypeFacture,
    };

    use super::{
        CreationFactureError, FactureRepository, FiltreFactures, ModeLiaison, NouvelleFacture,
        SqlFactureRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn pool_with_devis() -> crate::DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let now = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO clients (id, nom, created_at) VALUES ('C-1', 'Atelier Brun', ?)")
            .bind(&now)
            .execute(&pool)
            .await
            .expect("client");
        sqlx::query(
            "INSERT INTO opportunites (id, client_id, titre, statut, created_at)
             VALUES ('O-1', 'C-1', 'Refonte du site', 'en_cours', ?)",
        )
        .bind(&now)
        .execute(&pool)
        .await
        .expect("opportunite");
        sqlx::query(
            "INSERT INTO devis (id, numero, opportunite_id, client_id, statut,
                                total_ht, tva, total_ttc, created_at, updated_at)
             VALUES ('D-1', 'DEV-2026-0001', 'O-1', 'C-1', 'envoye', '2300', '460', '2760', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .expect("devis");

        pool
    }

    fn nouvelle(id: &str, numero: &str, type_facture: TypeFacture, montant: i64) -> NouvelleFacture {
        NouvelleFacture {
            id: FactureId(id.to_string()),
            numero: numero.to_string(),
            devis_id: DevisId("D-1".to_string()),
            client_id: ClientId("C-1".to_string()),
            contact_id: None,
            type_facture,
            montant_ht: Decimal::from(montant),
            taux_tva: None,
            date_emission: NaiveDate::from_ymd_opt(2026, 8, 5).unwrap(),
            date_echeance: NaiveDate::from_ymd_opt(2026, 9, 4).unwrap(),
            pourcentage_acompte: None,
            facture_parent_id: None,
            montant_total_projet: Some(Decimal::from(2300)),
        }
    }

    async fn devis_facture_id(pool: &crate::DbPool) -> Option<String> {
        sqlx::query_scalar("SELECT facture_id FROM devis WHERE id = 'D-1'")
            .fetch_one(pool)
            .await
            .expect("devis row")
    }

    #[tokio::test]
    async fn exclusive_creation_links_the_devis_and_accepts_it() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());

        let facture = repo
            .creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Unique, 2300), ModeLiaison::Exclusive)
            .await
            .expect("create");

        assert_eq!(facture.statut, FactureStatut::Brouillon);
        assert_eq!(facture.artefact_statut, ArtefactStatut::EnAttente);
        assert_eq!(devis_facture_id(&pool).await.as_deref(), Some("F-1"));

        let devis_statut: String = sqlx::query_scalar("SELECT statut FROM devis WHERE id = 'D-1'")
            .fetch_one(&pool)
            .await
            .expect("devis statut");
        assert_eq!(devis_statut, "accepte");

        pool.close().await;
    }

    #[tokio::test]
    async fn a_second_exclusive_creation_conflicts_without_inserting_a_row() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());

        repo.creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Unique, 2300), ModeLiaison::Exclusive)
            .await
            .expect("first create");

        let error = repo
            .creer(nouvelle("F-2", "FAC-2026-0002", TypeFacture::Unique, 2300), ModeLiaison::Exclusive)
            .await
            .expect_err("second create must conflict");
        assert!(matches!(error, CreationFactureError::DevisDejaConverti(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM factures")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1, "the losing insert must be rolled back");

        pool.close().await;
    }

    #[tokio::test]
    async fn chained_creation_repoints_the_devis_at_the_latest_facture() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());

        repo.creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Acompte, 690), ModeLiaison::Chainee)
            .await
            .expect("acompte");
        repo.creer(nouvelle("F-2", "FAC-2026-0002", TypeFacture::Solde, 1610), ModeLiaison::Chainee)
            .await
            .expect("solde");

        assert_eq!(devis_facture_id(&pool).await.as_deref(), Some("F-2"));

        let factures = repo.pour_devis(&DevisId("D-1".to_string())).await.expect("list");
        assert_eq!(factures.len(), 2);
        assert_eq!(factures[0].type_facture, TypeFacture::Acompte);
        assert_eq!(factures[1].type_facture, TypeFacture::Solde);

        pool.close().await;
    }

    #[tokio::test]
    async fn chained_creation_against_a_missing_devis_rolls_back() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());

        let mut absente = nouvelle("F-1", "FAC-2026-0001", TypeFacture::Acompte, 690);
        absente.devis_id = DevisId("D-MISSING".to_string());

        let error = repo.creer(absente, ModeLiaison::Chainee).await.expect_err("must fail");
        assert!(matches!(error, CreationFactureError::DevisIntrouvable(_)));

        pool.close().await;
    }

    #[tokio::test]
    async fn numbering_is_sequential_per_year() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());

        assert_eq!(repo.prochain_numero(2026).await.expect("n1"), "FAC-2026-0001");
        assert_eq!(repo.prochain_numero(2026).await.expect("n2"), "FAC-2026-0002");
        assert_eq!(repo.prochain_numero(2027).await.expect("n3"), "FAC-2027-0001");

        pool.close().await;
    }

    #[tokio::test]
    async fn artefact_outcome_is_recorded() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());
        let id = FactureId("F-1".to_string());

        repo.creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Unique, 2300), ModeLiaison::Exclusive)
            .await
            .expect("create");

        repo.enregistrer_artefact(&id, ArtefactStatut::Stocke, Some("https://stockage/factures/F-1.pdf"))
            .await
            .expect("store");
        let facture = repo.trouver(&id).await.expect("query").expect("exists");
        assert_eq!(facture.artefact_statut, ArtefactStatut::Stocke);
        assert_eq!(facture.pdf_url.as_deref(), Some("https://stockage/factures/F-1.pdf"));

        repo.enregistrer_artefact(&id, ArtefactStatut::Echec, None).await.expect("fail mark");
        let facture = repo.trouver(&id).await.expect("query").expect("exists");
        assert_eq!(facture.artefact_statut, ArtefactStatut::Echec);
        assert_eq!(facture.pdf_url, None);

        pool.close().await;
    }

    #[tokio::test]
    async fn status_update_stamps_payment_date_only_when_provided() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());
        let id = FactureId("F-1".to_string());

        repo.creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Unique, 2300), ModeLiaison::Exclusive)
            .await
            .expect("create");

        repo.mettre_a_jour_statut(&id, FactureStatut::Envoyee, None).await.expect("send");
        let facture = repo.trouver(&id).await.expect("query").expect("exists");
        assert_eq!(facture.statut, FactureStatut::Envoyee);
        assert_eq!(facture.date_paiement, None);

        let paiement = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();
        repo.mettre_a_jour_statut(&id, FactureStatut::Payee, Some(paiement)).await.expect("pay");
        let facture = repo.trouver(&id).await.expect("query").expect("exists");
        assert_eq!(facture.statut, FactureStatut::Payee);
        assert_eq!(facture.date_paiement, Some(paiement));

        pool.close().await;
    }

    #[tokio::test]
    async fn reminder_tracking_increments_levels() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());
        let id = FactureId("F-1".to_string());

        repo.creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Unique, 2300), ModeLiaison::Exclusive)
            .await
            .expect("create");

        repo.enregistrer_relance(&id).await.expect("first reminder");
        repo.enregistrer_relance(&id).await.expect("second reminder");

        let facture = repo.trouver(&id).await.expect("query").expect("exists");
        assert_eq!(facture.niveau_relance, 2);
        assert_eq!(facture.niveau_relance_envoye, 2);
        assert!(facture.date_derniere_relance.is_some());

        pool.close().await;
    }

    #[tokio::test]
    async fn listing_filters_by_status_and_devis() {
        let pool = pool_with_devis().await;
        let repo = SqlFactureRepository::new(pool.clone());

        repo.creer(nouvelle("F-1", "FAC-2026-0001", TypeFacture::Acompte, 690), ModeLiaison::Chainee)
            .await
            .expect("acompte");
        repo.creer(nouvelle("F-2", "FAC-2026-0002", TypeFacture::Solde, 1610), ModeLiaison::Chainee)
            .await
            .expect("solde");
        repo.mettre_a_jour_statut(&FactureId("F-1".to_string()), FactureStatut::Envoyee, None)
            .await
            .expect("send");

        let envoyees = repo
            .lister(&FiltreFactures {
                statut: Some(FactureStatut::Envoyee),
                ..FiltreFactures::default()
            })
            .await
            .expect("list");
        assert_eq!(envoyees.len(), 1);
        assert_eq!(envoyees[0].id, FactureId("F-1".to_string()));

        let du_devis = repo
            .lister(&FiltreFactures {
                devis_id: Some(DevisId("D-1".to_string())),
                ..FiltreFactures::default()
            })
            .await
            .expect("list");
        assert_eq!(du_devis.len(), 2);

        pool.close().await;
    }
}
