use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use facturo_core::domain::entreprise::ProfilEntreprise;

use super::{EntrepriseRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEntrepriseRepository {
    pool: DbPool,
}

impl SqlEntrepriseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntrepriseRepository for SqlEntrepriseRepository {
    async fn profil(&self) -> Result<Option<ProfilEntreprise>, RepositoryError> {
        let row = sqlx::query(
            "SELECT nom, forme_juridique, siret, tva_intracommunautaire, adresse, ville,
                    code_postal, iban, bic, couleur, logo_url, conditions_paiement
             FROM parametres_entreprise WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<ProfilEntreprise, RepositoryError> {
            Ok(ProfilEntreprise {
                nom: row.try_get("nom")?,
                forme_juridique: row.try_get("forme_juridique")?,
                siret: row.try_get("siret")?,
                tva_intracommunautaire: row.try_get("tva_intracommunautaire")?,
                adresse: row.try_get("adresse")?,
                ville: row.try_get("ville")?,
                code_postal: row.try_get("code_postal")?,
                iban: row.try_get("iban")?,
                bic: row.try_get("bic")?,
                couleur: row.try_get("couleur")?,
                logo_url: row.try_get("logo_url")?,
                conditions_paiement: row.try_get("conditions_paiement")?,
            })
        })
        .transpose()
    }

    async fn enregistrer(&self, profil: &ProfilEntreprise) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO parametres_entreprise (
                id, nom, forme_juridique, siret, tva_intracommunautaire, adresse, ville,
                code_postal, iban, bic, couleur, logo_url, conditions_paiement, updated_at
             ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                nom = excluded.nom,
                forme_juridique = excluded.forme_juridique,
                siret = excluded.siret,
                tva_intracommunautaire = excluded.tva_intracommunautaire,
                adresse = excluded.adresse,
                ville = excluded.ville,
                code_postal = excluded.code_postal,
                iban = excluded.iban,
                bic = excluded.bic,
                couleur = excluded.couleur,
                logo_url = excluded.logo_url,
                conditions_paiement = excluded.conditions_paiement,
                updated_at = excluded.updated_at",
        )
        .bind(&profil.nom)
        .bind(&profil.forme_juridique)
        .bind(&profil.siret)
        .bind(&profil.tva_intracommunautaire)
        .bind(&profil.adresse)
        .bind(&profil.ville)
        .bind(&profil.code_postal)
        .bind(&profil.iban)
        .bind(&profil.bic)
        .bind(&profil.couleur)
        .bind(&profil.logo_url)
        .bind(&profil.conditions_paiement)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
