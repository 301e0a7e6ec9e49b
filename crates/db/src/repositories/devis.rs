use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use facturo_core::billing::totals::TotauxDevis;
use facturo_core::domain::client::{Client, ClientId, Contact, ContactId, Opportunite, OpportuniteId};
use facturo_core::domain::devis::{clamp_remise, Devis, DevisId, DevisLigne, DevisStatut, LigneId, ServiceId};
use facturo_core::domain::facture::FactureId;

use super::{
    decode_date_opt, decode_datetime, decode_decimal, decode_decimal_opt, ContexteDevis,
    DevisRepository, LigneFacturable, RepositoryError,
};
use crate::DbPool;

pub struct SqlDevisRepository {
    pool: DbPool,
}

impl SqlDevisRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DevisRepository for SqlDevisRepository {
    async fn contexte_facturation(
        &self,
        id: &DevisId,
    ) -> Result<Option<ContexteDevis>, RepositoryError> {
        let devis_row = sqlx::query(
            "SELECT id, numero, opportunite_id, client_id, contact_id, statut, taux_tva,
                    conditions_paiement, date_validite, total_ht, tva, total_ttc, facture_id,
                    created_at, updated_at
             FROM devis WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(devis_row) = devis_row else {
            return Ok(None);
        };
        let devis = devis_from_row(&devis_row)?;

        let opportunite_row = sqlx::query(
            "SELECT id, client_id, contact_id, titre, statut FROM opportunites WHERE id = ?",
        )
        .bind(&devis.opportunite_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::Decode(format!(
                "devis `{}` references missing opportunite `{}`",
                devis.id.0, devis.opportunite_id.0
            ))
        })?;

        let opportunite = Opportunite {
            id: OpportuniteId(opportunite_row.try_get("id")?),
            client_id: ClientId(opportunite_row.try_get("client_id")?),
            contact_id: opportunite_row
                .try_get::<Option<String>, _>("contact_id")?
                .map(ContactId),
            titre: opportunite_row.try_get("titre")?,
            statut: opportunite_row.try_get("statut")?,
        };

        let client_row = sqlx::query(
            "SELECT id, nom, email, telephone, adresse, ville, code_postal
             FROM clients WHERE id = ?",
        )
        .bind(&devis.client_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            RepositoryError::Decode(format!(
                "devis `{}` references missing client `{}`",
                devis.id.0, devis.client_id.0
            ))
        })?;

        let client = Client {
            id: ClientId(client_row.try_get("id")?),
            nom: client_row.try_get("nom")?,
            email: client_row.try_get("email")?,
            telephone: client_row.try_get("telephone")?,
            adresse: client_row.try_get("adresse")?,
            ville: client_row.try_get("ville")?,
            code_postal: client_row.try_get("code_postal")?,
        };

        let contact_id = devis.contact_id.clone().or_else(|| opportunite.contact_id.clone());
        let contact = match contact_id {
            Some(contact_id) => sqlx::query(
                "SELECT id, client_id, prenom, nom, email, telephone, fonction
                 FROM contacts WHERE id = ?",
            )
            .bind(&contact_id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| -> Result<Contact, RepositoryError> {
                Ok(Contact {
                    id: ContactId(row.try_get("id")?),
                    client_id: ClientId(row.try_get("client_id")?),
                    prenom: row.try_get("prenom")?,
                    nom: row.try_get("nom")?,
                    email: row.try_get("email")?,
                    telephone: row.try_get("telephone")?,
                    fonction: row.try_get("fonction")?,
                })
            })
            .transpose()?,
            None => None,
        };

        Ok(Some(ContexteDevis { devis, opportunite, client, contact }))
    }

    async fn lignes_facturables(
        &self,
        opportunite_id: &OpportuniteId,
    ) -> Result<Vec<LigneFacturable>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT ol.id, ol.service_id, ol.description, ol.quantite, ol.prix_unitaire,
                    ol.remise_pourcent, ol.position,
                    s.nom AS service_nom, s.categorie AS service_categorie
             FROM opportunite_lignes ol
             LEFT JOIN services s ON s.id = ol.service_id
             WHERE ol.opportunite_id = ?
             ORDER BY ol.created_at, ol.id",
        )
        .bind(&opportunite_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut lignes = Vec::with_capacity(rows.len());
        for row in rows {
            let service_nom: Option<String> = row.try_get("service_nom")?;
            let service_categorie: Option<String> = row.try_get("service_categorie")?;

            // Absent quantity/price count as zero; discount is re-clamped at
            // the decode boundary.
            let quantite = decode_decimal_opt("quantite", row.try_get("quantite")?)?
                .unwrap_or(Decimal::ZERO);
            let prix_unitaire = decode_decimal_opt("prix_unitaire", row.try_get("prix_unitaire")?)?
                .unwrap_or(Decimal::ZERO);
            let remise_pourcent =
                clamp_remise(decode_decimal("remise_pourcent", &row.try_get::<String, _>("remise_pourcent")?)?);

            let mut description: String = row.try_get("description")?;
            if description.trim().is_empty() {
                if let Some(nom) = &service_nom {
                    description = nom.clone();
                }
            }

            lignes.push(LigneFacturable {
                ligne: DevisLigne {
                    id: LigneId(row.try_get("id")?),
                    service_id: row.try_get::<Option<String>, _>("service_id")?.map(ServiceId),
                    description,
                    quantite,
                    prix_unitaire,
                    remise_pourcent,
                    position: row.try_get("position")?,
                },
                service_nom,
                service_categorie,
            });
        }

        Ok(lignes)
    }

    async fn enregistrer_totaux(
        &self,
        id: &DevisId,
        totaux: &TotauxDevis,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE devis SET total_ht = ?, tva = ?, total_ttc = ?, updated_at = ? WHERE id = ?")
            .bind(totaux.total_ht.to_string())
            .bind(totaux.tva.to_string())
            .bind(totaux.total_ttc.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

pub(crate) fn devis_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Devis, RepositoryError> {
    let statut_raw: String = row.try_get("statut")?;
    let statut = DevisStatut::parse(&statut_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown devis statut `{statut_raw}`")))?;

    Ok(Devis {
        id: DevisId(row.try_get("id")?),
        numero: row.try_get("numero")?,
        opportunite_id: OpportuniteId(row.try_get("opportunite_id")?),
        client_id: ClientId(row.try_get("client_id")?),
        contact_id: row.try_get::<Option<String>, _>("contact_id")?.map(ContactId),
        statut,
        taux_tva: decode_decimal_opt("taux_tva", row.try_get("taux_tva")?)?,
        conditions_paiement: row.try_get("conditions_paiement")?,
        date_validite: decode_date_opt("date_validite", row.try_get("date_validite")?)?,
        total_ht: decode_decimal("total_ht", &row.try_get::<String, _>("total_ht")?)?,
        tva: decode_decimal("tva", &row.try_get::<String, _>("tva")?)?,
        total_ttc: decode_decimal("total_ttc", &row.try_get::<String, _>("total_ttc")?)?,
        facture_id: row.try_get::<Option<String>, _>("facture_id")?.map(FactureId),
        created_at: decode_datetime("created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_datetime("updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}
