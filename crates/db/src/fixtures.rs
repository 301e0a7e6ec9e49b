//! Seed dataset for integration tests and local demos: one company profile,
//! one client with a contact, a priced opportunité and its devis.

use chrono::Utc;
use uuid::Uuid;

use facturo_core::domain::client::{ClientId, ContactId, OpportuniteId};
use facturo_core::domain::devis::DevisId;

use crate::repositories::RepositoryError;
use crate::DbPool;

#[derive(Clone, Debug)]
pub struct JeuDonneesDemo {
    pub client_id: ClientId,
    pub contact_id: ContactId,
    pub opportunite_id: OpportuniteId,
    pub devis_id: DevisId,
    pub devis_numero: String,
}

/// Seed a devis worth 2300 HT (2 x 1000 with 10% off, plus 1 x 500), with
/// totals snapshotted at the default 20% rate.
pub async fn seed_demo(pool: &DbPool) -> Result<JeuDonneesDemo, RepositoryError> {
    let now = Utc::now().to_rfc3339();
    // Distinct timestamps keep the billable lines in a stable creation order.
    let apres = (Utc::now() + chrono::Duration::seconds(1)).to_rfc3339();
    let client_id = format!("CLI-{}", Uuid::new_v4().simple());
    let contact_id = format!("CON-{}", Uuid::new_v4().simple());
    let opportunite_id = format!("OPP-{}", Uuid::new_v4().simple());
    let devis_id = format!("DEV-{}", Uuid::new_v4().simple());
    let devis_numero = format!("DEV-2026-{}", &Uuid::new_v4().simple().to_string()[..6]);
    let service_dev = format!("SRV-{}", Uuid::new_v4().simple());

    sqlx::query(
        "INSERT INTO parametres_entreprise (
            id, nom, forme_juridique, siret, adresse, ville, code_postal, iban, bic,
            couleur, conditions_paiement, updated_at
         ) VALUES (1, 'Studio Garnier', 'SARL', '123 456 789 00010', '12 rue des Lilas',
                   'Lyon', '69003', 'FR76 3000 4000 0500 0012 3456 789', 'BNPAFRPP',
                   '#1d4ed8', 'Paiement a 30 jours, virement bancaire', ?)
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO clients (id, nom, email, telephone, adresse, ville, code_postal, created_at)
         VALUES (?, 'Atelier Brun', 'contact@atelierbrun.fr', '+33 4 78 00 00 00',
                 '8 quai Saint-Antoine', 'Lyon', '69002', ?)",
    )
    .bind(&client_id)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO contacts (id, client_id, prenom, nom, email, fonction, created_at)
         VALUES (?, ?, 'Claire', 'Brun', 'claire@atelierbrun.fr', 'Gerante', ?)",
    )
    .bind(&contact_id)
    .bind(&client_id)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO opportunites (id, client_id, contact_id, titre, statut, created_at)
         VALUES (?, ?, ?, 'Refonte du site vitrine', 'en_cours', ?)",
    )
    .bind(&opportunite_id)
    .bind(&client_id)
    .bind(&contact_id)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO services (id, nom, categorie, prix_unitaire, created_at)
         VALUES (?, 'Developpement web', 'Prestation', '1000', ?)",
    )
    .bind(&service_dev)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO opportunite_lignes
             (id, opportunite_id, service_id, description, quantite, prix_unitaire,
              remise_pourcent, position, created_at)
         VALUES (?, ?, ?, 'Developpement du site', '2', '1000', '10', 1, ?)",
    )
    .bind(format!("LIG-{}", Uuid::new_v4().simple()))
    .bind(&opportunite_id)
    .bind(&service_dev)
    .bind(&now)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO opportunite_lignes
             (id, opportunite_id, description, quantite, prix_unitaire, remise_pourcent,
              position, created_at)
         VALUES (?, ?, 'Hebergement annuel', '1', '500', '0', 2, ?)",
    )
    .bind(format!("LIG-{}", Uuid::new_v4().simple()))
    .bind(&opportunite_id)
    .bind(&apres)
    .execute(pool)
    .await?;

    sqlx::query(
        "INSERT INTO devis (id, numero, opportunite_id, client_id, contact_id, statut,
                            conditions_paiement, total_ht, tva, total_ttc, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 'envoye', NULL, '2300', '460', '2760', ?, ?)",
    )
    .bind(&devis_id)
    .bind(&devis_numero)
    .bind(&opportunite_id)
    .bind(&client_id)
    .bind(&contact_id)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(JeuDonneesDemo {
        client_id: ClientId(client_id),
        contact_id: ContactId(contact_id),
        opportunite_id: OpportuniteId(opportunite_id),
        devis_id: DevisId(devis_id),
        devis_numero,
    })
}
