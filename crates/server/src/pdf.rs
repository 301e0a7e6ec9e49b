//! Invoice document rendering.
//!
//! HTML comes out of Tera templates; PDF conversion shells out to an external
//! wkhtmltopdf process behind the [`DocumentRenderer`] seam. Conversion is
//! the expensive step of a generation request, so it runs under a bounded
//! semaphore and a per-call timeout.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tera::{Context, Tera};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Register custom Tera filters used by invoice templates.
///
/// - `format`: printf-style formatting, e.g. `"%.2f" | format(value=price)`
/// - `money`:  2-decimal rounding, e.g. `amount | money`; accepts numbers and
///   decimal strings (monetary values are serialized as strings)
pub fn register_template_filters(tera: &mut Tera) {
    tera.register_filter("format", tera_format_filter);
    tera.register_filter("money", tera_money_filter);
}

fn value_as_f64(value: &tera::Value) -> f64 {
    match value {
        tera::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        tera::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Implements printf-style `format` filter for Tera.
/// Usage: `"%.2f" | format(value=some_number)`
fn tera_format_filter(
    value: &tera::Value,
    args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let format_str = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("format filter expects a string input"))?;

    let val = args
        .get("value")
        .ok_or_else(|| tera::Error::msg("format filter requires a 'value' argument"))?;
    let num = value_as_f64(val);

    // Parse %.<N>f patterns
    let result = if let Some(rest) = format_str.strip_prefix("%.") {
        if let Some(precision_str) = rest.strip_suffix('f') {
            let precision: usize = precision_str.parse().unwrap_or(2);
            format!("{:.*}", precision, num)
        } else {
            format!("{}", num)
        }
    } else {
        format!("{}", num)
    };

    Ok(tera::Value::String(result))
}

fn tera_money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    Ok(tera::Value::String(format!("{:.2}", value_as_f64(value))))
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("template error: {0}")]
    Template(String),
    #[error("conversion error: {0}")]
    Conversion(String),
    #[error("wkhtmltopdf not found")]
    WkhtmltopdfNotFound,
    #[error("conversion timed out after {0}s")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTML to PDF conversion seam. The production implementation shells out to
/// wkhtmltopdf; tests substitute a stub.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn html_to_pdf(&self, html: &str) -> Result<Vec<u8>, PdfError>;
}

pub struct WkhtmltopdfRenderer {
    binary_path: Option<String>,
    permits: Semaphore,
    timeout_secs: u64,
}

impl WkhtmltopdfRenderer {
    /// Resolve the wkhtmltopdf binary (explicit path or PATH lookup). A
    /// missing binary is reported per-request, not at construction, so the
    /// server still boots on hosts without the engine.
    pub fn new(explicit_path: Option<&str>, rendus_simultanes: u32, timeout_secs: u64) -> Self {
        let binary_path = explicit_path.map(str::to_string).or_else(|| {
            which::which("wkhtmltopdf").ok().map(|path| path.to_string_lossy().to_string())
        });

        match &binary_path {
            Some(path) => info!(path = %path, "wkhtmltopdf found"),
            None => warn!("wkhtmltopdf not found in PATH - PDF conversion will fail until installed"),
        }

        Self {
            binary_path,
            permits: Semaphore::new(rendus_simultanes.max(1) as usize),
            timeout_secs,
        }
    }

    async fn convert(&self, html: &str, binary_path: &str) -> Result<Vec<u8>, PdfError> {
        // Write HTML to temp file
        let temp_dir = std::env::temp_dir();
        let html_path = temp_dir.join(format!("facture_{}.html", uuid::Uuid::new_v4()));
        let pdf_path = temp_dir.join(format!("facture_{}.pdf", uuid::Uuid::new_v4()));

        tokio::fs::write(&html_path, html).await?;

        let output = Command::new(binary_path)
            .arg("--page-size")
            .arg("A4")
            .arg("--margin-top")
            .arg("10mm")
            .arg("--margin-bottom")
            .arg("10mm")
            .arg("--margin-left")
            .arg("10mm")
            .arg("--margin-right")
            .arg("10mm")
            .arg("--encoding")
            .arg("utf-8")
            .arg("--enable-local-file-access")
            .arg(&html_path)
            .arg(&pdf_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(stderr = %stderr, "wkhtmltopdf failed");
            let _ = tokio::fs::remove_file(&html_path).await;
            return Err(PdfError::Conversion(stderr.to_string()));
        }

        let pdf_bytes = tokio::fs::read(&pdf_path).await?;

        let _ = tokio::fs::remove_file(&html_path).await;
        let _ = tokio::fs::remove_file(&pdf_path).await;

        info!(size = pdf_bytes.len(), "PDF generated successfully");

        Ok(pdf_bytes)
    }
}

#[async_trait]
impl DocumentRenderer for WkhtmltopdfRenderer {
    async fn html_to_pdf(&self, html: &str) -> Result<Vec<u8>, PdfError> {
        let binary_path = self.binary_path.as_deref().ok_or(PdfError::WkhtmltopdfNotFound)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| PdfError::Conversion("render pool closed".to_string()))?;

        tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            self.convert(html, binary_path),
        )
        .await
        .map_err(|_| PdfError::Timeout(self.timeout_secs))?
    }
}

/// Tera-backed renderer for the invoice document.
pub struct FactureRenderer {
    tera: Tera,
}

impl FactureRenderer {
    /// Load templates from the configured directory, falling back to the
    /// embedded invoice template when the directory is absent or incomplete.
    pub fn new(template_dir: &str) -> Result<Self, PdfError> {
        let mut tera = match Tera::new(&format!("{}/**/*", template_dir)) {
            Ok(tera) => tera,
            Err(error) => {
                warn!(error = %error, "failed to load invoice templates from filesystem, using embedded templates");
                Tera::default()
            }
        };
        register_template_filters(&mut tera);

        let has_facture = tera.get_template_names().any(|name| name == "facture.html.tera");
        if !has_facture {
            tera.add_raw_template(
                "facture.html.tera",
                include_str!("../../../templates/factures/facture.html.tera"),
            )
            .map_err(|error| PdfError::Template(error.to_string()))?;
        }

        Ok(Self { tera })
    }

    /// Embedded-templates-only renderer (used by tests).
    pub fn with_embedded_templates() -> Self {
        let mut tera = Tera::default();
        register_template_filters(&mut tera);

        tera.add_raw_template(
            "facture.html.tera",
            include_str!("../../../templates/factures/facture.html.tera"),
        )
        .expect("embedded facture template must parse");

        Self { tera }
    }

    /// Render the invoice HTML from the assembled display context.
    pub fn render_facture(&self, donnees: &serde_json::Value) -> Result<String, PdfError> {
        let mut context = Context::new();
        for cle in ["facture", "devis", "entreprise", "client", "contact", "lignes", "totaux"] {
            context.insert(
                cle,
                &donnees.get(cle).cloned().unwrap_or(serde_json::Value::Null),
            );
        }
        context.insert(
            "couleur",
            &donnees.get("couleur").cloned().unwrap_or(serde_json::json!("#1d4ed8")),
        );

        self.tera
            .render("facture.html.tera", &context)
            .map_err(|error| PdfError::Template(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{DocumentRenderer, FactureRenderer, PdfError, WkhtmltopdfRenderer};

    fn donnees_minimales() -> serde_json::Value {
        serde_json::json!({
            "facture": {
                "numero": "FAC-2026-0001",
                "type_facture": "unique",
                "type_libelle": "Facture",
                "date_emission": "05/08/2026",
                "date_echeance": "04/09/2026",
                "conditions_paiement": "Paiement a 30 jours",
                "montant_ht": "2300",
                "montant_tva": "460",
                "montant_ttc": "2760",
            },
            "devis": { "numero": "DEV-2026-0001" },
            "entreprise": { "nom": "Studio Garnier", "siret": "123 456 789 00010" },
            "client": { "nom": "Atelier Brun", "ville": "Lyon" },
            "contact": { "nom_complet": "Claire Brun" },
            "lignes": [
                {
                    "description": "Developpement du site",
                    "quantite": "2",
                    "prix_unitaire": "1000",
                    "remise_pourcent": "10",
                    "total_ht": "1800",
                }
            ],
            "totaux": { "total_ht": "2300", "tva": "460", "total_ttc": "2760", "taux_tva": "20" },
        })
    }

    #[test]
    fn embedded_template_renders_invoice_fields() {
        let renderer = FactureRenderer::with_embedded_templates();
        let html = renderer.render_facture(&donnees_minimales()).expect("render");

        assert!(html.contains("FAC-2026-0001"));
        assert!(html.contains("Atelier Brun"));
        assert!(html.contains("Studio Garnier"));
        assert!(html.contains("Developpement du site"));
        assert!(html.contains("2300.00"));
    }

    #[test]
    fn render_survives_a_blank_company_profile() {
        let renderer = FactureRenderer::with_embedded_templates();
        let mut donnees = donnees_minimales();
        donnees["entreprise"] = serde_json::json!({});

        let html = renderer.render_facture(&donnees).expect("render");
        assert!(html.contains("FAC-2026-0001"));
    }

    #[test]
    fn money_filter_accepts_decimal_strings() {
        let renderer = FactureRenderer::with_embedded_templates();
        let mut donnees = donnees_minimales();
        donnees["facture"]["montant_ttc"] = serde_json::json!("2760.5");

        let html = renderer.render_facture(&donnees).expect("render");
        assert!(html.contains("2760.50"));
    }

    #[tokio::test]
    async fn conversion_without_a_binary_reports_not_found() {
        let renderer = WkhtmltopdfRenderer {
            binary_path: None,
            permits: tokio::sync::Semaphore::new(1),
            timeout_secs: 5,
        };

        let error = renderer.html_to_pdf("<html></html>").await.expect_err("must fail");
        assert!(matches!(error, PdfError::WkhtmltopdfNotFound));
    }
}
