//! The enrichment contract.

use hazard_map_database_models::Prediction;
use hazard_map_hazard_models::HazardAttributes;

/// Why a prediction could not be made.
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    /// The model rejected or failed on the input.
    #[error("Prediction failed: {message}")]
    Prediction { message: String },

    /// None of the attributes the model needs are present.
    #[error("No usable input attributes")]
    NoInput,
}

/// Predicts a risk score from a feature's hazard attributes.
///
/// Called from a blocking worker, once per newly created feature.
pub trait Enricher: Send + Sync {
    /// # Errors
    ///
    /// Returns [`EnrichError`] if no prediction can be made for `attributes`.
    fn predict(&self, attributes: &HazardAttributes) -> Result<Prediction, EnrichError>;
}

impl<F> Enricher for F
where
    F: Fn(&HazardAttributes) -> Result<Prediction, EnrichError> + Send + Sync,
{
    fn predict(&self, attributes: &HazardAttributes) -> Result<Prediction, EnrichError> {
        self(attributes)
    }
}
