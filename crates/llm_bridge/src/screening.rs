//! Mandatory local sensitivity screening
//!
//! Every analysis request is classified by the designated local provider
//! before any routing decision. A failed or unreadable screening call
//! counts as sensitive.

use crate::provider::{Provider, ProviderError};
use core_pipeline::SensitivityVerdict;

/// Fixed instruction sent to the local provider
pub const SCREENING_INSTRUCTION: &str = "Does this content contain personal, financial, medical, \
or otherwise sensitive information? Sensitive means PII (SSN, account numbers, passwords, \
medical details, financial details) or content that is clearly private in nature \
(health, legal, intimate).";

pub const SENSITIVE_LABEL: &str = "SENSITIVE";
pub const CLEAN_LABEL: &str = "CLEAN";

/// Ask the local provider whether `content` may leave the machine
///
/// Errors are returned untouched; [`verdict_or_fail_closed`] applies the
/// fail-closed policy.
pub async fn screen(provider: &dyn Provider, content: &str) -> Result<SensitivityVerdict, ProviderError> {
    let classification = provider
        .classify(SCREENING_INSTRUCTION, content, &[SENSITIVE_LABEL, CLEAN_LABEL])
        .await?;

    let verdict = match classification.label.as_deref() {
        Some(CLEAN_LABEL) => SensitivityVerdict::new(false, classification.rationale, provider.name()),
        Some(_) => SensitivityVerdict::new(true, classification.rationale, provider.name()),
        None => SensitivityVerdict::new(
            true,
            format!("ambiguous screening answer: {}", classification.rationale),
            provider.name(),
        ),
    };
    Ok(verdict)
}

/// Screen, treating any failure as sensitive
pub async fn verdict_or_fail_closed(provider: &dyn Provider, content: &str) -> SensitivityVerdict {
    match screen(provider, content).await {
        Ok(verdict) => verdict,
        Err(e) => {
            tracing::warn!(
                provider = provider.name(),
                error = %e,
                "screening unavailable, keeping content local"
            );
            SensitivityVerdict::screening_unavailable(provider.name())
        }
    }
}
