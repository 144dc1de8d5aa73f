use santa_core::RedemptionCode;
use tracing::{info, warn};

use crate::adapter::StoreAdapter;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RedeemError {
    #[error("code required")]
    EmptyCode,
    /// Never issued and already redeemed are deliberately the same answer.
    #[error("code not found or already used")]
    NotFound,
    #[error("verification error: {0}")]
    Verification(#[source] StoreError),
}

/// Reveals the receiver behind `input` and deletes the record.
///
/// Read and delete are two separate store calls, so two redeemers racing on
/// the same code can both see the receiver.
pub async fn redeem(adapter: &StoreAdapter, input: &str) -> Result<String, RedeemError> {
    let code = RedemptionCode::normalize(input).map_err(|_| RedeemError::EmptyCode)?;
    if !code.is_well_formed() {
        return Err(RedeemError::NotFound);
    }

    let record = adapter
        .fetch(&code)
        .await
        .map_err(RedeemError::Verification)?
        .ok_or(RedeemError::NotFound)?;

    // The receiver is already revealed; a failed delete only leaves the code
    // redeemable again.
    if let Err(err) = adapter.remove(&code).await {
        warn!(code = %code.masked(), error = %err, "redeemed code could not be deleted");
    }

    info!(code = %code.masked(), sorteo = %record.sorteo_id, "code redeemed");
    Ok(record.receiver)
}
