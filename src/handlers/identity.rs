use axum::Json;
use tracing::instrument;

use crate::middleware::Identity;
use crate::models::IdentityResponse;

/// Echo the identity the authenticator attached to this request.
///
/// Requires a valid `X-API-Key`; the extractor rejects with 401 when no
/// identity is present.
#[instrument]
pub async fn current_identity(identity: Identity) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        principal: identity.principal,
        role: identity.role.as_str(),
    })
}
