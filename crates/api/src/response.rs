//! JSON envelope shared by every `/api/v1` handler.

use serde::Serialize;

/// Successful payloads are wrapped as `{ "data": ... }`; errors use the
/// `{ "error": ..., "code": ... }` shape from [`crate::error`].
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
