//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::handlers::users::UserProfile;

#[derive(ToSchema, Serialize, Debug)]
pub struct StatusResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct CliCodeResponse {
    /// Single-use login code, valid for ten minutes.
    pub code: String,
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CliExchangeRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CliExchangeResponse {
    /// Signed bearer token for non-browser clients.
    pub token: String,
    pub login: String,
    pub expires_in: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_response_omits_missing_user() {
        let response = StatusResponse {
            authenticated: false,
            user: None,
        };
        let value = serde_json::to_value(&response).expect("json");
        assert_eq!(value, serde_json::json!({ "authenticated": false }));
    }

    #[test]
    fn cli_exchange_request_round_trips() {
        let request: CliExchangeRequest =
            serde_json::from_value(serde_json::json!({ "code": "abc123" })).expect("decode");
        assert_eq!(request.code, "abc123");
    }
}
