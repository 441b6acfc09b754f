use identity_sdk::DischargeToken;
use idm_bakery::{BakeryError, Op, encode_bundle};
use serde::{Deserialize, Serialize};

use crate::domain::minter::DischargeRequiredResponse;
use crate::domain::service::LoginMethod;

pub const DISCHARGE_REQUIRED: &str = "discharge-required";
pub const INTERACTION_REQUIRED: &str = "interaction-required";

/// An operation as sent by clients: `{entity: "u-bob", action: "read"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDto {
    pub entity: String,
    pub action: String,
}

impl From<OperationDto> for Op {
    fn from(dto: OperationDto) -> Self {
        Op::new(dto.entity, dto.action)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    pub operations: Vec<OperationDto>,
}

/// Body of a 401 telling the client which macaroon to discharge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DischargeRequiredBody {
    pub code: String,
    pub message: String,
    /// The macaroon to discharge, as an encoded bundle.
    pub macaroon: String,
    pub macaroon_path: String,
    #[serde(rename = "waitURL")]
    pub wait_url: String,
    #[serde(rename = "visitURL")]
    pub visit_url: String,
    pub cookie_name_suffix: String,
}

impl DischargeRequiredBody {
    /// # Errors
    ///
    /// [`BakeryError`] if the macaroon cannot be encoded.
    pub fn from_response(resp: &DischargeRequiredResponse) -> Result<Self, BakeryError> {
        Ok(Self {
            code: DISCHARGE_REQUIRED.to_owned(),
            message: "discharge required".to_owned(),
            macaroon: encode_bundle(std::slice::from_ref(&resp.macaroon))?,
            macaroon_path: resp.macaroon_path.clone(),
            wait_url: resp.wait_url.clone(),
            visit_url: resp.visit_url.clone(),
            cookie_name_suffix: resp.cookie_name_suffix.to_owned(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModifyGroupsRequest {
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupsResponse {
    pub groups: Vec<String>,
}

/// The rendezvous `id` query parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitResponse {
    pub discharge_token: DischargeToken,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DischargeRequest {
    /// Third-party caveat id to discharge.
    pub id: String,
    #[serde(default)]
    pub token: Option<DischargeToken>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DischargeResponse {
    /// The discharge, as an encoded bundle.
    pub macaroon: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRequiredBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "visitURL")]
    pub visit_url: String,
    #[serde(rename = "waitURL")]
    pub wait_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginMethodDto {
    pub name: String,
    pub description: String,
    pub interactive: bool,
    pub url: String,
}

impl From<LoginMethod> for LoginMethodDto {
    fn from(m: LoginMethod) -> Self {
        Self {
            name: m.name,
            description: m.description,
            interactive: m.interactive,
            url: m.url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginMethodsResponse {
    pub methods: Vec<LoginMethodDto>,
}
