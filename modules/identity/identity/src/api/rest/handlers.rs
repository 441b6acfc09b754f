use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Extension, Form, Path, Query};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use identity_sdk::{AuthInfo, IdentityRecord, LoginRequest, LoginResponse, escape_html};
use idm_bakery::{Op, encode_bundle};
use tracing::field::Empty;

use crate::api::rest::dto::{
    AuthorizeRequest, DischargeRequest, DischargeResponse, GroupsResponse, INTERACTION_REQUIRED,
    IdQuery, InteractionRequiredBody, LoginMethodDto, LoginMethodsResponse, ModifyGroupsRequest,
    WaitResponse,
};
use crate::api::rest::error::{ApiError, ApiResult};
use crate::domain::discharger::DischargeOutcome;
use crate::domain::request::AuthRequest;
use crate::domain::service::IdentityService;

type Service = Extension<Arc<IdentityService>>;

#[tracing::instrument(skip_all, fields(ops = body.operations.len(), identity = Empty))]
pub async fn authorize(
    Extension(svc): Service,
    req: AuthRequest,
    Json(body): Json<AuthorizeRequest>,
) -> ApiResult<Json<AuthInfo>> {
    let ops: Vec<Op> = body.operations.into_iter().map(Op::from).collect();
    let info = svc.authorize(&req, &ops).await?;
    if let Some(identity) = &info.identity {
        tracing::Span::current().record("identity", identity.as_str());
    }
    Ok(Json(info))
}

#[tracing::instrument(skip(svc, req))]
pub async fn get_user(
    Extension(svc): Service,
    Path(username): Path<String>,
    req: AuthRequest,
) -> ApiResult<Json<IdentityRecord>> {
    Ok(Json(svc.get_identity(&req, &username).await?))
}

#[tracing::instrument(skip(svc, req))]
pub async fn get_groups(
    Extension(svc): Service,
    Path(username): Path<String>,
    req: AuthRequest,
) -> ApiResult<Json<GroupsResponse>> {
    let groups = svc.groups(&req, &username).await?;
    Ok(Json(GroupsResponse { groups }))
}

#[tracing::instrument(skip(svc, req, body))]
pub async fn modify_groups(
    Extension(svc): Service,
    Path(username): Path<String>,
    req: AuthRequest,
    Json(body): Json<ModifyGroupsRequest>,
) -> ApiResult<Json<GroupsResponse>> {
    let record = svc
        .modify_groups(&req, &username, &body.add, &body.remove)
        .await?;
    Ok(Json(GroupsResponse {
        groups: record.groups,
    }))
}

/// Lists the login methods for a rendezvous: JSON for API clients, a page
/// of links for browsers.
#[tracing::instrument(skip_all, fields(wait_id = %query.id))]
pub async fn login_methods(
    Extension(svc): Service,
    Query(query): Query<IdQuery>,
    headers: HeaderMap,
) -> Response {
    let methods: Vec<LoginMethodDto> = svc
        .login_methods(&query.id)
        .into_iter()
        .map(LoginMethodDto::from)
        .collect();
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));
    if wants_json {
        return Json(LoginMethodsResponse { methods }).into_response();
    }
    let items: String = methods
        .iter()
        .map(|m| {
            format!(
                "<li><a href=\"{}\">{}</a></li>",
                escape_html(&m.url),
                escape_html(&m.description)
            )
        })
        .collect();
    Html(format!("<html><body><h1>Log in</h1><ul>{items}</ul></body></html>")).into_response()
}

#[tracing::instrument(skip(svc, query))]
pub async fn login_get(
    Extension(svc): Service,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let mut login = LoginRequest::get(query.get("id").map(String::as_str));
    login.query = query;
    Ok(login_response(svc.login(&provider, login).await?))
}

#[tracing::instrument(skip(svc, query, form))]
pub async fn login_post(
    Extension(svc): Service,
    Path(provider): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Form(form): Form<HashMap<String, String>>,
) -> ApiResult<Response> {
    let mut login = LoginRequest::post(query.get("id").map(String::as_str), form);
    login.query = query;
    Ok(login_response(svc.login(&provider, login).await?))
}

fn login_response(resp: LoginResponse) -> Response {
    match resp {
        LoginResponse::Html { status, body } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Html(body),
        )
            .into_response(),
        LoginResponse::Redirect { location } => Redirect::to(&location).into_response(),
    }
}

/// Blocks until the rendezvous completes or the wait timeout elapses.
#[tracing::instrument(skip_all, fields(wait_id = %query.id))]
pub async fn wait(
    Extension(svc): Service,
    Query(query): Query<IdQuery>,
) -> ApiResult<Json<WaitResponse>> {
    let discharge_token = svc.wait(&query.id).await?;
    Ok(Json(WaitResponse { discharge_token }))
}

#[tracing::instrument(skip_all)]
pub async fn discharge(
    Extension(svc): Service,
    req: AuthRequest,
    Json(body): Json<DischargeRequest>,
) -> ApiResult<Response> {
    match svc.discharge(&req, &body.id, body.token.as_ref()).await? {
        DischargeOutcome::Discharged(m) => {
            let macaroon = encode_bundle(&[m]).map_err(|e| ApiError::internal(&e))?;
            Ok(Json(DischargeResponse { macaroon }).into_response())
        }
        DischargeOutcome::InteractionRequired {
            visit_url, wait_url, ..
        } => Ok((
            StatusCode::UNAUTHORIZED,
            Json(InteractionRequiredBody {
                code: INTERACTION_REQUIRED.to_owned(),
                message: "interaction required".to_owned(),
                visit_url,
                wait_url,
            }),
        )
            .into_response()),
    }
}
