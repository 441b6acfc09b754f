//! Static identity provider plugin.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use identity_sdk::{
    IdentityProvider, IdentityRecord, InitParams, LoginMethod, LoginOutcome, LoginRequest,
    LoginResponse, ProviderError, ProviderParams,
};
use tracing::{info, warn};

use crate::domain::service::{login_failed_page, login_form};
use crate::domain::{Credentials, Service};

const INVALID_CREDENTIALS: &str = "invalid username or password";

/// Builds the provider from a `static` declaration.
///
/// # Errors
///
/// Fails for any other provider type.
pub fn factory(params: &ProviderParams) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    match params {
        ProviderParams::Static(p) => Ok(Arc::new(StaticIdentityProvider::new(Service::from_params(p)))),
        other => anyhow::bail!(
            "static identity provider cannot be built from \"{}\" parameters",
            other.kind()
        ),
    }
}

pub struct StaticIdentityProvider {
    service: Service,
    params: OnceLock<InitParams>,
}

impl StaticIdentityProvider {
    #[must_use]
    pub fn new(service: Service) -> Self {
        Self {
            service,
            params: OnceLock::new(),
        }
    }

    fn login_url(prefix: &str, wait_id: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("id", wait_id)
            .finish();
        format!("{prefix}?{query}")
    }

    fn form(&self, params: &InitParams, wait_id: &str, message: Option<&str>) -> String {
        login_form(
            self.service.description(),
            &Self::login_url(&params.url_prefix, wait_id),
            message,
        )
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn description(&self) -> &str {
        self.service.description()
    }

    fn interactive(&self) -> bool {
        true
    }

    async fn init(&self, params: InitParams) -> anyhow::Result<()> {
        info!(provider = self.service.name(), "initializing static identity provider");
        self.params
            .set(params)
            .map_err(|_| anyhow::anyhow!("static identity provider initialized twice"))
    }

    fn url(&self, wait_id: &str) -> String {
        let prefix = self
            .params
            .get()
            .map_or("", |p| p.url_prefix.as_str());
        Self::login_url(prefix, wait_id)
    }

    async fn handle(&self, req: LoginRequest) -> LoginResponse {
        let Some(params) = self.params.get() else {
            return LoginResponse::error(503, "identity provider not initialized");
        };
        let Some(wait_id) = req.wait_id.as_deref().filter(|id| !id.is_empty()) else {
            return LoginResponse::error(400, "missing login rendezvous id");
        };

        match req.method {
            LoginMethod::Get => LoginResponse::ok(self.form(params, wait_id, None)),
            LoginMethod::Post => {
                let Some(creds) = Credentials::from_form(&req.form) else {
                    return LoginResponse::error(
                        400,
                        self.form(params, wait_id, Some("username and password required")),
                    );
                };
                let outcome = match self.service.authenticate(creds) {
                    Some(record) => {
                        info!(provider = self.service.name(), username = %record.username, "static login succeeded");
                        LoginOutcome::Success(record)
                    }
                    None => {
                        warn!(provider = self.service.name(), user = creds.username, "static login rejected");
                        LoginOutcome::Failure(INVALID_CREDENTIALS.to_owned())
                    }
                };
                let succeeded = matches!(outcome, LoginOutcome::Success(_));
                if let Err(e) = params.completer.complete(wait_id, outcome).await {
                    warn!(error = %e, wait_id, "cannot complete login rendezvous");
                    return LoginResponse::error(409, format!("login cannot be completed: {e}"));
                }
                if succeeded {
                    LoginResponse::ok("<html><body><p>Login successful. You may close this window.</p></body></html>")
                } else {
                    LoginResponse::error(
                        401,
                        login_failed_page(self.service.description(), INVALID_CREDENTIALS),
                    )
                }
            }
        }
    }

    async fn get_groups(&self, identity: &IdentityRecord) -> Result<Vec<String>, ProviderError> {
        self.service.groups(identity)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use identity_sdk::{
        IdentityError, IdentityStore, MeetingError, StaticParams, StaticUser, StoreError,
        VisitCompleter,
    };
    use parking_lot::Mutex;
    use secrecy::SecretString;

    use super::*;

    #[derive(Default)]
    struct RecordingCompleter {
        calls: Mutex<Vec<(String, LoginOutcome)>>,
    }

    #[async_trait]
    impl VisitCompleter for RecordingCompleter {
        async fn complete(&self, wait_id: &str, outcome: LoginOutcome) -> Result<(), IdentityError> {
            let mut calls = self.calls.lock();
            if calls.iter().any(|(id, _)| id == wait_id) {
                return Err(MeetingError::AlreadyCompleted(wait_id.to_owned()).into());
            }
            calls.push((wait_id.to_owned(), outcome));
            Ok(())
        }
    }

    struct NoStore;

    #[async_trait]
    impl IdentityStore for NoStore {
        async fn identity(&self, username: &str) -> Result<IdentityRecord, StoreError> {
            Err(StoreError::NotFound(username.to_owned()))
        }

        async fn upsert_identity(&self, _record: IdentityRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn modify_groups(
            &self,
            username: &str,
            _add: &[String],
            _remove: &[String],
        ) -> Result<IdentityRecord, StoreError> {
            Err(StoreError::NotFound(username.to_owned()))
        }
    }

    fn static_params() -> ProviderParams {
        ProviderParams::Static(StaticParams {
            name: "static".to_owned(),
            description: Some("Development users".to_owned()),
            domain: Some("dev".to_owned()),
            users: BTreeMap::from([(
                "alice".to_owned(),
                StaticUser {
                    password: SecretString::from("alicepw".to_owned()),
                    name: None,
                    email: None,
                    groups: vec!["devs".to_owned()],
                },
            )]),
        })
    }

    async fn provider() -> (Arc<dyn IdentityProvider>, Arc<RecordingCompleter>) {
        let provider = factory(&static_params()).unwrap();
        let completer = Arc::new(RecordingCompleter::default());
        provider
            .init(InitParams {
                store: Arc::new(NoStore),
                completer: completer.clone(),
                url_prefix: "https://idm.test/login/static".to_owned(),
            })
            .await
            .unwrap();
        (provider, completer)
    }

    fn post(wait_id: &str, username: &str, password: &str) -> LoginRequest {
        LoginRequest::post(
            Some(wait_id),
            HashMap::from([
                ("username".to_owned(), username.to_owned()),
                ("password".to_owned(), password.to_owned()),
            ]),
        )
    }

    #[test]
    fn factory_rejects_other_types() {
        let Err(err) = factory(&ProviderParams::Usso) else {
            panic!("expected an error");
        };
        assert!(err.to_string().contains("\"usso\""));
    }

    #[tokio::test]
    async fn url_carries_wait_id() {
        let (provider, _) = provider().await;
        assert_eq!(provider.url("w1"), "https://idm.test/login/static?id=w1");
        assert_eq!(provider.name(), "static");
        assert_eq!(provider.description(), "Development users");
        assert!(provider.interactive());
    }

    #[tokio::test]
    async fn init_twice_fails() {
        let (provider, completer) = provider().await;
        let again = provider
            .init(InitParams {
                store: Arc::new(NoStore),
                completer,
                url_prefix: "https://idm.test/login/static".to_owned(),
            })
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn get_renders_form() {
        let (provider, completer) = provider().await;

        let LoginResponse::Html { status, body } = provider.handle(LoginRequest::get(Some("w1"))).await
        else {
            panic!("expected html");
        };
        assert_eq!(status, 200);
        assert!(body.contains("<form method=\"post\" action=\"https://idm.test/login/static?id=w1\">"));
        assert!(completer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_wait_id_is_bad_request() {
        let (provider, _) = provider().await;
        let resp = provider.handle(LoginRequest::get(None)).await;
        assert!(matches!(resp, LoginResponse::Html { status: 400, .. }));
    }

    #[tokio::test]
    async fn valid_post_completes_with_success() {
        let (provider, completer) = provider().await;

        let resp = provider.handle(post("w1", "alice", "alicepw")).await;
        assert!(matches!(resp, LoginResponse::Html { status: 200, .. }));

        let calls = completer.calls.lock();
        assert_eq!(calls.len(), 1);
        let (wait_id, LoginOutcome::Success(record)) = &calls[0] else {
            panic!("expected success");
        };
        assert_eq!(wait_id, "w1");
        assert_eq!(record.username, "alice@dev");
        assert_eq!(record.external_id.as_deref(), Some("static:alice"));
        assert_eq!(record.groups, vec!["devs"]);
    }

    #[tokio::test]
    async fn wrong_password_completes_with_failure() {
        let (provider, completer) = provider().await;

        let LoginResponse::Html { status, body } = provider.handle(post("w1", "alice", "nope")).await
        else {
            panic!("expected html");
        };
        assert_eq!(status, 401);
        assert!(body.contains(INVALID_CREDENTIALS));
        assert!(!body.contains("<form"), "a closed rendezvous must not offer a retry");
        assert_eq!(
            completer.calls.lock()[0].1,
            LoginOutcome::Failure(INVALID_CREDENTIALS.to_owned())
        );
    }

    #[tokio::test]
    async fn replayed_post_is_conflict() {
        let (provider, _) = provider().await;

        provider.handle(post("w1", "alice", "alicepw")).await;
        let resp = provider.handle(post("w1", "alice", "alicepw")).await;
        assert!(matches!(resp, LoginResponse::Html { status: 409, .. }));
    }

    #[tokio::test]
    async fn live_groups_come_from_table() {
        let (provider, _) = provider().await;
        let record = IdentityRecord::new("alice@dev").with_external_id("static:alice");
        assert_eq!(provider.get_groups(&record).await.unwrap(), vec!["devs"]);
    }
}
