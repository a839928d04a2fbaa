//! Interactive sign-in
//!
//! Pure state machine: a redirect (or pasted input) becomes an event,
//! `handle_event` decides whether to exchange the code or abort. The
//! session executes the action against the engine.
//!
//! Two transports feed the machine. The loopback listener is preferred;
//! when it cannot bind, the user pastes the redirected URL (or just the
//! code) from a browser pointed at `http://localhost`.

use std::io::Write;
use std::time::Duration;

use iap_auth::{AuthorizationRequest, CredentialEngine, DEFAULT_REDIRECT_URI, TokenRecord};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::callback::{CallbackListener, CallbackResult, ListenerState};
use crate::error::{Error, Result};

/// How often the listener is polled for a redirect.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginState {
    /// Authorization URL handed out; waiting for the redirect
    Waiting {
        expected_state: String,
        redirect_uri: String,
    },
    /// Code accepted; exchange in progress
    Exchanging,
    /// Terminal: the attempt was abandoned
    Aborted,
}

#[derive(Debug)]
pub enum LoginEvent {
    /// Redirect parameters, from the listener or parsed from pasted input
    Redirect(CallbackResult),
    /// No redirect before the deadline
    Timeout { after_secs: u64 },
}

#[derive(Debug)]
pub enum LoginAction {
    /// Trade `code` for tokens
    Exchange { code: String, redirect_uri: String },
    /// Discard the verifier and fail with this error
    Abort(Error),
    /// Event does not apply in this state
    None,
}

/// Process one event. Provider errors win over everything else; a returned
/// `state` must match the one we sent. A redirect without `state` is
/// accepted so that a pasted bare code works.
pub fn handle_event(state: LoginState, event: LoginEvent) -> (LoginState, LoginAction) {
    match (state, event) {
        (
            LoginState::Waiting {
                expected_state,
                redirect_uri,
            },
            LoginEvent::Redirect(result),
        ) => {
            if let Some(error) = result.error {
                return (LoginState::Aborted, LoginAction::Abort(Error::Provider(error)));
            }
            if result.state.is_some_and(|s| s != expected_state) {
                return (LoginState::Aborted, LoginAction::Abort(Error::StateMismatch));
            }
            match result.code.filter(|c| !c.trim().is_empty()) {
                Some(code) => (
                    LoginState::Exchanging,
                    LoginAction::Exchange { code, redirect_uri },
                ),
                None => (
                    LoginState::Aborted,
                    LoginAction::Abort(Error::InvalidInput("no authorization code".into())),
                ),
            }
        }
        (LoginState::Waiting { .. }, LoginEvent::Timeout { after_secs }) => (
            LoginState::Aborted,
            LoginAction::Abort(Error::Timeout(after_secs)),
        ),
        (state, _) => (state, LoginAction::None),
    }
}

/// One authorization attempt against an engine.
pub struct LoginSession<'a> {
    engine: &'a CredentialEngine,
    request: AuthorizationRequest,
    state: LoginState,
}

impl<'a> LoginSession<'a> {
    /// Start an attempt with a fresh anti-CSRF state value.
    pub async fn begin(engine: &'a CredentialEngine, redirect_uri: &str) -> LoginSession<'a> {
        let csrf = uuid::Uuid::new_v4().simple().to_string();
        let request = engine.begin_authorization(redirect_uri, Some(&csrf)).await;
        LoginSession {
            engine,
            state: LoginState::Waiting {
                expected_state: csrf,
                redirect_uri: redirect_uri.to_string(),
            },
            request,
        }
    }

    pub fn authorization_url(&self) -> &str {
        &self.request.url
    }

    pub fn csrf_state(&self) -> Option<&str> {
        self.request.state.as_deref()
    }

    /// Feed the terminal event and carry out the resulting action.
    pub async fn finish(self, event: LoginEvent) -> Result<TokenRecord> {
        let (state, action) = handle_event(self.state, event);
        match action {
            LoginAction::Exchange { code, redirect_uri } => {
                debug_assert_eq!(state, LoginState::Exchanging);
                let record = self
                    .engine
                    .exchange_code(&code, &self.request.verifier, &redirect_uri)
                    .await?;
                Ok(record)
            }
            LoginAction::Abort(e) => {
                warn!(error = %e, "sign-in aborted");
                self.engine.abandon_authorization().await;
                Err(e)
            }
            LoginAction::None => {
                self.engine.abandon_authorization().await;
                Err(Error::InvalidInput(format!("unexpected event in state {state:?}")))
            }
        }
    }

    /// Drop the attempt without an event (input closed, I/O failure).
    pub async fn abandon(self) {
        self.engine.abandon_authorization().await;
    }
}

/// Poll the listener until a redirect arrives or `timeout` passes.
pub async fn wait_for_redirect(listener: &CallbackListener, timeout: Duration) -> LoginEvent {
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if listener.state() == ListenerState::ResultReady
            && let Some(result) = listener.poll_result()
        {
            return LoginEvent::Redirect(result);
        }
        if Instant::now() >= deadline {
            return LoginEvent::Timeout {
                after_secs: timeout.as_secs(),
            };
        }
    }
}

/// Read redirect parameters from what the user pasted: the full redirected
/// URL, a bare query string, or the code on its own.
pub fn parse_manual_input(input: &str) -> Result<CallbackResult> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("nothing was entered".into()));
    }

    let query = if input.starts_with("http://") || input.starts_with("https://") {
        let url = url::Url::parse(input).map_err(|e| Error::InvalidInput(e.to_string()))?;
        url.query().unwrap_or_default().to_string()
    } else if input.contains("code=") || input.contains("error=") {
        input.trim_start_matches('?').to_string()
    } else {
        return Ok(CallbackResult {
            code: Some(input.to_string()),
            ..CallbackResult::default()
        });
    };

    let mut result = CallbackResult::default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => result.code = Some(value.into_owned()),
            "state" => result.state = Some(value.into_owned()),
            "error" => result.error = Some(value.into_owned()),
            _ => {}
        }
    }
    if result.code.is_none() && result.error.is_none() {
        return Err(Error::InvalidInput("no `code` parameter found".into()));
    }
    Ok(result)
}

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub timeout: Duration,
    /// Skip the loopback listener and prompt for the redirected URL.
    pub manual: bool,
}

/// Sign in through the browser, falling back to manual entry when the
/// loopback listener cannot start.
pub async fn run_login(engine: &CredentialEngine, options: &LoginOptions) -> Result<TokenRecord> {
    let mut out = std::io::stderr();

    if !options.manual {
        match CallbackListener::start().await {
            Ok(mut listener) => {
                let result = login_with_listener(engine, &listener, options.timeout, &mut out).await;
                listener.stop().await;
                return result;
            }
            Err(e) => {
                warn!(error = %e, "could not start callback listener; falling back to manual sign-in");
            }
        }
    }

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    login_manual(engine, input, options.timeout, &mut out).await
}

async fn login_with_listener<W: Write>(
    engine: &CredentialEngine,
    listener: &CallbackListener,
    timeout: Duration,
    out: &mut W,
) -> Result<TokenRecord> {
    let session = LoginSession::begin(engine, &listener.redirect_uri()).await;
    writeln!(out, "Open this URL in your browser to sign in:\n\n  {}\n", session.authorization_url())?;
    writeln!(out, "Waiting for the browser redirect (up to {}s)...", timeout.as_secs())?;
    info!(
        redirect_uri = %listener.redirect_uri(),
        state = session.csrf_state().unwrap_or_default(),
        "waiting for redirect"
    );

    let event = wait_for_redirect(listener, timeout).await;
    session.finish(event).await
}

/// Manual flow: print the URL, read one line of pasted input.
pub async fn login_manual<R, W>(
    engine: &CredentialEngine,
    mut input: R,
    timeout: Duration,
    out: &mut W,
) -> Result<TokenRecord>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let session = LoginSession::begin(engine, DEFAULT_REDIRECT_URI).await;
    writeln!(out, "Open this URL in your browser to sign in:\n\n  {}\n", session.authorization_url())?;
    writeln!(
        out,
        "After approving, the browser lands on a page that fails to load.\n\
         Paste that page's full URL (or just the code) here:"
    )?;

    let mut line = String::new();
    let read = match tokio::time::timeout(timeout, input.read_line(&mut line)).await {
        Ok(read) => read,
        Err(_) => {
            return session
                .finish(LoginEvent::Timeout {
                    after_secs: timeout.as_secs(),
                })
                .await;
        }
    };
    match read {
        Ok(0) => {
            session.abandon().await;
            Err(Error::InvalidInput("input closed before a code was entered".into()))
        }
        Ok(_) => match parse_manual_input(&line) {
            Ok(result) => session.finish(LoginEvent::Redirect(result)).await,
            Err(e) => {
                session.abandon().await;
                Err(e)
            }
        },
        Err(e) => {
            session.abandon().await;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iap_auth::{AuthState, ClientRegistration, CredentialRegistry, EngineOptions, MemoryTokenStore, TokenStore};
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // {"email":"user@example.com","sub":"1234"}
    const ID_TOKEN: &str = "eyJhbGciOiJSUzI1NiJ9.eyJlbWFpbCI6InVzZXJAZXhhbXBsZS5jb20iLCJzdWIiOiIxMjM0In0.sig";

    fn waiting() -> LoginState {
        LoginState::Waiting {
            expected_state: "csrf-1".into(),
            redirect_uri: "http://127.0.0.1:8765".into(),
        }
    }

    fn redirect(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> LoginEvent {
        LoginEvent::Redirect(CallbackResult {
            code: code.map(str::to_owned),
            state: state.map(str::to_owned),
            error: error.map(str::to_owned),
        })
    }

    async fn engine(server: &MockServer) -> (CredentialEngine, Arc<MemoryTokenStore>) {
        let registration = ClientRegistration::with_endpoints(
            "client-123",
            "secret-456",
            "https://accounts.example.com/o/oauth2/auth",
            format!("{}/token", server.uri()),
        )
        .unwrap();
        let store = Arc::new(MemoryTokenStore::new());
        let engine = CredentialEngine::initialize(
            registration,
            store.clone(),
            EngineOptions {
                registry: Some(CredentialRegistry::new()),
                ..EngineOptions::default()
            },
        )
        .await;
        (engine, store)
    }

    async fn mount_success(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.access",
                "id_token": ID_TOKEN,
                "refresh_token": "1//refresh",
                "expires_in": 3600
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn matching_redirect_moves_to_exchanging() {
        let (state, action) = handle_event(waiting(), redirect(Some("4/abc"), Some("csrf-1"), None));
        assert_eq!(state, LoginState::Exchanging);
        match action {
            LoginAction::Exchange { code, redirect_uri } => {
                assert_eq!(code, "4/abc");
                assert_eq!(redirect_uri, "http://127.0.0.1:8765");
            }
            other => panic!("expected Exchange, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_state_aborts() {
        let (state, action) = handle_event(waiting(), redirect(Some("4/abc"), Some("forged"), None));
        assert_eq!(state, LoginState::Aborted);
        assert!(matches!(action, LoginAction::Abort(Error::StateMismatch)));
    }

    #[test]
    fn provider_error_wins_over_code() {
        let (state, action) =
            handle_event(waiting(), redirect(Some("4/abc"), Some("csrf-1"), Some("access_denied")));
        assert_eq!(state, LoginState::Aborted);
        match action {
            LoginAction::Abort(Error::Provider(msg)) => assert_eq!(msg, "access_denied"),
            other => panic!("expected provider abort, got {other:?}"),
        }
    }

    #[test]
    fn missing_state_is_accepted() {
        let (state, _) = handle_event(waiting(), redirect(Some("4/abc"), None, None));
        assert_eq!(state, LoginState::Exchanging);
    }

    #[test]
    fn blank_code_aborts() {
        let (state, action) = handle_event(waiting(), redirect(Some("  "), Some("csrf-1"), None));
        assert_eq!(state, LoginState::Aborted);
        assert!(matches!(action, LoginAction::Abort(Error::InvalidInput(_))));
    }

    #[test]
    fn timeout_aborts_with_duration() {
        let (state, action) = handle_event(waiting(), LoginEvent::Timeout { after_secs: 300 });
        assert_eq!(state, LoginState::Aborted);
        assert!(matches!(action, LoginAction::Abort(Error::Timeout(300))));
    }

    #[test]
    fn events_after_abort_are_ignored() {
        let (state, action) = handle_event(LoginState::Aborted, redirect(Some("late"), None, None));
        assert_eq!(state, LoginState::Aborted);
        assert!(matches!(action, LoginAction::None));
    }

    #[test]
    fn parse_full_redirect_url() {
        let result =
            parse_manual_input("  http://localhost/?state=s1&code=4%2F0Ab&scope=email%20openid\n").unwrap();
        assert_eq!(result.code.as_deref(), Some("4/0Ab"));
        assert_eq!(result.state.as_deref(), Some("s1"));
        assert!(result.error.is_none());
    }

    #[test]
    fn parse_query_string_and_error() {
        let result = parse_manual_input("?error=access_denied&state=s1").unwrap();
        assert_eq!(result.error.as_deref(), Some("access_denied"));
        assert!(result.code.is_none());
    }

    #[test]
    fn parse_bare_code() {
        let result = parse_manual_input("4/0AbCdEf\n").unwrap();
        assert_eq!(result.code.as_deref(), Some("4/0AbCdEf"));
        assert!(result.state.is_none());
    }

    #[test]
    fn parse_rejects_empty_and_codeless_urls() {
        assert!(matches!(parse_manual_input("  \n"), Err(Error::InvalidInput(_))));
        assert!(matches!(
            parse_manual_input("http://localhost/?state=s1"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn session_exchanges_code_from_loopback_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=4%2Fabc"))
            .and(body_string_contains("redirect_uri=http%3A%2F%2F127.0.0.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.access",
                "id_token": ID_TOKEN,
                "refresh_token": "1//refresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (engine, store) = engine(&server).await;

        let mut listener = CallbackListener::start().await.unwrap();
        let session = LoginSession::begin(&engine, &listener.redirect_uri()).await;
        let csrf = session.csrf_state().unwrap().to_string();
        assert!(session.authorization_url().contains(&format!("state={csrf}")));
        assert_eq!(engine.state().await, AuthState::Authorizing);

        let redirect_url = format!("{}/?code=4%2Fabc&state={csrf}", listener.redirect_uri());
        reqwest::get(redirect_url).await.unwrap();

        let event = wait_for_redirect(&listener, Duration::from_secs(5)).await;
        let record = session.finish(event).await.unwrap();
        listener.stop().await;

        assert_eq!(record.user_email.as_deref(), Some("user@example.com"));
        assert_eq!(engine.state().await, AuthState::Authenticated);
        assert_eq!(store.load().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn forged_state_discards_verifier_without_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (engine, store) = engine(&server).await;

        let session = LoginSession::begin(&engine, "http://127.0.0.1:9").await;
        let err = session
            .finish(redirect(Some("4/abc"), Some("forged"), None))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StateMismatch));
        assert_eq!(engine.state().await, AuthState::Unauthenticated);
        assert!(store.load().await.unwrap().is_none());
        // The verifier is gone, so a late code cannot be completed.
        assert!(engine.complete_authorization("4/abc", "http://127.0.0.1:9").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_redirect_times_out() {
        let listener = CallbackListener::start().await.unwrap();
        let event = wait_for_redirect(&listener, Duration::from_secs(3)).await;
        assert!(matches!(event, LoginEvent::Timeout { after_secs: 3 }));
    }

    #[tokio::test]
    async fn manual_login_with_bare_code() {
        let server = MockServer::start().await;
        mount_success(&server).await;
        let (engine, _store) = engine(&server).await;
        let mut out = Vec::new();

        let record = login_manual(&engine, &b"4/0AbCdEf\n"[..], Duration::from_secs(5), &mut out)
            .await
            .unwrap();

        assert_eq!(record.user_email.as_deref(), Some("user@example.com"));
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("redirect_uri=http%3A%2F%2Flocalhost"));
    }

    #[tokio::test]
    async fn manual_login_provider_error_aborts() {
        let server = MockServer::start().await;
        let (engine, _store) = engine(&server).await;
        let mut out = Vec::new();

        let err = login_manual(
            &engine,
            &b"http://localhost/?error=access_denied\n"[..],
            Duration::from_secs(5),
            &mut out,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Provider(ref e) if e == "access_denied"));
        assert_eq!(engine.state().await, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn manual_login_closed_input_abandons() {
        let server = MockServer::start().await;
        let (engine, _store) = engine(&server).await;
        let mut out = Vec::new();

        let err = login_manual(&engine, &b""[..], Duration::from_secs(5), &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(engine.state().await, AuthState::Unauthenticated);
    }

    #[tokio::test]
    async fn exchange_failure_carries_provider_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request"
            })))
            .mount(&server)
            .await;
        let (engine, store) = engine(&server).await;
        let mut out = Vec::new();

        let err = login_manual(&engine, &b"4/used\n"[..], Duration::from_secs(5), &mut out)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth(iap_auth::Error::Exchange { .. })));
        assert!(err.to_string().contains("invalid_grant"));
        assert!(store.load().await.unwrap().is_none());
    }
}
