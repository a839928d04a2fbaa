//! Loopback redirect listener
//!
//! A small actor that receives exactly one OAuth redirect on
//! `127.0.0.1:<random port>`. The browser hits it after consent; the login
//! flow polls for the result rather than blocking on the server.
//!
//! States: `Listening` until a redirect carrying `code` or `error` arrives,
//! then `ResultReady`. Later redirects are answered but not recorded.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Query parameters of the redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackResult {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    ResultReady,
}

type ResultSlot = Arc<Mutex<Option<CallbackResult>>>;

const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Authentication Complete</title>
    <style>
        body {
            font-family: system-ui, -apple-system, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f8f9fa;
        }
        .container {
            text-align: center;
            padding: 40px;
            background: white;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0,0,0,0.1);
        }
        .success { color: #059669; }
        h1 { margin: 0 0 16px; font-size: 24px; }
        p { color: #6b7280; margin: 0; }
    </style>
</head>
<body>
    <div class="container">
        <h1 class="success">Authentication Successful</h1>
        <p>You can close this window and return to the terminal.</p>
    </div>
    <script>
        setTimeout(function() { window.close(); }, 1500);
    </script>
</body>
</html>"#;

/// Grace period for in-flight responses when stopping.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

fn error_page(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>Authentication Error</title></head>
<body style="font-family: sans-serif; text-align: center; padding: 40px;">
<h1 style="color: #dc2626;">Authentication Failed</h1>
<p>Error: {}</p>
</body></html>"#,
        html_escape(message)
    )
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the redirect router. Exposed for in-process tests.
pub fn build_callback_router(slot: Arc<Mutex<Option<CallbackResult>>>) -> Router {
    Router::new()
        .route("/", get(handle_callback))
        .with_state(slot)
}

/// GET /: record the first redirect and show the outcome to the user.
async fn handle_callback(
    State(slot): State<ResultSlot>,
    Query(params): Query<CallbackResult>,
) -> Response {
    if params.code.is_none() && params.error.is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("missing authorization code")),
        )
            .into_response();
    }

    debug!(
        code = params.code.is_some(),
        state = params.state.is_some(),
        error = ?params.error,
        "callback received"
    );

    let page = match params.error {
        Some(ref error) => error_page(error),
        None => SUCCESS_HTML.to_string(),
    };

    {
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(params);
        } else {
            debug!("ignoring repeated callback");
        }
    }

    Html(page).into_response()
}

/// Running loopback listener. Dropping it shuts the server down.
pub struct CallbackListener {
    addr: SocketAddr,
    slot: ResultSlot,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallbackListener {
    /// Bind `127.0.0.1` on an OS-assigned port and start serving.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let slot: ResultSlot = Arc::new(Mutex::new(None));
        let router = build_callback_router(slot.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "callback listener stopped with error");
            }
        });

        debug!(port = addr.port(), "callback listener started");
        Ok(Self {
            addr,
            slot,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Redirect URI to register with the authorization request.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    pub fn state(&self) -> ListenerState {
        if self.lock_slot().is_some() {
            ListenerState::ResultReady
        } else {
            ListenerState::Listening
        }
    }

    /// The recorded redirect, or `None` while still listening.
    pub fn poll_result(&self) -> Option<CallbackResult> {
        self.lock_slot().clone()
    }

    /// Forget any recorded redirect so the listener can serve a new attempt.
    pub fn reset(&self) {
        *self.lock_slot() = None;
    }

    /// Shut the server down and wait briefly for it to finish. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(STOP_TIMEOUT, task).await.is_err() {
                warn!("callback listener did not stop in time");
            }
            debug!(port = self.addr.port(), "callback listener stopped");
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<CallbackResult>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
