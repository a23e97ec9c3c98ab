mod bridge;
mod config;
mod greeting;
mod openai;
mod retry;
mod session;
mod telephony;
mod tenants;
mod tools;
mod turn;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use bridge::registry::BridgeRegistry;
use config::Config;
use openai::chat::ChatClient;
use session::SessionRegistry;
use tenants::TenantDirectory;
use tools::collaborators::{HttpAppointments, HttpSms};
use tools::ToolExecutor;
use turn::TurnHandler;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Tenant directory, loaded once at startup.
    pub tenants: Arc<TenantDirectory>,
    /// Active webhook call sessions, keyed by call id.
    pub sessions: SessionRegistry,
    /// Per-turn conversation driver for the webhook path.
    pub turns: Arc<TurnHandler>,
    /// Active realtime bridge sessions.
    pub bridge_sessions: BridgeRegistry,
    /// Executes tool calls from the realtime agent.
    pub tools: Arc<ToolExecutor>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--version") => println!("switchboard {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(server());
        }
    }
}

fn print_usage() {
    println!("switchboard {VERSION}");
    println!("Voice core for an AI receptionist");
    println!();
    println!("Usage: switchboard [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --version   Print version");
    println!("  --help, -h  Print this help message");
    println!();
    println!("Without options, starts the server.");
}

async fn server() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting switchboard"
    );

    // Load the tenant directory
    let tenants = match TenantDirectory::load(Path::new(&config.tenants.file)) {
        Ok(dir) => {
            tracing::info!(file = %config.tenants.file, tenants = dir.len(), "Loaded tenants");
            Arc::new(dir)
        }
        Err(e) => {
            eprintln!("Failed to load tenants: {e}");
            std::process::exit(1);
        }
    };

    let state = build_state(config, tenants);
    let app = router(state.clone());

    // Start server
    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()
        .expect("Invalid server address");

    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}

fn build_state(config: Config, tenants: Arc<TenantDirectory>) -> AppState {
    let sessions = SessionRegistry::new(Duration::from_secs(
        config.webhook.session_timeout_secs,
    ));
    let model = Arc::new(ChatClient::new(
        config.openai.api_key.clone(),
        config.openai.chat_model.clone(),
    ));
    let turns = Arc::new(TurnHandler::new(
        model,
        sessions.clone(),
        config.webhook.clone(),
    ));
    let tools = Arc::new(ToolExecutor::new(
        Arc::new(HttpAppointments::new(
            config.collaborators.appointments_url.clone(),
            config.collaborators.token.clone(),
        )),
        Arc::new(HttpSms::new(
            config.collaborators.sms_url.clone(),
            config.collaborators.token.clone(),
        )),
    ));

    AppState {
        config,
        tenants,
        sessions,
        turns,
        bridge_sessions: BridgeRegistry::new(),
        tools,
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        // Provider call-lifecycle webhook
        .route("/telephony/events", post(telephony::webhook::handle_event))
        // Browser realtime bridge (WebSocket)
        .route("/bridge", get(bridge::handle_upgrade))
        // Health check
        .route("/health", get(health))
        // The bridge demo page is served from another origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::openai::chat::{ChatError, ChatMessage, ReplyModel};
    use crate::tenants::test_tenant;

    fn test_config() -> Config {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 0

            [openai]
            api_key = "sk-test"
        "#;
        toml::from_str(toml).expect("test config should parse")
    }

    fn test_directory() -> Arc<TenantDirectory> {
        let tenants = TenantDirectory::from_tenants(vec![test_tenant(
            "Acme HVAC",
            "+15551234567",
            "Thanks for calling Acme HVAC, how can I help?",
        )])
        .expect("test directory should load");
        Arc::new(tenants)
    }

    fn test_app() -> Router {
        router(build_state(test_config(), test_directory()))
    }

    /// Model that always answers with the same content.
    struct CannedModel(String);

    #[async_trait]
    impl ReplyModel for CannedModel {
        async fn reply(&self, _messages: &[ChatMessage]) -> Result<String, ChatError> {
            Ok(self.0.clone())
        }
    }

    /// App whose turn handler runs against a canned model instead of the
    /// network, with the state kept for inspection.
    fn scripted_app(reply: &str) -> (Router, AppState) {
        let mut state = build_state(test_config(), test_directory());
        state.turns = Arc::new(TurnHandler::new(
            Arc::new(CannedModel(reply.to_string())),
            state.sessions.clone(),
            state.config.webhook.clone(),
        ));
        (router(state.clone()), state)
    }

    async fn post_event(app: Router, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post("/telephony/events")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("handler should respond");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).expect("body should be JSON");
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = test_app()
            .oneshot(
                Request::get("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn known_number_gets_greeting_then_gather() {
        let body = r#"{"event":"call.initiated","call_id":"c1","to":"+15551234567"}"#;
        let (status, value) = post_event(test_app(), body).await;

        assert_eq!(status, StatusCode::OK);
        let set = value.as_array().expect("instruction array");
        assert_eq!(set[0]["instruction"], "say");
        assert_eq!(
            set[0]["text"],
            "Thanks for calling Acme HVAC, how can I help?"
        );
        assert_eq!(set[1]["instruction"], "gather");
    }

    #[tokio::test]
    async fn unknown_number_fails_closed_with_200() {
        let body = r#"{"event":"call.initiated","call_id":"c1","to":"+15550000000"}"#;
        let (status, value) = post_event(test_app(), body).await;

        assert_eq!(status, StatusCode::OK);
        let set = value.as_array().expect("instruction array");
        assert_eq!(set[0]["instruction"], "say");
        assert_eq!(set.last().expect("set should not be empty")["instruction"], "hangup");
    }

    #[tokio::test]
    async fn malformed_body_still_answers_200() {
        let (status, value) = post_event(test_app(), "{not json").await;

        assert_eq!(status, StatusCode::OK);
        assert!(value.as_array().is_some_and(|set| !set.is_empty()));
    }

    #[tokio::test]
    async fn gather_creates_session_and_replies() {
        let (app, state) =
            scripted_app(r#"{"reply":"We can do Tuesday.","action":"continue"}"#);
        let body = r#"{"event":"call.gather.ended","call_id":"abc123","to":"+15551234567","speech":"I need a quote"}"#;
        let (status, value) = post_event(app, body).await;

        assert_eq!(status, StatusCode::OK);
        let set = value.as_array().expect("instruction array");
        assert_eq!(set[0]["instruction"], "say");
        assert_eq!(set[0]["text"], "We can do Tuesday.");
        assert_eq!(set[1]["instruction"], "gather");
        // No lifecycle event preceded the gather; the session appears anyway
        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn hangup_releases_and_returns_empty_set() {
        let app = test_app();
        let body = r#"{"event":"call.hangup","call_id":"c1"}"#;
        let (status, value) = post_event(app, body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, serde_json::json!([]));
    }
}
