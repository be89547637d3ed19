// OAuth2 for an installed application: client-secret loading, token
// refresh, and the browser consent flow with a loopback redirect.
//
// `obtain_credentials` is the only entry point the rest of the program
// needs. The network side sits behind `AuthProvider` so the decision logic
// (reuse, refresh or re-authorize) can be tested without a browser. The
// grants themselves go through the `oauth2` crate; only the loopback
// listener that catches the redirect is written here.

use crate::credentials::{CredentialStore, Credentials};
use crate::error::AuthError;
use crate::ui;
use crate::upload::TokenRefresh;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicTokenResponse};
use oauth2::reqwest::http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret as OAuthSecret, CsrfToken,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::cell::RefCell;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::time::Duration;
use url::Url;

#[cfg(test)]
use mockall::automock;

/// The only scope this program asks for.
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CONSOLE_REDIRECT_URI: &str = "http://localhost";
const REDIRECT_READ_TIMEOUT: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Authorization complete</title></head>\
<body><p>The authentication flow has completed. You may close this window.</p></body></html>";
const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><title>Authorization failed</title></head>\
<body><p>Authorization failed. Return to the terminal for details.</p></body></html>";

/// OAuth client registration, as downloaded from the cloud console.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AuthError::MissingClientSecret(path.to_path_buf()))
            }
            Err(e) => {
                return Err(AuthError::ReadClientSecret {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        Self::parse(path, &data)
    }

    fn parse(path: &Path, data: &str) -> Result<Self, AuthError> {
        let invalid = |source| AuthError::InvalidClientSecret {
            path: path.to_path_buf(),
            source,
        };
        let file: ClientSecretFile = serde_json::from_str(data).map_err(invalid)?;
        file.installed.or(file.web).ok_or_else(|| {
            invalid(<serde_json::Error as serde::de::Error>::custom(
                "expected an \"installed\" or \"web\" section",
            ))
        })
    }

    /// OAuth client for a consent round-trip ending at `redirect_uri`.
    fn client(&self, redirect_uri: &str) -> Result<BasicClient, AuthError> {
        let redirect = RedirectUrl::new(redirect_uri.to_string()).map_err(|source| {
            AuthError::Endpoint {
                url: redirect_uri.to_string(),
                source,
            }
        })?;
        Ok(oauth_client(
            &self.client_id,
            &self.client_secret,
            &self.auth_uri,
            &self.token_uri,
        )?
        .set_redirect_uri(redirect))
    }
}

/// Google expects the client credentials in the form body, not in a Basic
/// authorization header.
fn oauth_client(
    client_id: &str,
    client_secret: &str,
    auth_uri: &str,
    token_uri: &str,
) -> Result<BasicClient, AuthError> {
    let endpoint = |url: &str| {
        let url = url.to_string();
        move |source| AuthError::Endpoint { url, source }
    };
    let auth_url = AuthUrl::new(auth_uri.to_string()).map_err(endpoint(auth_uri))?;
    let token_url = TokenUrl::new(token_uri.to_string()).map_err(endpoint(token_uri))?;
    Ok(BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(OAuthSecret::new(client_secret.to_string())),
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody))
}

/// Network operations against the authorization server.
#[cfg_attr(test, automock)]
pub trait AuthProvider {
    /// Trade the refresh token in `creds` for a new access token.
    fn refresh(&self, creds: &Credentials) -> Result<Credentials, AuthError>;
    /// Run the interactive consent flow.
    fn authorize(&self, secret: &ClientSecret) -> Result<Credentials, AuthError>;
}

/// Produce credentials that are valid for [`UPLOAD_SCOPE`].
///
/// 1. Reuse the stored token if it is still valid.
/// 2. If it expired and carries a refresh token, refresh and persist it.
/// 3. Otherwise load the client secret (fatal if missing), run the consent
///    flow and persist the result.
pub fn obtain_credentials<P: AuthProvider + ?Sized>(
    store: &CredentialStore,
    client_secret_path: &Path,
    provider: &P,
) -> Result<Credentials, AuthError> {
    let now = Utc::now();
    if let Some(creds) = store.load() {
        if !creds.grants(UPLOAD_SCOPE) {
            log::info!("stored token does not grant the upload scope; re-authorizing");
        } else if creds.is_valid(now) {
            log::info!("using stored credentials from {}", store.path().display());
            return Ok(creds);
        } else if creds.is_expired(now) && creds.can_refresh() {
            log::info!("access token expired; refreshing");
            let refreshed = provider.refresh(&creds)?;
            store.save(&refreshed)?;
            return Ok(refreshed);
        } else {
            log::info!("stored token is unusable; re-authorizing");
        }
    }

    let secret = ClientSecret::load(client_secret_path)?;
    let creds = provider.authorize(&secret)?;
    store.save(&creds)?;
    Ok(creds)
}

/// Refreshes the credentials of a running upload when the server rejects
/// the access token. Every renewal is written back to the token file.
pub struct CredentialRenewal<'a, P: AuthProvider + ?Sized> {
    provider: &'a P,
    store: &'a CredentialStore,
    current: RefCell<Credentials>,
}

impl<'a, P: AuthProvider + ?Sized> CredentialRenewal<'a, P> {
    pub fn new(provider: &'a P, store: &'a CredentialStore, creds: Credentials) -> Self {
        CredentialRenewal {
            provider,
            store,
            current: RefCell::new(creds),
        }
    }
}

impl<P: AuthProvider + ?Sized> TokenRefresh for CredentialRenewal<'_, P> {
    fn refresh_access_token(&self) -> Result<String, AuthError> {
        let current = self.current.borrow().clone();
        if !current.can_refresh() {
            return Err(AuthError::Refresh(
                "the access token was rejected and no refresh token is stored".into(),
            ));
        }
        let fresh = self.provider.refresh(&current)?;
        self.store.save(&fresh)?;
        let token = fresh.token.clone();
        self.current.replace(fresh);
        Ok(token)
    }
}

/// How the authorization code gets back to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentMode {
    /// Loopback HTTP listener on an ephemeral port.
    LocalServer,
    /// The user pastes the redirected URL into the terminal.
    Console,
}

/// [`AuthProvider`] talking to Google's OAuth endpoints.
pub struct GoogleAuthProvider {
    mode: ConsentMode,
    open_browser: bool,
}

impl GoogleAuthProvider {
    pub fn new(mode: ConsentMode, open_browser: bool) -> Self {
        GoogleAuthProvider { mode, open_browser }
    }

    fn authorize_with_local_server(&self, secret: &ClientSecret) -> Result<Credentials, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(AuthError::Listener)?;
        let port = listener.local_addr().map_err(AuthError::Listener)?.port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        log::info!("waiting for the authorization redirect on {redirect_uri}");

        let client = secret.client(&redirect_uri)?;
        let (url, state, verifier) = authorization_request(&client);
        ui::show_consent_url(&url);
        if self.open_browser {
            if let Err(e) = webbrowser::open(url.as_str()) {
                log::warn!("could not open a browser: {e}");
            }
        }

        let response = wait_for_redirect(&listener)?;
        response.check_state(state.secret())?;
        exchange_code(&client, secret, response.code, verifier)
    }

    fn authorize_from_console(&self, secret: &ClientSecret) -> Result<Credentials, AuthError> {
        let client = secret.client(CONSOLE_REDIRECT_URI)?;
        let (url, state, verifier) = authorization_request(&client);
        ui::show_consent_url(&url);

        let pasted = ui::prompt_redirect_url()?;
        let response = parse_pasted_response(&pasted)?;
        response.check_state(state.secret())?;
        exchange_code(&client, secret, response.code, verifier)
    }
}

impl AuthProvider for GoogleAuthProvider {
    fn refresh(&self, creds: &Credentials) -> Result<Credentials, AuthError> {
        let refresh_token = creds
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::Refresh("no refresh token stored".into()))?;
        let client = oauth_client(
            &creds.client_id,
            &creds.client_secret,
            DEFAULT_AUTH_URI,
            &creds.token_uri,
        )?;
        let resp = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token))
            .request(http_client)
            .map_err(|e| AuthError::Refresh(describe_token_error(e)))?;
        let mut refreshed = credentials_from_response(
            &resp,
            creds.client_id.clone(),
            creds.client_secret.clone(),
            creds.token_uri.clone(),
            creds.refresh_token.clone(),
            Utc::now(),
        );
        if resp.scopes().is_none() {
            refreshed.scopes = creds.scopes.clone();
        }
        log::info!("access token refreshed");
        Ok(refreshed)
    }

    fn authorize(&self, secret: &ClientSecret) -> Result<Credentials, AuthError> {
        match self.mode {
            ConsentMode::LocalServer => self.authorize_with_local_server(secret),
            ConsentMode::Console => self.authorize_from_console(secret),
        }
    }
}

/// Consent URL with a fresh CSRF state and S256 PKCE pair.
fn authorization_request(client: &BasicClient) -> (Url, CsrfToken, PkceCodeVerifier) {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (url, state) = client
        .authorize_url(CsrfToken::new_random)
        .add_scope(Scope::new(UPLOAD_SCOPE.to_string()))
        .set_pkce_challenge(challenge)
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .url();
    (url, state, verifier)
}

fn exchange_code(
    client: &BasicClient,
    secret: &ClientSecret,
    code: String,
    verifier: PkceCodeVerifier,
) -> Result<Credentials, AuthError> {
    let resp = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request(http_client)
        .map_err(|e| AuthError::Exchange(describe_token_error(e)))?;
    Ok(credentials_from_response(
        &resp,
        secret.client_id.clone(),
        secret.client_secret.clone(),
        secret.token_uri.clone(),
        None,
        Utc::now(),
    ))
}

fn credentials_from_response(
    resp: &BasicTokenResponse,
    client_id: String,
    client_secret: String,
    token_uri: String,
    previous_refresh_token: Option<String>,
    now: DateTime<Utc>,
) -> Credentials {
    let scopes = match resp.scopes() {
        Some(scopes) => scopes.iter().map(|s| s.as_str().to_string()).collect(),
        None => vec![UPLOAD_SCOPE.to_string()],
    };
    Credentials {
        token: resp.access_token().secret().clone(),
        refresh_token: resp
            .refresh_token()
            .map(|t| t.secret().clone())
            .or(previous_refresh_token),
        token_uri,
        client_id,
        client_secret,
        scopes,
        expiry: resp
            .expires_in()
            .and_then(|d| ChronoDuration::from_std(d).ok())
            .map(|d| now + d),
    }
}

/// One line for the user; the server's own `error: description` when it
/// sent one.
fn describe_token_error<RE: std::error::Error + 'static>(err: RequestTokenError<RE, BasicErrorResponse>) -> String {
    match err {
        RequestTokenError::ServerResponse(resp) => resp.to_string(),
        RequestTokenError::Request(e) => match e.source() {
            Some(cause) => format!("{e}: {cause}"),
            None => e.to_string(),
        },
        RequestTokenError::Parse(e, body) => {
            format!("unreadable token response ({e}): {}", String::from_utf8_lossy(&body).trim())
        }
        RequestTokenError::Other(msg) => msg,
    }
}

/// What the authorization server sent back through the redirect.
#[derive(Debug, PartialEq)]
struct AuthorizationResponse {
    code: String,
    state: Option<String>,
}

impl AuthorizationResponse {
    /// A bare pasted code has no state to compare.
    fn check_state(&self, expected: &str) -> Result<(), AuthError> {
        match &self.state {
            Some(state) if state != expected => Err(AuthError::StateMismatch),
            _ => Ok(()),
        }
    }
}

/// `None` when the URL is not a redirect at all (for example a favicon request).
fn parse_redirect(url: &Url) -> Option<Result<AuthorizationResponse, AuthError>> {
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(error) = error {
        let msg = match description {
            Some(desc) => format!("{error}: {desc}"),
            None => error,
        };
        return Some(Err(AuthError::Consent(msg)));
    }
    code.map(|code| Ok(AuthorizationResponse { code, state }))
}

fn parse_pasted_response(input: &str) -> Result<AuthorizationResponse, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::Consent("no authorization code entered".into()));
    }
    match Url::parse(input) {
        Ok(url) => parse_redirect(&url).unwrap_or_else(|| {
            Err(AuthError::Consent("the pasted URL carries no authorization code".into()))
        }),
        Err(_) => Ok(AuthorizationResponse {
            code: input.to_string(),
            state: None,
        }),
    }
}

/// Serve loopback requests until one of them is the authorization redirect.
/// There is no overall deadline: an abandoned consent keeps waiting.
fn wait_for_redirect(listener: &TcpListener) -> Result<AuthorizationResponse, AuthError> {
    for stream in listener.incoming() {
        let mut stream = stream.map_err(AuthError::Listener)?;
        let target = match read_request_target(&mut stream) {
            Ok(target) => target,
            Err(e) => {
                log::debug!("ignoring loopback connection: {e}");
                continue;
            }
        };
        let Ok(url) = Url::parse("http://127.0.0.1").and_then(|base| base.join(&target)) else {
            let _ = write_response(&mut stream, "400 Bad Request", FAILURE_PAGE);
            continue;
        };
        match parse_redirect(&url) {
            Some(outcome) => {
                let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
                if let Err(e) = write_response(&mut stream, "200 OK", page) {
                    log::debug!("could not answer the browser: {e}");
                }
                return outcome;
            }
            None => {
                let _ = write_response(&mut stream, "404 Not Found", "");
            }
        }
    }
    Err(AuthError::Listener(std::io::Error::new(
        ErrorKind::UnexpectedEof,
        "redirect listener stopped before a response arrived",
    )))
}

/// Read the request line and drain the headers; returns the request target.
fn read_request_target(stream: &mut TcpStream) -> std::io::Result<String> {
    stream.set_read_timeout(Some(REDIRECT_READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header.trim().is_empty() {
            break;
        }
    }
    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("GET"), Some(target)) => Ok(target.to_string()),
        _ => Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!("unexpected request line {:?}", request_line.trim()),
        )),
    }
}

fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}
