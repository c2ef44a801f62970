use anyhow::{Result, anyhow};
use oauth2::TokenResponse;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, PkceCodeChallenge, RedirectUrl,
    RefreshToken, Scope, TokenUrl,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tiny_http::{Response, Server};
use url::Url;

use crate::auth::token_store;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Full mailbox scope: covers the REST API and IMAP XOAUTH2.
pub const GMAIL_SCOPE: &str = "https://mail.google.com/";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// Tokens returned by the oauth flow (in-memory)
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

impl From<&BasicTokenResponse> for Tokens {
    fn from(token: &BasicTokenResponse) -> Self {
        Tokens {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token.refresh_token().map(|r| r.secret().to_string()),
            expires_in: token.expires_in().map(|d| d.as_secs()),
        }
    }
}

fn google_client(client_id: &str, client_secret: Option<&str>) -> Result<BasicClient> {
    let client_id = ClientId::new(client_id.to_string());
    let client_secret = client_secret.map(|s| ClientSecret::new(s.to_string()));

    let auth_url = AuthUrl::new(GOOGLE_AUTH_URL.to_string())?;
    let token_url = TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?;

    Ok(BasicClient::new(
        client_id,
        client_secret,
        auth_url,
        Some(token_url),
    ))
}

/// Microsoft identity platform endpoints for one tenant.
pub fn microsoft_endpoints(tenant_id: &str) -> (String, String) {
    let base = format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0");
    (format!("{base}/authorize"), format!("{base}/token"))
}

/// Exchange a refresh token for a new Google access token
pub fn refresh_access_token(
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<Tokens> {
    let oauth_client = google_client(client_id, client_secret)?;

    let rt = RefreshToken::new(refresh_token.to_string());
    let token = oauth_client
        .exchange_refresh_token(&rt)
        .request(http_client)
        .map_err(|e| anyhow!("refresh token exchange failed: {e}"))?;

    Ok(Tokens::from(&token))
}

/// Client-credentials grant against a Microsoft tenant (app-only Graph access).
pub fn client_credentials(tenant_id: &str, client_id: &str, client_secret: &str) -> Result<Tokens> {
    let (authorize, token) = microsoft_endpoints(tenant_id);
    let oauth_client = BasicClient::new(
        ClientId::new(client_id.to_string()),
        Some(ClientSecret::new(client_secret.to_string())),
        AuthUrl::new(authorize)?,
        Some(TokenUrl::new(token)?),
    )
    .set_auth_type(AuthType::RequestBody);

    let token = oauth_client
        .exchange_client_credentials()
        .add_scope(Scope::new(GRAPH_SCOPE.to_string()))
        .request(http_client)
        .map_err(|e| anyhow!("client credentials grant failed: {e}"))?;

    log::debug!("obtained Graph app token for tenant {tenant_id}");
    Ok(Tokens::from(&token))
}

/// Perform Authorization Code + PKCE flow. Opens system browser and captures code via tiny server.
pub fn perform_pkce_flow(
    client_id: &str,
    client_secret: Option<&str>,
    redirect_uri: &str,
    scope: &str,
    user_email: &str,
) -> Result<Tokens> {
    let bind_addr = loopback_addr(redirect_uri)?;

    // Listen before the browser is sent anywhere
    let server = Server::http(bind_addr)
        .map_err(|e| anyhow!("Failed to bind OAuth callback server on {bind_addr}: {e:?}"))?;

    let oauth_client = google_client(client_id, client_secret)?
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

    let (auth_url, csrf_token) = oauth_client
        .authorize_url(oauth2::CsrfToken::new_random)
        .add_scope(Scope::new(scope.to_string()))
        .add_extra_param("access_type", "offline")
        .add_extra_param("login_hint", user_email)
        .set_pkce_challenge(pkce_challenge)
        .url();

    println!("Open this URL in your browser:\n{auth_url}");
    // best-effort: don't fail if browser can't be opened
    if let Err(e) = open::that(auth_url.as_str()) {
        log::warn!("could not open browser automatically: {e}");
    }

    let code = wait_for_code(&server, bind_addr, csrf_token.secret())?;

    let token = oauth_client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request(http_client)
        .map_err(|e| {
            log::error!("token exchange failed: {e:#?}");
            anyhow!("Token exchange failed: {e}")
        })?;

    let tokens = Tokens::from(&token);

    if let Some(ref_token) = &tokens.refresh_token
        && let Err(e) = token_store::save_refresh_token(user_email, ref_token)
    {
        log::warn!("could not store refresh token in keyring: {e}");
    }

    Ok(tokens)
}

fn loopback_addr(redirect_uri: &str) -> Result<SocketAddr> {
    let redirect = Url::parse(redirect_uri)
        .map_err(|e| anyhow!("Invalid redirect_uri '{redirect_uri}': {e}"))?;

    let host = redirect
        .host_str()
        .ok_or_else(|| anyhow!("redirect_uri missing host: {redirect_uri}"))?;

    let port = redirect
        .port_or_known_default()
        .ok_or_else(|| anyhow!("redirect_uri missing/unknown port: {redirect_uri}"))?;

    let bind_ip: IpAddr = match host {
        "localhost" | "127.0.0.1" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        other => other.parse::<IpAddr>().map_err(|_| {
            anyhow!("redirect_uri host must be localhost/127.0.0.1 or an IP: {other}")
        })?,
    };

    Ok(SocketAddr::new(bind_ip, port))
}

/// Pulls `code` out of a callback path, rejecting a mismatched `state`.
fn code_from_callback(path_and_query: &str, expected_state: &str) -> Option<String> {
    let parsed = Url::parse(&format!("http://127.0.0.1{path_and_query}")).ok()?;
    let mut code = None;
    let mut state = None;
    for (k, v) in parsed.query_pairs() {
        match k.as_ref() {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            _ => {}
        }
    }
    if state.as_deref() != Some(expected_state) {
        return None;
    }
    code
}

fn wait_for_code(server: &Server, bind_addr: SocketAddr, expected_state: &str) -> Result<String> {
    let wait_until = Instant::now() + CALLBACK_TIMEOUT;

    while Instant::now() < wait_until {
        let Ok(maybe_request) = server.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };
        let Some(request) = maybe_request else {
            continue;
        };

        if let Some(code) = code_from_callback(request.url(), expected_state) {
            let _ = request.respond(Response::from_string(
                "Authorization received. You can close this tab.",
            ));
            return Ok(code);
        }
        let _ = request.respond(Response::from_string(
            "No valid code found in redirect. You can close this tab.",
        ));
    }

    Err(anyhow!("No code received on {bind_addr} within timeout"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_binding() {
        let addr = loopback_addr("http://localhost:8080/callback").unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());
        assert!(loopback_addr("http://example.com/cb").is_err());
        assert!(loopback_addr("not a url").is_err());
    }

    #[test]
    fn callback_requires_matching_state() {
        assert_eq!(
            code_from_callback("/callback?code=abc&state=s1", "s1").as_deref(),
            Some("abc")
        );
        assert_eq!(code_from_callback("/callback?code=abc&state=other", "s1"), None);
        assert_eq!(code_from_callback("/callback?state=s1", "s1"), None);
    }

    #[test]
    fn tenant_endpoints() {
        let (auth, token) = microsoft_endpoints("contoso");
        assert_eq!(
            token,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert!(auth.ends_with("/authorize"));
    }
}
