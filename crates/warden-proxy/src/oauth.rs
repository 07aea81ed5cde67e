//! OpenID Connect authorization code flow against the provider's endpoints.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;
use warden_config::Options;

use crate::error::EngineError;

/// Generate a random state string for CSRF protection.
pub fn generate_state() -> String {
    let mut state_bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut state_bytes);
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Build the authorization URL for the login redirect.
pub fn build_authorization_url(
    options: &Options,
    redirect_uri: &str,
    state: &str,
) -> Result<String, EngineError> {
    let mut url = Url::parse(&options.login_url)
        .map_err(|e| EngineError::Config(format!("invalid login_url: {}", e)))?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", &options.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &options.scope)
            .append_pair("state", state);
        if !options.acr_values.is_empty() {
            query.append_pair("acr_values", &options.acr_values);
        }
    }

    Ok(url.into())
}

/// Tokens returned from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Exchange an authorization code for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    options: &Options,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, EngineError> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", options.client_id.as_str()),
        ("client_secret", options.client_secret.as_str()),
    ];

    let response = client
        .post(&options.redeem_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| EngineError::Network(format!("Token exchange request failed: {}", e)))?;

    if !response.status().is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(EngineError::Backend(format!(
            "Token exchange failed: {}",
            error_text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| EngineError::Backend(format!("Failed to parse token response: {}", e)))
}

/// Fetch the user's claims from the userinfo endpoint.
pub async fn fetch_profile(
    client: &reqwest::Client,
    options: &Options,
    access_token: &str,
) -> Result<Map<String, Value>, EngineError> {
    let response = client
        .get(&options.profile_url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| EngineError::Network(format!("Userinfo request failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(EngineError::Backend(format!(
            "Userinfo request failed with status {}",
            response.status()
        )));
    }

    match response.json::<Value>().await {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(EngineError::Backend(
            "Userinfo response is not a JSON object".to_string(),
        )),
        Err(e) => Err(EngineError::Backend(format!(
            "Failed to parse userinfo response: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(base: &str) -> Options {
        Options {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            login_url: format!("{}/authorize", base),
            redeem_url: format!("{}/token", base),
            profile_url: format!("{}/userinfo", base),
            acr_values: "urn:flow:default".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_generation() {
        let state1 = generate_state();
        let state2 = generate_state();
        assert!(!state1.is_empty());
        assert_ne!(state1, state2);
    }

    #[test]
    fn test_authorization_url() {
        let url = build_authorization_url(
            &options("https://sso.example.com"),
            "https://app.example.com/oauth2/callback",
            "test_state",
        )
        .unwrap();

        assert!(url.starts_with("https://sso.example.com/authorize?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=test_state"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("acr_values=urn%3Aflow%3Adefault"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp.example.com%2Foauth2%2Fcallback"));
    }

    #[test]
    fn test_authorization_url_keeps_existing_query() {
        let mut opts = options("https://sso.example.com");
        opts.login_url = "https://sso.example.com/authorize?tenant=main".to_string();
        let url = build_authorization_url(&opts, "https://app/cb", "s").unwrap();
        assert!(url.contains("tenant=main&client_id=client"));
    }

    #[test]
    fn test_authorization_url_invalid_login_url() {
        let mut opts = options("https://sso.example.com");
        opts.login_url = "not a url".to_string();
        assert!(matches!(
            build_authorization_url(&opts, "https://app/cb", "s"),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("client_secret=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "token_type": "Bearer",
                "expires_in": 300
            })))
            .mount(&server)
            .await;

        let tokens = exchange_code(
            &reqwest::Client::new(),
            &options(&server.uri()),
            "abc",
            "https://app/cb",
        )
        .await
        .unwrap();

        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.expires_in, Some(300));
        assert!(tokens.id_token.is_none());
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = exchange_code(
            &reqwest::Client::new(),
            &options(&server.uri()),
            "abc",
            "https://app/cb",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Backend(msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_fetch_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer at"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sub": "1234",
                "email": "alice@example.com"
            })))
            .mount(&server)
            .await;

        let claims = fetch_profile(&reqwest::Client::new(), &options(&server.uri()), "at")
            .await
            .unwrap();

        assert_eq!(claims["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn test_fetch_profile_not_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["x"])))
            .mount(&server)
            .await;

        let err = fetch_profile(&reqwest::Client::new(), &options(&server.uri()), "at")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Backend(_)));
    }
}
