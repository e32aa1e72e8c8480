// Last.fm scrobbler implementation
// API Documentation: https://www.last.fm/api

use super::traits::{ApiError, ScrobbleData, Session, TrackingApi};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

pub const DEFAULT_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";
pub const DEFAULT_AUTH_URL: &str = "https://www.last.fm/api/auth/";

/// Last.fm error code for an invalid session key
const INVALID_SESSION_KEY: u32 = 9;

/// Compute the `api_sig` for a set of request parameters.
///
/// Parameters are ordered by name, each name is followed by its value, the
/// shared secret goes last and the whole string is MD5 hashed. `format` is
/// never part of the signature.
pub fn api_signature<'a, I>(params: I, shared_secret: &str) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut sorted: Vec<(&str, &str)> = params
        .into_iter()
        .filter(|(name, _)| *name != "format")
        .collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut payload = String::new();
    for (name, value) in sorted {
        payload.push_str(name);
        payload.push_str(value);
    }
    payload.push_str(shared_secret);

    format!("{:x}", md5::compute(payload.as_bytes()))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: Session,
}

/// Turn a raw Last.fm response into a value or a classified error
fn parse_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ApiError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    // Errors come back as {"error": code, "message": "..."}, usually with a 4xx status
    if let Ok(err) = serde_json::from_str::<ErrorBody>(body) {
        if err.error == INVALID_SESSION_KEY {
            return Err(ApiError::Unauthorized);
        }
        return Err(ApiError::Service {
            code: err.error,
            message: err.message,
        });
    }

    if !status.is_success() {
        return Err(ApiError::Status(status.as_u16()));
    }

    Ok(serde_json::from_str(body)?)
}

/// Signed HTTPS+JSON client for the Last.fm API
pub struct LastFmClient {
    client: Client,
    api_url: String,
    auth_url: String,
    api_key: String,
    api_secret: String,
}

impl LastFmClient {
    pub fn new(
        client: Client,
        api_url: String,
        auth_url: String,
        api_key: String,
        api_secret: String,
    ) -> Self {
        Self {
            client,
            api_url,
            auth_url,
            api_key,
            api_secret,
        }
    }

    /// Build the full parameter list for a call: method, api key, extras,
    /// then the signature, then the output format
    fn signed_params(&self, method: &str, extra: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        let mut params = vec![("method", method.to_string()), ("api_key", self.api_key.clone())];
        params.extend(extra);

        let signature = api_signature(params.iter().map(|(k, v)| (*k, v.as_str())), &self.api_secret);
        params.push(("api_sig", signature));
        params.push(("format", "json".to_string()));
        params
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        extra: Vec<(&'static str, String)>,
    ) -> Result<T, ApiError> {
        let params = self.signed_params(method, extra);
        let response = self
            .client
            .get(&self.api_url)
            .header(ACCEPT, "application/json")
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        parse_response(status, &body)
    }

    async fn post(&self, method: &str, extra: Vec<(&'static str, String)>) -> Result<(), ApiError> {
        let params = self.signed_params(method, extra);
        let response = self
            .client
            .post(&self.api_url)
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        parse_response::<serde_json::Value>(status, &body)?;
        Ok(())
    }
}

/// Track parameters shared by now playing and scrobble submissions
fn track_params(data: &ScrobbleData, session_key: &str) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("artist", data.artist.clone()),
        ("track", data.track.clone()),
    ];
    if let Some(album) = &data.album {
        params.push(("album", album.clone()));
    }
    if let Some(duration) = data.duration {
        params.push(("duration", duration.to_string()));
    }
    params.push(("sk", session_key.to_string()));
    params
}

impl TrackingApi for LastFmClient {
    async fn get_token(&self) -> Result<String, ApiError> {
        let response: TokenResponse = self.get("auth.getToken", Vec::new()).await?;
        Ok(response.token)
    }

    async fn get_session(&self, token: &str) -> Result<Session, ApiError> {
        let response: SessionResponse = self
            .get("auth.getSession", vec![("token", token.to_string())])
            .await?;
        log::debug!("Got Last.fm session for {}.", response.session.name);
        Ok(response.session)
    }

    async fn now_playing(&self, data: &ScrobbleData, session_key: &str) -> Result<(), ApiError> {
        log::debug!("Sending now playing to Last.fm: {} - {}", data.artist, data.track);
        self.post("track.updateNowPlaying", track_params(data, session_key))
            .await
    }

    async fn scrobble(&self, data: &ScrobbleData, timestamp: i64, session_key: &str) -> Result<(), ApiError> {
        log::debug!("Scrobbling to Last.fm: {} - {}", data.artist, data.track);
        let mut params = track_params(data, session_key);
        params.push(("timestamp", timestamp.to_string()));
        self.post("track.scrobble", params).await
    }

    fn authorization_url(&self, token: &str) -> String {
        let query = [("api_key", self.api_key.as_str()), ("token", token)];
        match Url::parse_with_params(&self.auth_url, &query) {
            Ok(url) => url.to_string(),
            Err(e) => {
                log::error!("Could not create Last.fm authentication URL from {}: {}", self.auth_url, e);
                format!("{}?api_key={}&token={}", self.auth_url, self.api_key, token)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> LastFmClient {
        LastFmClient::new(
            Client::new(),
            DEFAULT_API_URL.to_string(),
            DEFAULT_AUTH_URL.to_string(),
            "key".to_string(),
            "secret".to_string(),
        )
    }

    fn data() -> ScrobbleData {
        ScrobbleData {
            artist: "Band".to_string(),
            track: "Song".to_string(),
            album: Some("LP".to_string()),
            duration: Some(200),
        }
    }

    #[test]
    fn signature_matches_known_digest() {
        let params = [
            ("method", "auth.getToken"),
            ("api_key", "b25b959554ed76058ac220b7b2e0a026"),
        ];
        assert_eq!(api_signature(params, "secret"), "eddf02bded0a8e2de77ac2a9e9087dd2");
    }

    #[test]
    fn signature_ignores_insertion_order_and_format() {
        let forward = [
            ("method", "track.updateNowPlaying"),
            ("artist", "Sigur Rós"),
            ("track", "Sæglópur"),
        ];
        let shuffled = [
            ("format", "json"),
            ("track", "Sæglópur"),
            ("method", "track.updateNowPlaying"),
            ("artist", "Sigur Rós"),
        ];

        let expected = "66e829e9206b7cd6fc73dc3821294159";
        assert_eq!(api_signature(forward, "secret"), expected);
        assert_eq!(api_signature(shuffled, "secret"), expected);
        assert_eq!(api_signature(forward, "secret"), api_signature(forward, "secret"));
    }

    #[test]
    fn signed_params_sign_everything_but_format() {
        let client = client();
        let mut extra = track_params(&data(), "SESSION");
        extra.push(("timestamp", "1700000000".to_string()));

        let params = client.signed_params("track.scrobble", extra);
        let names: Vec<&str> = params.iter().map(|(k, _)| *k).collect();

        assert_eq!(&names[..2], &["method", "api_key"]);
        assert_eq!(&names[names.len() - 2..], &["api_sig", "format"]);
        assert!(!params.iter().any(|(_, v)| v == "secret"));

        let sig = params.iter().find(|(k, _)| *k == "api_sig").map(|(_, v)| v.as_str());
        assert_eq!(sig, Some("6b549479e8b796bc94c2d52ed0a34407"));
    }

    #[test]
    fn track_params_skip_missing_optionals() {
        let mut bare = data();
        bare.album = None;
        bare.duration = None;

        let params = track_params(&bare, "SESSION");
        let names: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
        assert_eq!(names, vec!["artist", "track", "sk"]);
    }

    #[test]
    fn authorization_url_carries_key_and_token() {
        assert_eq!(
            client().authorization_url("tok123"),
            "https://www.last.fm/api/auth/?api_key=key&token=tok123"
        );
    }

    #[test]
    fn parse_response_decodes_success_bodies() {
        let token: TokenResponse = parse_response(StatusCode::OK, r#"{"token":"abc"}"#).unwrap();
        assert_eq!(token.token, "abc");

        let session: SessionResponse = parse_response(
            StatusCode::OK,
            r#"{"session":{"name":"listener","key":"k","subscriber":0}}"#,
        )
        .unwrap();
        assert_eq!(session.session.name, "listener");
    }

    #[test]
    fn parse_response_classifies_failures() {
        let unauthorized = parse_response::<serde_json::Value>(StatusCode::UNAUTHORIZED, "");
        assert!(matches!(unauthorized, Err(ApiError::Unauthorized)));

        let invalid_key = parse_response::<serde_json::Value>(
            StatusCode::FORBIDDEN,
            r#"{"error":9,"message":"Invalid session key - Please re-authenticate"}"#,
        );
        assert!(matches!(invalid_key, Err(ApiError::Unauthorized)));

        let unauthorized_token = parse_response::<SessionResponse>(
            StatusCode::FORBIDDEN,
            r#"{"error":14,"message":"Unauthorized Token - This token has not been authorized"}"#,
        );
        assert!(matches!(unauthorized_token, Err(ApiError::Service { code: 14, .. })));

        let server = parse_response::<serde_json::Value>(StatusCode::BAD_GATEWAY, "<html>");
        assert!(matches!(server, Err(ApiError::Status(502))));

        let garbage = parse_response::<TokenResponse>(StatusCode::OK, "{}");
        assert!(matches!(garbage, Err(ApiError::Decode(_))));
    }
}
