use std::time::Duration;

use serde::de::DeserializeOwned;

use skybot_types::ClientError;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| ClientError::Malformed(format!("http client: {}", e)))
}

/// Map a transport failure onto the retry taxonomy.
pub(crate) fn send_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout
    } else if e.is_decode() {
        ClientError::Decode(e.to_string())
    } else if e.is_builder() {
        ClientError::Malformed(e.to_string())
    } else {
        ClientError::Connect(e.to_string())
    }
}

/// Non-2xx response to error. XRPC signals a stale access token with a
/// 400 and an `ExpiredToken` error name.
pub(crate) fn status_error(status: u16, body: String) -> ClientError {
    if body.contains("ExpiredToken") || body.contains("InvalidToken") {
        return ClientError::Auth(body);
    }
    ClientError::from_status(status, body)
}

pub(crate) async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let body = read_body(resp).await?;
    serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
}

pub(crate) async fn read_body(resp: reqwest::Response) -> Result<String, ClientError> {
    let status = resp.status();
    let body = resp.text().await.map_err(send_error)?;
    if !status.is_success() {
        return Err(status_error(status.as_u16(), body));
    }
    Ok(body)
}
