use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use skybot_engine::DirectorySource;
use skybot_types::{ClientError, DirectoryUser};

use crate::http::{build_client, read_body, send_error};

const EXPORT_COUNT: u32 = 1000;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportEntry {
    did: String,
    operation: Operation,
    #[serde(default)]
    nullified: bool,
    created_at: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Operation {
    /// Legacy genesis operation.
    #[serde(rename = "create")]
    Create { handle: String, service: String },

    #[serde(rename = "plc_operation", rename_all = "camelCase")]
    PlcOperation {
        prev: Option<String>,
        #[serde(default)]
        also_known_as: Vec<String>,
        #[serde(default)]
        services: HashMap<String, Service>,
    },

    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Service {
    endpoint: String,
}

/// Account-creation feed from a PLC directory's `/export` endpoint.
pub struct PlcDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl PlcDirectory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_client(Duration::from_secs(60))?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl DirectorySource for PlcDirectory {
    async fn export_after(&self, after: Option<&str>) -> Result<Vec<DirectoryUser>, ClientError> {
        let mut params = vec![("count", EXPORT_COUNT.to_string())];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }

        let resp = self
            .http
            .get(format!("{}/export", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(send_error)?;
        let body = read_body(resp).await?;
        let users = parse_export(&body);
        debug!(count = users.len(), after = ?after, "PLC export page");
        Ok(users)
    }
}

/// Genesis records from a newline-delimited export page. Lines that are
/// not account creations, or that fail to parse, are skipped.
pub fn parse_export(body: &str) -> Vec<DirectoryUser> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<ExportEntry>(line) {
            Ok(entry) => genesis_user(entry),
            Err(e) => {
                warn!("Skipping unreadable export line: {}", e);
                None
            }
        })
        .collect()
}

fn genesis_user(entry: ExportEntry) -> Option<DirectoryUser> {
    if entry.nullified {
        return None;
    }
    let (handle, endpoint) = match entry.operation {
        Operation::Create { handle, service } => (handle, service),
        Operation::PlcOperation {
            prev: None,
            also_known_as,
            mut services,
        } => {
            let pds = services.remove("atproto_pds")?;
            let handle = also_known_as
                .first()
                .map(|aka| aka.trim_start_matches("at://").to_string())
                .unwrap_or_default();
            (handle, pds.endpoint)
        }
        _ => return None,
    };

    Some(DirectoryUser {
        did: entry.did,
        handle,
        endpoint,
        created_at: entry.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_genesis_operations_are_kept() {
        let body = r#"
{"did":"did:plc:old","operation":{"type":"create","handle":"old.bsky.social","service":"https://bsky.social","signingKey":"k","recoveryKey":"r","prev":null},"cid":"c1","nullified":false,"createdAt":"2023-01-01T00:00:00.000Z"}
{"did":"did:plc:new","operation":{"type":"plc_operation","prev":null,"alsoKnownAs":["at://new.bsky.social"],"services":{"atproto_pds":{"type":"AtprotoPersonalDataServer","endpoint":"https://bsky.social"}},"rotationKeys":[],"verificationMethods":{}},"cid":"c2","nullified":false,"createdAt":"2023-01-02T00:00:00.000Z"}
{"did":"did:plc:new","operation":{"type":"plc_operation","prev":"c2","alsoKnownAs":["at://renamed.test"],"services":{"atproto_pds":{"type":"AtprotoPersonalDataServer","endpoint":"https://bsky.social"}}},"cid":"c3","nullified":false,"createdAt":"2023-01-03T00:00:00.000Z"}
{"did":"did:plc:gone","operation":{"type":"plc_tombstone","prev":"c9"},"cid":"c4","nullified":false,"createdAt":"2023-01-04T00:00:00.000Z"}
{"did":"did:plc:nopds","operation":{"type":"plc_operation","prev":null,"alsoKnownAs":[],"services":{}},"cid":"c5","nullified":false,"createdAt":"2023-01-05T00:00:00.000Z"}
not json
"#;
        let users = parse_export(body);
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].did, "did:plc:old");
        assert_eq!(users[0].handle, "old.bsky.social");
        assert_eq!(users[1].did, "did:plc:new");
        assert_eq!(users[1].handle, "new.bsky.social");
        assert_eq!(users[1].endpoint, "https://bsky.social");
        assert_eq!(users[1].created_at, "2023-01-02T00:00:00.000Z");
    }

    #[test]
    fn nullified_operations_are_ignored() {
        let body = r#"{"did":"did:plc:x","operation":{"type":"create","handle":"x.test","service":"https://bsky.social"},"cid":"c","nullified":true,"createdAt":"2023-01-01T00:00:00.000Z"}"#;
        assert!(parse_export(body).is_empty());
    }
}
