use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info};

use skybot_engine::SocialClient;
use skybot_types::api::{BlobRef, NotificationPage, PostDraft, SessionInfo, TimelinePage};
use skybot_types::{ClientError, PostRef};

use crate::http::{build_client, read_json, send_error};

const POST_COLLECTION: &str = "app.bsky.feed.post";
const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";

#[derive(Debug, Clone)]
struct Session {
    did: String,
    handle: String,
    access_jwt: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    did: String,
    handle: String,
    access_jwt: String,
}

#[derive(Deserialize)]
struct CreateRecordResponse {
    uri: String,
    cid: String,
}

#[derive(Deserialize)]
struct UploadBlobResponse {
    blob: BlobRef,
}

/// AT Protocol XRPC client for one account.
pub struct BskyClient {
    http: reqwest::Client,
    service: String,
    identifier: String,
    password: String,
    session: RwLock<Option<Session>>,
}

impl BskyClient {
    pub fn new(
        service: impl Into<String>,
        identifier: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_client(Duration::from_secs(30))?,
            service: service.into().trim_end_matches('/').to_string(),
            identifier: identifier.into(),
            password: password.into(),
            session: RwLock::new(None),
        })
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.service, method)
    }

    async fn session(&self) -> Result<Session, ClientError> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::Auth("no active session".into()))
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let session = self.session().await?;
        let resp = self
            .http
            .get(self.xrpc(method))
            .bearer_auth(&session.access_jwt)
            .query(params)
            .send()
            .await
            .map_err(send_error)?;
        read_json(resp).await
    }

    async fn create_record(&self, collection: &str, record: Value) -> Result<PostRef, ClientError> {
        let session = self.session().await?;
        let body = json!({
            "repo": session.did,
            "collection": collection,
            "record": record,
        });
        let resp = self
            .http
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        let created: CreateRecordResponse = read_json(resp).await?;
        Ok(PostRef::new(created.uri, created.cid))
    }
}

fn page_params(cursor: Option<&str>, limit: u32) -> Vec<(&'static str, String)> {
    let mut params = vec![("limit", limit.clamp(1, 100).to_string())];
    if let Some(cursor) = cursor {
        params.push(("cursor", cursor.to_string()));
    }
    params
}

/// `app.bsky.feed.post` record for a draft.
pub fn post_record(draft: &PostDraft, created_at: &str) -> Value {
    let mut record = json!({
        "$type": POST_COLLECTION,
        "text": draft.text,
        "createdAt": created_at,
    });
    if let Some(reply) = &draft.reply {
        record["reply"] = json!({
            "root": { "uri": reply.root.uri, "cid": reply.root.cid },
            "parent": { "uri": reply.parent.uri, "cid": reply.parent.cid },
        });
    }
    if let Some(image) = &draft.image {
        record["embed"] = json!({
            "$type": "app.bsky.embed.images",
            "images": [{ "alt": image.alt, "image": image.blob }],
        });
    }
    record
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl SocialClient for BskyClient {
    async fn login(&self) -> Result<SessionInfo, ClientError> {
        let resp = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&json!({ "identifier": self.identifier, "password": self.password }))
            .send()
            .await
            .map_err(send_error)?;
        let created: CreateSessionResponse = read_json(resp).await?;

        info!(did = %created.did, handle = %created.handle, "Logged in");
        let info = SessionInfo {
            did: created.did.clone(),
            handle: created.handle.clone(),
        };
        *self.session.write().await = Some(Session {
            did: created.did,
            handle: created.handle,
            access_jwt: created.access_jwt,
        });
        Ok(info)
    }

    async fn timeline(&self, cursor: Option<&str>, limit: u32) -> Result<TimelinePage, ClientError> {
        self.query("app.bsky.feed.getTimeline", &page_params(cursor, limit))
            .await
    }

    async fn notifications(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<NotificationPage, ClientError> {
        self.query(
            "app.bsky.notification.listNotifications",
            &page_params(cursor, limit),
        )
        .await
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<PostRef, ClientError> {
        let created = self
            .create_record(POST_COLLECTION, post_record(draft, &now_string()))
            .await?;
        debug!(uri = %created.uri, "Posted");
        Ok(created)
    }

    async fn upload_image(&self, png: &[u8]) -> Result<BlobRef, ClientError> {
        let session = self.session().await?;
        let resp = self
            .http
            .post(self.xrpc("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png.to_vec())
            .send()
            .await
            .map_err(send_error)?;
        let uploaded: UploadBlobResponse = read_json(resp).await?;
        debug!(handle = %session.handle, size = uploaded.blob.size, "Blob uploaded");
        Ok(uploaded.blob)
    }

    async fn follow(&self, did: &str) -> Result<(), ClientError> {
        let record = json!({
            "$type": FOLLOW_COLLECTION,
            "subject": did,
            "createdAt": now_string(),
        });
        self.create_record(FOLLOW_COLLECTION, record).await?;
        Ok(())
    }
}
