use std::future::Future;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use medlink_types::api::{
    ConversationResponse, ConversationsResponse, CurrentUserResponse, MessagesResponse,
    OpenConversationRequest, SendMessageRequest, SentMessageResponse, SentPayload, StatusResponse,
};
use medlink_types::{Conversation, Message, UserRef};

use crate::config::ClientConfig;
use crate::error::{ApiError, ConfigError};

/// REST operations the messaging core consumes.
///
/// Futures are `Send` so the session can run each call on its own task.
pub trait ChatApi: Send + Sync + 'static {
    fn list_conversations(&self) -> impl Future<Output = Result<Vec<Conversation>, ApiError>> + Send;

    /// Create (or return the existing) direct conversation with a user.
    fn open_conversation(
        &self,
        other_user_id: &str,
    ) -> impl Future<Output = Result<Conversation, ApiError>> + Send;

    fn fetch_messages(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    fn accept(&self, conversation_id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn ignore(&self, conversation_id: &str) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// `reqwest` implementation against the MedLink backend.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base: String,
    token: String,
}

impl RestClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let token = config.token.clone().ok_or(ConfigError::Missing("MEDLINK_TOKEN"))?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                name: "http client",
                value: e.to_string(),
            })?;

        Ok(Self {
            http,
            base: config.api_base(),
            token,
        })
    }

    /// `GET /auth/me`: the signed-in user.
    pub async fn current_user(&self) -> Result<UserRef, ApiError> {
        let res: CurrentUserResponse = self.execute(self.http.get(self.url("/auth/me"))).await?;
        match (res.success, res.user) {
            (true, Some(user)) => Ok(user),
            _ => Err(ApiError::rejected(res.message, "could not load current user")),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

impl ChatApi for RestClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let res: ConversationsResponse = self
            .execute(self.http.get(self.url("/chat/conversations")))
            .await?;
        if !res.success {
            return Err(ApiError::rejected(res.message, "could not load conversations"));
        }
        debug!("Loaded {} conversations", res.conversations.len());
        Ok(res.conversations)
    }

    async fn open_conversation(&self, other_user_id: &str) -> Result<Conversation, ApiError> {
        let body = OpenConversationRequest {
            other_user_id: other_user_id.to_string(),
        };
        let res: ConversationResponse = self
            .execute(self.http.post(self.url("/chat/conversations")).json(&body))
            .await?;
        match (res.success, res.conversation) {
            (true, Some(conversation)) => Ok(conversation),
            _ => Err(ApiError::rejected(res.message, "could not start conversation")),
        }
    }

    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        let res: MessagesResponse = self
            .execute(self.http.get(self.url(&format!("/chat/messages/{conversation_id}"))))
            .await?;
        if !res.success {
            return Err(ApiError::rejected(res.message, "could not load messages"));
        }
        Ok(res.messages)
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Message, ApiError> {
        let body = SendMessageRequest {
            text: text.to_string(),
        };
        let res: SentMessageResponse = self
            .execute(
                self.http
                    .post(self.url(&format!("/chat/messages/{conversation_id}")))
                    .json(&body),
            )
            .await?;
        match (res.success, res.message) {
            (true, Some(SentPayload::Stored(message))) => Ok(message),
            (_, Some(SentPayload::Reason(reason))) => Err(ApiError::Rejected(reason)),
            _ => Err(ApiError::Rejected("message was not stored".into())),
        }
    }

    async fn accept(&self, conversation_id: &str) -> Result<(), ApiError> {
        let res: StatusResponse = self
            .execute(self.http.post(self.url(&format!("/chats/{conversation_id}/accept"))))
            .await?;
        if !res.success {
            return Err(ApiError::rejected(res.message, "failed to accept request"));
        }
        Ok(())
    }

    async fn ignore(&self, conversation_id: &str) -> Result<(), ApiError> {
        let res: StatusResponse = self
            .execute(self.http.post(self.url(&format!("/chats/{conversation_id}/ignore"))))
            .await?;
        if !res.success {
            return Err(ApiError::rejected(res.message, "failed to ignore request"));
        }
        Ok(())
    }
}
