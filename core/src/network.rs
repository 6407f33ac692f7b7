//! HTTP API client.
//!
//! Every response body goes through `decode_body`, so a payload that does not
//! match the expected shape surfaces as `Error::InvalidResponse` here instead
//! of somewhere in the view.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{ChatMessageDto, Message, Ticket, TicketMessageDto};
use crate::session::SessionContext;
use crate::ticket::TicketStatus;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

pub struct ApiClient {
    client: Client,
    base_url: String,
    session: SessionContext,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: SessionContext) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.http_url(),
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{}", self.base_url, path));

        match self.session.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    // ============= Chat =============

    /// A 404 means the two users have not talked yet.
    pub async fn chat_history(&self, sender_id: &str, receiver_id: &str) -> Result<Vec<Message>> {
        let resp = self
            .request(Method::GET, &format!("/chat/history/{}/{}", sender_id, receiver_id))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let dtos: Vec<ChatMessageDto> =
            decode_body(check(resp).await?, &["messages", "data"]).await?;
        dtos.into_iter().map(Message::try_from).collect()
    }

    pub async fn send_chat(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message> {
        let resp = self
            .request(Method::POST, "/chat/send")
            .json(&json!({
                "sender": sender_id,
                "receiver": receiver_id,
                "content": content
            }))
            .send()
            .await?;

        let dto: ChatMessageDto = decode_body(check(resp).await?, &["message", "data"]).await?;
        Message::try_from(dto)
    }

    pub async fn mark_seen(&self, sender_id: &str, receiver_id: &str) -> Result<()> {
        let resp = self
            .request(Method::POST, "/chat/mark-seen")
            .json(&json!({
                "senderId": sender_id,
                "receiverId": receiver_id
            }))
            .send()
            .await?;

        check(resp).await?;
        Ok(())
    }

    // ============= Tickets =============

    pub async fn ticket_messages(&self, ticket_id: &str) -> Result<Vec<Message>> {
        let resp = self
            .request(Method::GET, &format!("/ticket/{}/messages", ticket_id))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let dtos: Vec<TicketMessageDto> =
            decode_body(check(resp).await?, &["messages", "data"]).await?;
        dtos.into_iter()
            .map(|dto| Message::try_from(with_ticket_id(dto, ticket_id)))
            .collect()
    }

    pub async fn send_ticket_message(
        &self,
        ticket_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message> {
        let resp = self
            .request(Method::POST, &format!("/ticket/{}/message", ticket_id))
            .json(&json!({
                "senderId": sender_id,
                "text": text
            }))
            .send()
            .await?;

        let dto: TicketMessageDto = decode_body(check(resp).await?, &["message", "data"]).await?;
        Message::try_from(with_ticket_id(dto, ticket_id))
    }

    pub async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket> {
        let resp = self
            .request(Method::GET, &format!("/ticket/{}", ticket_id))
            .send()
            .await?;

        decode_body(check(resp).await?, &["ticket", "data"]).await
    }

    pub async fn raise_ticket(
        &self,
        title: &str,
        description: &str,
        raised_by: &str,
    ) -> Result<Ticket> {
        let resp = self
            .request(Method::POST, "/ticket/create")
            .json(&json!({
                "title": title,
                "description": description,
                "raisedBy": raised_by
            }))
            .send()
            .await?;

        decode_body(check(resp).await?, &["ticket", "data"]).await
    }

    pub async fn assign_ticket(&self, ticket_id: &str, assignee: &str) -> Result<Ticket> {
        let resp = self
            .request(Method::PATCH, &format!("/ticket/assign/{}", ticket_id))
            .json(&json!({ "assignedTo": assignee }))
            .send()
            .await?;

        decode_body(check(resp).await?, &["ticket", "data"]).await
    }

    pub async fn update_ticket_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
        user_id: &str,
    ) -> Result<()> {
        let resp = self
            .request(Method::PATCH, &format!("/ticket/updatestatus/{}", ticket_id))
            .json(&json!({
                "newStatus": status,
                "userId": user_id
            }))
            .send()
            .await?;

        check(resp).await?;
        Ok(())
    }
}

fn with_ticket_id(mut dto: TicketMessageDto, ticket_id: &str) -> TicketMessageDto {
    if dto.ticket_id.is_empty() {
        dto.ticket_id = ticket_id.to_string();
    }
    dto
}

/// Turns a non-2xx response into `Error::Request`, keeping the server's
/// message when the body carries one.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().path().to_string();
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            v["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .or_else(|| v["error"]["message"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            }
        });

    tracing::warn!("Request {} failed: {} - {}", url, status, message);
    Err(Error::Request {
        status: status.as_u16(),
        message,
    })
}

/// Parses the body as `T`, either bare or under one of `wrappers`.
async fn decode_body<T: DeserializeOwned>(resp: Response, wrappers: &[&str]) -> Result<T> {
    let body: Value = resp
        .json()
        .await
        .map_err(|e| Error::InvalidResponse(e.to_string()))?;
    parse_value(body, wrappers)
}

pub(crate) fn parse_value<T: DeserializeOwned>(body: Value, wrappers: &[&str]) -> Result<T> {
    let direct_err = match serde_json::from_value::<T>(body.clone()) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for key in wrappers {
        if let Some(inner) = body.get(*key) {
            if let Ok(value) = serde_json::from_value::<T>(inner.clone()) {
                return Ok(value);
            }
        }
    }

    Err(Error::InvalidResponse(direct_err.to_string()))
}
