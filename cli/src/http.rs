//! [`PinApi`] over HTTP: every operation is one GraphQL POST.

use async_trait::async_trait;
use pinboard::net::graphql;
use pinboard::{ClientConfig, CreatePinInput, Pin, PinApi, SyncError, User};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use wire::{GraphqlRequest, GraphqlResponse};

use crate::CliError;

pub struct HttpApi {
    client: reqwest::Client,
    url: String,
}

impl HttpApi {
    /// Build a client that sends the configured token as `authorization` on every request.
    pub fn new(config: &ClientConfig) -> Result<Self, CliError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(token)?);
        }
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { client, url: config.graphql_url.clone() })
    }

    async fn execute(&self, request: &GraphqlRequest) -> Result<GraphqlResponse, reqwest::Error> {
        tracing::debug!(url = %self.url, "graphql request");
        self.client.post(&self.url).json(request).send().await?.error_for_status()?.json().await
    }
}

fn mutation_error(operation: &'static str, error: reqwest::Error) -> SyncError {
    SyncError::Mutation { operation, message: error.to_string() }
}

#[async_trait(?Send)]
impl PinApi for HttpApi {
    async fn fetch_pins(&self) -> Result<Vec<Pin>, SyncError> {
        let response = self.execute(&graphql::get_pins()).await.map_err(|e| SyncError::Fetch(e.to_string()))?;
        graphql::decode_pins(response)
    }

    async fn create_pin(&self, input: &CreatePinInput) -> Result<Pin, SyncError> {
        let response = self.execute(&graphql::create_pin(input)).await.map_err(|e| mutation_error("createPin", e))?;
        graphql::decode_created_pin(response)
    }

    async fn delete_pin(&self, pin_id: &str) -> Result<(), SyncError> {
        let response = self.execute(&graphql::delete_pin(pin_id)).await.map_err(|e| mutation_error("deletePin", e))?;
        graphql::decode_deleted(response)
    }

    async fn add_comment(&self, pin_id: &str, text: &str) -> Result<Pin, SyncError> {
        let response = self
            .execute(&graphql::create_comment(pin_id, text))
            .await
            .map_err(|e| mutation_error("createComment", e))?;
        graphql::decode_commented_pin(response)
    }

    async fn me(&self) -> Result<User, SyncError> {
        let response = self.execute(&graphql::me()).await.map_err(|error| {
            if matches!(error.status(), Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)) {
                SyncError::Unauthorized
            } else {
                SyncError::Transport(error.to_string())
            }
        })?;
        graphql::decode_me(response)
    }
}
