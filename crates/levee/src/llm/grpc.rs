//! tonic implementation of the LLM backend.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, future};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, ClientTlsConfig};

use levee_protocol::pb::{self, llm_service_client::LlmServiceClient};
use levee_protocol::{ChatCommand, ChatEvent, StartChat};

use super::{ChatStream, ConnectError, Connector, GrpcTarget, LlmBackend};

/// Outbound commands buffered per stream before `send` waits.
const COMMAND_BUFFER_SIZE: usize = 32;

/// Connects over HTTP/2 with tonic. TLS uses the webpki root store.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcConnector;

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self, target: &GrpcTarget) -> Result<Arc<dyn LlmBackend>, ConnectError> {
        let failed = |message: String| ConnectError::ConnectionFailed {
            address: target.address.clone(),
            message,
        };

        let mut endpoint = Channel::from_shared(target.uri()).map_err(|e| failed(e.to_string()))?;
        if target.tls {
            let tls = ClientTlsConfig::new()
                .with_webpki_roots()
                .domain_name(target.host.clone());
            endpoint = endpoint.tls_config(tls).map_err(|e| failed(e.to_string()))?;
        }

        let channel = endpoint.connect().await.map_err(|e| failed(e.to_string()))?;
        tracing::debug!(address = %target.address, tls = target.tls, "Connected to LLM gateway");

        Ok(Arc::new(GrpcBackend::new(channel)))
    }
}

/// `llm.LLMService` over a shared tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcBackend {
    client: LlmServiceClient,
}

impl GrpcBackend {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: LlmServiceClient::new(channel),
        }
    }
}

#[async_trait]
impl LlmBackend for GrpcBackend {
    async fn simple_chat(
        &self,
        request: pb::SimpleChatRequest,
    ) -> Result<pb::SimpleChatResponse, tonic::Status> {
        let mut client = self.client.clone();
        let response = client.simple_chat(request).await?;
        Ok(response.into_inner())
    }

    async fn open_chat(&self, start: StartChat) -> Result<ChatStream, tonic::Status> {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);

        // Queue the start envelope before the call so a gateway that waits for
        // it before sending response headers cannot stall us.
        commands
            .send(ChatCommand::Start(start))
            .await
            .map_err(|_| tonic::Status::internal("command channel closed"))?;

        let outbound = ReceiverStream::new(rx).map(pb::ChatRequest::from);
        let mut client = self.client.clone();
        let inbound = client.chat(outbound).await?.into_inner();

        let events = inbound.filter_map(|item| {
            future::ready(match item {
                Ok(response) => ChatEvent::from_pb(response).map(Ok),
                Err(status) => Some(Err(status)),
            })
        });

        Ok(ChatStream {
            commands,
            events: Box::pin(events),
        })
    }
}
