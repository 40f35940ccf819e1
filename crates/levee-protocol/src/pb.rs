//! gRPC messages and client for the `llm.LLMService` service.
//!
//! Kept in sync by hand with `proto/llm.proto` so the workspace builds without
//! `protoc`. Field tags must match the proto file.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, tag = "1")]
    pub role: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub content: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimpleChatRequest {
    #[prost(string, tag = "1")]
    pub api_key: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub messages: ::prost::alloc::vec::Vec<Message>,
    #[prost(string, tag = "3")]
    pub system_prompt: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub model: ::prost::alloc::string::String,
    #[prost(int32, tag = "5")]
    pub max_tokens: i32,
    #[prost(float, tag = "6")]
    pub temperature: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimpleChatResponse {
    #[prost(string, tag = "1")]
    pub content: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub model: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub input_tokens: i64,
    #[prost(int64, tag = "4")]
    pub output_tokens: i64,
    #[prost(double, tag = "5")]
    pub cost_usd: f64,
    #[prost(int64, tag = "6")]
    pub latency_ms: i64,
    #[prost(string, tag = "7")]
    pub stop_reason: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatRequest {
    #[prost(oneof = "chat_request::Request", tags = "1, 2, 3, 4")]
    pub request: ::core::option::Option<chat_request::Request>,
}

pub mod chat_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Request {
        #[prost(message, tag = "1")]
        Start(super::StartChatRequest),
        #[prost(message, tag = "2")]
        Message(super::UserMessage),
        #[prost(message, tag = "3")]
        Abort(super::AbortRequest),
        #[prost(message, tag = "4")]
        ToolResult(super::ToolResult),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartChatRequest {
    #[prost(string, tag = "1")]
    pub api_key: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub system_prompt: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub model: ::prost::alloc::string::String,
    #[prost(int32, tag = "4")]
    pub max_tokens: i32,
    #[prost(float, tag = "5")]
    pub temperature: f32,
    #[prost(message, repeated, tag = "6")]
    pub messages: ::prost::alloc::vec::Vec<Message>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UserMessage {
    #[prost(string, tag = "1")]
    pub content: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortRequest {
    #[prost(string, tag = "1")]
    pub reason: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToolResult {
    #[prost(string, tag = "1")]
    pub tool_call_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub result: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub is_error: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChatResponse {
    #[prost(oneof = "chat_response::Response", tags = "1, 2, 3, 4, 5, 6")]
    pub response: ::core::option::Option<chat_response::Response>,
}

pub mod chat_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        SessionStarted(super::SessionStarted),
        #[prost(message, tag = "2")]
        Chunk(super::StreamChunk),
        #[prost(message, tag = "3")]
        ToolCall(super::ToolCall),
        #[prost(message, tag = "4")]
        Completion(super::CompletionResponse),
        #[prost(message, tag = "5")]
        Error(super::ErrorResponse),
        #[prost(message, tag = "6")]
        Aborted(super::AbortedResponse),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SessionStarted {
    #[prost(string, tag = "1")]
    pub session_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub provider: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub model: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamChunk {
    #[prost(string, tag = "1")]
    pub content: ::prost::alloc::string::String,
    #[prost(int32, tag = "2")]
    pub index: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToolCall {
    #[prost(string, tag = "1")]
    pub tool_call_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub arguments_json: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompletionResponse {
    #[prost(string, tag = "1")]
    pub full_content: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub stop_reason: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub input_tokens: i64,
    #[prost(int64, tag = "4")]
    pub output_tokens: i64,
    #[prost(double, tag = "5")]
    pub cost_usd: f64,
    #[prost(int64, tag = "6")]
    pub latency_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorResponse {
    #[prost(string, tag = "1")]
    pub code: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    #[prost(bool, tag = "3")]
    pub retryable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbortedResponse {
    #[prost(string, tag = "1")]
    pub reason: ::prost::alloc::string::String,
}

pub mod llm_service_client {
    use tonic::codegen::*;
    use tonic::transport::Channel;

    const SERVICE: &str = "llm.LLMService";

    /// Client for `llm.LLMService` over a tonic [`Channel`].
    ///
    /// Cheap to clone; clones share the underlying HTTP/2 connection.
    #[derive(Debug, Clone)]
    pub struct LlmServiceClient {
        inner: tonic::client::Grpc<Channel>,
    }

    impl LlmServiceClient {
        pub fn new(channel: Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        async fn ready(&mut self) -> std::result::Result<(), tonic::Status> {
            self.inner
                .ready()
                .await
                .map_err(|e| tonic::Status::unknown(format!("Service was not ready: {e}")))
        }

        pub async fn simple_chat(
            &mut self,
            request: impl tonic::IntoRequest<super::SimpleChatRequest>,
        ) -> std::result::Result<tonic::Response<super::SimpleChatResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/llm.LLMService/SimpleChat");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new(SERVICE, "SimpleChat"));
            self.inner.unary(req, path, codec).await
        }

        pub async fn chat(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = super::ChatRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<super::ChatResponse>>,
            tonic::Status,
        > {
            self.ready().await?;
            let codec = tonic_prost::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/llm.LLMService/Chat");
            let mut req = request.into_streaming_request();
            req.extensions_mut().insert(GrpcMethod::new(SERVICE, "Chat"));
            self.inner.streaming(req, path, codec).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    /// Field key byte for a length-delimited field.
    fn key(tag: u8) -> u8 {
        (tag << 3) | 2
    }

    fn encode(message: &impl prost::Message) -> Vec<u8> {
        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn chat_request_variants_use_contract_tags() {
        let cases = [
            (chat_request::Request::Start(StartChatRequest::default()), 1),
            (chat_request::Request::Message(UserMessage::default()), 2),
            (chat_request::Request::Abort(AbortRequest::default()), 3),
            (chat_request::Request::ToolResult(ToolResult::default()), 4),
        ];
        for (request, tag) in cases {
            let message = ChatRequest {
                request: Some(request),
            };
            let bytes = encode(&message);
            assert_eq!(bytes, vec![key(tag), 0x00], "tag {tag}");
            assert_eq!(ChatRequest::decode(bytes.as_slice()).unwrap(), message);
        }
    }

    #[test]
    fn chat_response_variants_use_contract_tags() {
        let cases = [
            (chat_response::Response::SessionStarted(SessionStarted::default()), 1),
            (chat_response::Response::Chunk(StreamChunk::default()), 2),
            (chat_response::Response::ToolCall(ToolCall::default()), 3),
            (chat_response::Response::Completion(CompletionResponse::default()), 4),
            (chat_response::Response::Error(ErrorResponse::default()), 5),
            (chat_response::Response::Aborted(AbortedResponse::default()), 6),
        ];
        for (response, tag) in cases {
            let message = ChatResponse {
                response: Some(response),
            };
            let bytes = encode(&message);
            assert_eq!(bytes, vec![key(tag), 0x00], "tag {tag}");
            assert_eq!(ChatResponse::decode(bytes.as_slice()).unwrap(), message);
        }
    }

    #[test]
    fn chunk_fields_use_contract_tags() {
        let bytes = encode(&StreamChunk {
            content: "a".to_string(),
            index: 1,
        });
        // content: field 1, length 1, "a"; index: field 2 varint 1.
        assert_eq!(bytes, vec![0x0A, 0x01, b'a', 0x10, 0x01]);
    }
}
