//! gRPC adapter for the BESS pipeline control service
//!
//! Implements [`PipelineControl`] over the `bess.pb.BESSControl` gRPC service.
//! Only the handful of message types this daemon consumes are defined here;
//! module arguments are packed as `google.protobuf.Any` exactly as the
//! dataplane expects.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-8: Transmission Confidentiality - Dedicated control channel
//! - SI-11: Error Handling - Pipeline status codes surfaced with operation context

use crate::error::{Result, RoutesyncError};
use crate::pipeline::{ModuleArg, PipelineControl};
use async_trait::async_trait;
use std::time::Duration;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, instrument};

/// Give up on an unreachable pipeline quickly at startup
const CONNECT_TIMEOUT_SECS: u64 = 5;
/// Per-RPC deadline; control RPCs are cheap
const RPC_TIMEOUT_SECS: u64 = 10;

/// Wire messages for the consumed subset of the BESSControl service
pub mod pb {
    /// Status carried inside every response
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Error {
        #[prost(int32, tag = "1")]
        pub code: i32,
        #[prost(string, tag = "2")]
        pub errmsg: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EmptyRequest {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EmptyResponse {
        #[prost(message, optional, tag = "1")]
        pub error: ::core::option::Option<Error>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CreateModuleRequest {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub mclass: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "3")]
        pub arg: ::core::option::Option<::prost_types::Any>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CreateModuleResponse {
        #[prost(message, optional, tag = "1")]
        pub error: ::core::option::Option<Error>,
        #[prost(string, tag = "2")]
        pub name: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ConnectModulesRequest {
        #[prost(string, tag = "1")]
        pub m1: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub m2: ::prost::alloc::string::String,
        #[prost(uint64, tag = "3")]
        pub ogate: u64,
        #[prost(uint64, tag = "4")]
        pub igate: u64,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CommandRequest {
        #[prost(string, tag = "1")]
        pub name: ::prost::alloc::string::String,
        #[prost(string, tag = "2")]
        pub cmd: ::prost::alloc::string::String,
        #[prost(message, optional, tag = "3")]
        pub arg: ::core::option::Option<::prost_types::Any>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CommandResponse {
        #[prost(message, optional, tag = "1")]
        pub error: ::core::option::Option<Error>,
        #[prost(message, optional, tag = "2")]
        pub data: ::core::option::Option<::prost_types::Any>,
    }

    /// Argument for the `Update` module class (packet field rewrite)
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UpdateArg {
        #[prost(message, repeated, tag = "1")]
        pub fields: ::prost::alloc::vec::Vec<UpdateArgField>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UpdateArgField {
        #[prost(uint64, tag = "1")]
        pub offset: u64,
        #[prost(uint64, tag = "2")]
        pub size: u64,
        #[prost(uint64, tag = "3")]
        pub value: u64,
    }

    /// Argument for the IPLookup module's `add` command
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct IpLookupCommandAddArg {
        #[prost(string, tag = "1")]
        pub prefix: ::prost::alloc::string::String,
        #[prost(uint64, tag = "2")]
        pub prefix_len: u64,
        #[prost(uint64, tag = "3")]
        pub gate: u64,
    }
}

/// Pack a message as `google.protobuf.Any` under the BESS protobuf package
fn pack_any<M: prost::Message>(type_name: &str, msg: &M) -> prost_types::Any {
    prost_types::Any {
        type_url: format!("type.googleapis.com/bess.pb.{}", type_name),
        value: msg.encode_to_vec(),
    }
}

/// Encode a typed module argument; returns (protobuf type name, packed Any)
fn encode_arg(arg: &ModuleArg) -> (&'static str, prost_types::Any) {
    match arg {
        ModuleArg::Update { fields } => {
            let msg = pb::UpdateArg {
                fields: fields
                    .iter()
                    .map(|f| pb::UpdateArgField {
                        offset: f.offset,
                        size: f.size,
                        value: f.value,
                    })
                    .collect(),
            };
            ("UpdateArg", pack_any("UpdateArg", &msg))
        }
        ModuleArg::IpLookupAdd {
            prefix,
            prefix_len,
            gate,
        } => {
            let msg = pb::IpLookupCommandAddArg {
                prefix: prefix.to_string(),
                prefix_len: u64::from(*prefix_len),
                gate: *gate,
            };
            (
                "IPLookupCommandAddArg",
                pack_any("IPLookupCommandAddArg", &msg),
            )
        }
    }
}

/// gRPC client for the pipeline control service
///
/// # NIST Controls
/// - SC-8: Transmission Confidentiality - Single long-lived control channel
pub struct BessClient {
    inner: Grpc<Channel>,
}

impl BessClient {
    /// Connect to the pipeline control endpoint
    #[instrument]
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{}:{}", host, port))?
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS));
        let channel = endpoint.connect().await?;
        debug!(host, port, "connected to pipeline control service");
        Ok(Self {
            inner: Grpc::new(channel),
        })
    }

    /// Issue one unary control RPC
    async fn unary<Req, Resp>(&mut self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        self.inner.ready().await.map_err(RoutesyncError::Transport)?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let path = PathAndQuery::from_static(path);
        let response = self
            .inner
            .unary(tonic::Request::new(request), path, codec)
            .await?;
        Ok(response.into_inner())
    }

    /// Turn an embedded pipeline status into a Result
    fn check(op: &'static str, error: Option<pb::Error>) -> Result<()> {
        match error {
            Some(e) if e.code != 0 => Err(RoutesyncError::Pipeline {
                op,
                code: e.code,
                msg: e.errmsg,
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl PipelineControl for BessClient {
    async fn pause_all(&mut self) -> Result<()> {
        let resp: pb::EmptyResponse = self
            .unary("/bess.pb.BESSControl/PauseAll", pb::EmptyRequest {})
            .await?;
        Self::check("PauseAll", resp.error)
    }

    async fn resume_all(&mut self) -> Result<()> {
        let resp: pb::EmptyResponse = self
            .unary("/bess.pb.BESSControl/ResumeAll", pb::EmptyRequest {})
            .await?;
        Self::check("ResumeAll", resp.error)
    }

    async fn create_module(&mut self, mclass: &str, name: &str, arg: &ModuleArg) -> Result<()> {
        let (_, any) = encode_arg(arg);
        let resp: pb::CreateModuleResponse = self
            .unary(
                "/bess.pb.BESSControl/CreateModule",
                pb::CreateModuleRequest {
                    name: name.to_string(),
                    mclass: mclass.to_string(),
                    arg: Some(any),
                },
            )
            .await?;
        Self::check("CreateModule", resp.error)
    }

    async fn connect_modules(&mut self, from: &str, to: &str) -> Result<()> {
        let resp: pb::EmptyResponse = self
            .unary(
                "/bess.pb.BESSControl/ConnectModules",
                pb::ConnectModulesRequest {
                    m1: from.to_string(),
                    m2: to.to_string(),
                    ogate: 0,
                    igate: 0,
                },
            )
            .await?;
        Self::check("ConnectModules", resp.error)
    }

    async fn run_module_command(&mut self, module: &str, cmd: &str, arg: &ModuleArg) -> Result<()> {
        let (_, any) = encode_arg(arg);
        let resp: pb::CommandResponse = self
            .unary(
                "/bess.pb.BESSControl/ModuleCommand",
                pb::CommandRequest {
                    name: module.to_string(),
                    cmd: cmd.to_string(),
                    arg: Some(any),
                },
            )
            .await?;
        Self::check("ModuleCommand", resp.error)
    }
}
