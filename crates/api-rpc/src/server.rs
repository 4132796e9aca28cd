//! JSON-RPC Server
//!
//! Exposes job submission, control and introspection over JSON-RPC 2.0.

use crate::handler::RpcHandler;
use crate::types::{GetJobRequest, ListPluginsRequest, StatsRequest, StopRequest, SubmitRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (useful with port 0) and the handle that stops it.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.submit.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubmitRequest = params.parse()?;
                    handler.submit(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.stop.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StopRequest = params.parse()?;
                    handler.stop(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GetJobRequest = params.parse()?;
                    handler.get_job(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        // Parameterless methods accept an empty or missing params member
        let handler = self.handler.clone();
        module
            .register_async_method("plugins.list.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.list_plugins(ListPluginsRequest {}).await }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { handler.stats(StatsRequest {}).await }
            })
            .map_err(|e| e.to_string())?;

        info!(%local_addr, "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}
