//! JSON-RPC surface over a live server bound to an ephemeral port.

mod common;

use common::{config, TestEnv};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::rpc_params;
use jsonrpsee::server::ServerHandle;
use reliquary_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use serde_json::{json, Value};

async fn start(env: &TestEnv) -> (impl ClientT, ServerHandle) {
    let engine = env.engine(config(4), env.registry(|_| {}));
    let handler = RpcHandler::new(
        engine,
        env.store.clone(),
        env.id_provider.clone(),
        env.time_provider.clone(),
    );
    let server = RpcServer::new(
        RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        handler,
    );
    let (addr, handle) = server.start().await.unwrap();
    let client = HttpClientBuilder::default()
        .build(format!("http://{}", addr))
        .unwrap();
    (client, handle)
}

fn job_params(job_id: &str) -> ObjectParams {
    let mut params = ObjectParams::new();
    params.insert("job_id", job_id).unwrap();
    params
}

fn error_code(err: ClientError) -> i32 {
    match err {
        ClientError::Call(obj) => obj.code(),
        other => panic!("expected a call error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_submit_get_and_stats() {
    let env = TestEnv::new().await;
    let ids = env.seed_aips(10).await;
    env.store_binaries(&ids[1..]).await;
    let (client, handle) = start(&env).await;

    let mut params = ObjectParams::new();
    params.insert("plugin", "storage.verify-presence").unwrap();
    params
        .insert("source_objects", json!({ "kind": "all", "class": "AIP" }))
        .unwrap();
    params.insert("username", "curator").unwrap();
    params.insert("synchronous", true).unwrap();

    let submitted: Value = client.request("jobs.submit.v1", params).await.unwrap();
    assert_eq!(submitted["outcome"], "finished");
    assert_eq!(submitted["state"], "COMPLETED");
    let job_id = submitted["job_id"].as_str().unwrap().to_string();

    let job: Value = client.request("jobs.get.v1", job_params(&job_id)).await.unwrap();
    assert_eq!(job["state"], "COMPLETED");
    assert_eq!(job["stats"]["source_objects_processed_with_success"], 9);
    assert_eq!(job["stats"]["source_objects_processed_with_failure"], 1);

    let stats: Value = client.request("admin.stats.v1", rpc_params![]).await.unwrap();
    assert_eq!(stats["jobs_by_state"]["COMPLETED"], 1);
    assert_eq!(stats["engine"]["pools"]["running"], 0);

    let stopped: Value = client.request("jobs.stop.v1", job_params(&job_id)).await.unwrap();
    assert_eq!(stopped["stopping"], false);

    handle.stop().unwrap();
}

#[tokio::test]
async fn test_plugins_are_listed() {
    let env = TestEnv::new().await;
    let (client, handle) = start(&env).await;

    let plugins: Vec<Value> = client.request("plugins.list.v1", rpc_params![]).await.unwrap();
    let ids: Vec<&str> = plugins.iter().filter_map(|p| p["id"].as_str()).collect();
    assert_eq!(
        ids,
        vec!["internal.clean-unfinished-jobs", "storage.verify-presence"]
    );
    assert_eq!(plugins[1]["parameters"], json!(["prefix"]));

    handle.stop().unwrap();
}

#[tokio::test]
async fn test_error_codes() {
    let env = TestEnv::new().await;
    let (client, handle) = start(&env).await;

    let err = client
        .request::<Value, _>("jobs.get.v1", job_params("ghost"))
        .await
        .unwrap_err();
    assert_eq!(error_code(err), 4001);

    let mut params = ObjectParams::new();
    params.insert("plugin", "no.such.plugin").unwrap();
    params.insert("source_objects", json!({ "kind": "none" })).unwrap();
    let err = client
        .request::<Value, _>("jobs.submit.v1", params)
        .await
        .unwrap_err();
    assert_eq!(error_code(err), 4000);

    // Single-shot selector on an object-driven plugin
    let mut params = ObjectParams::new();
    params.insert("plugin", "storage.verify-presence").unwrap();
    params.insert("source_objects", json!({ "kind": "none" })).unwrap();
    let err = client
        .request::<Value, _>("jobs.submit.v1", params)
        .await
        .unwrap_err();
    assert_eq!(error_code(err), 4000);

    handle.stop().unwrap();
}
