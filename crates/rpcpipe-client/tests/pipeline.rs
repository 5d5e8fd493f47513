#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cleanup, connected};
use rpcpipe_client::{BatchConfig, Pipeline, PipelineConfig, RequestSpec};
use serde_json::json;

#[tokio::test]
async fn cached_request_goes_to_the_peer_once() {
    let mut h = connected("cache", |c| c).await;
    let pipeline = Arc::new(Pipeline::new(h.client.clone(), PipelineConfig::default()));
    let spec = RequestSpec::new("GET_GUILD", json!({"guild_id": "1"}));

    let first = {
        let pipeline = Arc::clone(&pipeline);
        let spec = spec.clone();
        tokio::spawn(async move { pipeline.cached_request(spec).await })
    };
    let msg = h.peer.recv_message().await;
    assert_eq!(msg.cmd.as_deref(), Some("GET_GUILD"));
    h.peer.reply(&msg, json!({"name": "guild"})).await;
    assert_eq!(first.await.unwrap().unwrap(), json!({"name": "guild"}));

    assert_eq!(
        pipeline.cached_request(spec).await.unwrap(),
        json!({"name": "guild"})
    );
    assert!(h.peer.quiet_for(Duration::from_millis(100)).await);
    assert_eq!(pipeline.cache().len(), 1);
    cleanup(&h.dir);
}

#[tokio::test]
async fn admission_bound_holds_requests_on_the_wire() {
    let mut h = connected("bound", |c| c).await;
    let config = PipelineConfig {
        max_concurrent: 2,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(Pipeline::new(h.client.clone(), config));

    let batch = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .batch_request(
                    ["A", "B", "C"]
                        .into_iter()
                        .map(|c| RequestSpec::new(c, json!({})))
                        .collect(),
                )
                .await
        })
    };

    let first = h.peer.recv_message().await;
    let second = h.peer.recv_message().await;
    assert!(
        h.peer.quiet_for(Duration::from_millis(100)).await,
        "third request admitted past the bound"
    );
    assert_eq!(pipeline.queue().in_flight(), 2);

    h.peer.reply(&first, json!(1)).await;
    let third = h.peer.recv_message().await;
    h.peer.reply(&second, json!(2)).await;
    h.peer.reply(&third, json!(3)).await;

    let results = batch.await.unwrap();
    let mut values: Vec<_> = results.into_iter().map(Result::unwrap).collect();
    values.sort_by_key(|v| v.as_i64());
    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(pipeline.queue().in_flight(), 0);
    cleanup(&h.dir);
}

#[tokio::test]
async fn batched_requests_share_one_flush() {
    let mut h = connected("batch", |c| c).await;
    let config = PipelineConfig {
        batch: Some(BatchConfig {
            delay: Duration::from_millis(30),
        }),
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(Pipeline::new(h.client.clone(), config));

    let batch = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .batch_request(vec![
                    RequestSpec::new("GET_CHANNEL", json!({"id": 1})),
                    RequestSpec::new("GET_CHANNEL", json!({"id": 2})),
                ])
                .await
        })
    };

    let mut seen = Vec::new();
    for _ in 0..2 {
        let msg = h.peer.recv_message().await;
        let id = msg.args.as_ref().unwrap()["id"].clone();
        h.peer.reply(&msg, json!({"id": id})).await;
        seen.push(id);
    }
    seen.sort_by_key(|v| v.as_i64());
    assert_eq!(seen, vec![json!(1), json!(2)]);

    let results = batch.await.unwrap();
    assert_eq!(results[0].as_ref().unwrap(), &json!({"id": 1}));
    assert_eq!(results[1].as_ref().unwrap(), &json!({"id": 2}));
    cleanup(&h.dir);
}
