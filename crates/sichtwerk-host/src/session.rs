// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Line-delimited JSON session over a reader/writer pair.
//
// Each input line is `{"id":N,"method":"...","arguments":{...}}`. Calls run
// concurrently; each reply is written as `{"id":N, ...response}` as soon as
// it is ready, so replies may come back out of order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use sichtwerk_bridge::{MethodCall, MethodChannel, MethodResponse};
use sichtwerk_core::error::Result;
use sichtwerk_core::{ErrorKind, SichtwerkError};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Value,
    #[serde(flatten)]
    call: MethodCall,
}

#[derive(Debug, Serialize)]
struct Reply {
    id: Value,
    #[serde(flatten)]
    response: MethodResponse,
}

/// Serve calls from `input` until it closes and every call is answered.
/// Returns the writer once flushed.
///
/// A read error stops intake, but calls already accepted are still answered
/// before the error is returned.
pub async fn serve<R, W>(channel: MethodChannel, mut input: R, output: W) -> Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Reply>();
    let writer = tokio::spawn(write_replies(rx, output));

    let mut calls = JoinSet::new();
    let mut line = Vec::new();
    // Lines are read as raw bytes so a line that is not UTF-8 is just another
    // malformed request. Only a real read error ends the loop early.
    let read_result = loop {
        line.clear();
        match input.read_until(b'\n', &mut line).await {
            Ok(0) => break Ok(()),
            Ok(_) => {}
            Err(e) => break Err(e),
        }
        if line.trim_ascii().is_empty() {
            continue;
        }
        match serde_json::from_slice::<Envelope>(&line) {
            Ok(Envelope { id, call }) => {
                debug!(%id, method = %call.method, "call received");
                let channel = channel.clone();
                let tx = tx.clone();
                calls.spawn(async move {
                    let response = channel.handle(call).await;
                    // Only fails if the writer died; its error surfaces below.
                    let _ = tx.send(Reply { id, response });
                });
            }
            Err(e) => {
                warn!(error = %e, "malformed request line");
                let _ = tx.send(Reply {
                    id: Value::Null,
                    response: MethodResponse::Error {
                        kind: ErrorKind::ProcessingError,
                        message: format!("malformed request: {e}"),
                    },
                });
            }
        }
    };

    match &read_result {
        Ok(()) => info!(pending = calls.len(), "input closed, draining calls"),
        Err(e) => warn!(error = %e, pending = calls.len(), "input failed, draining calls"),
    }
    while let Some(joined) = calls.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "call task failed");
        }
    }
    drop(tx);

    let output = writer
        .await
        .map_err(|e| SichtwerkError::Processing(format!("reply writer failed: {e}")))??;
    read_result?;
    Ok(output)
}

async fn write_replies<W>(mut rx: mpsc::UnboundedReceiver<Reply>, mut output: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        let mut line = serde_json::to_vec(&reply)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use sichtwerk_bridge::FrameBridge;
    use sichtwerk_core::BridgeConfig;
    use sichtwerk_native::platform_backend;

    use super::*;

    async fn run(input: &str) -> Vec<Value> {
        run_bytes(input.as_bytes()).await
    }

    async fn run_bytes(input: &[u8]) -> Vec<Value> {
        let config = BridgeConfig::default();
        let backend = platform_backend(config.detector).expect("backend");
        let bridge = FrameBridge::start(backend, &config);
        let channel = MethodChannel::new(config.channel_name.clone(), bridge);
        let out = serve(channel, input, Vec::new()).await.expect("serve");
        String::from_utf8(out)
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    #[tokio::test]
    async fn every_call_gets_one_reply() {
        let input = concat!(
            r#"{"id":1,"method":"detectObjectsFromStream","arguments":{"width":0,"height":8}}"#,
            "\n",
            r#"{"id":2,"method":"startCamera"}"#,
            "\n\n",
            r#"{"id":3,"method":"detectObjects","arguments":{}}"#,
            "\n",
        );
        let replies = run(input).await;
        assert_eq!(replies.len(), 3);

        let by_id: HashMap<u64, &Value> = replies
            .iter()
            .map(|r| (r["id"].as_u64().expect("id"), r))
            .collect();
        assert_eq!(by_id[&1]["status"], "error");
        assert_eq!(by_id[&1]["kind"], "INVALID_ARGUMENT");
        assert_eq!(by_id[&2]["status"], "not_implemented");
        assert_eq!(by_id[&3]["message"], "Image path is required");
    }

    #[tokio::test]
    async fn malformed_line_gets_null_id() {
        let replies = run("this is not json\n").await;
        assert_eq!(replies.len(), 1);
        assert!(replies[0]["id"].is_null());
        assert_eq!(replies[0]["kind"], "PROCESSING_ERROR");
    }

    #[cfg(not(any(target_os = "ios", target_os = "android")))]
    #[tokio::test]
    async fn stub_backend_error_reaches_host() {
        let input = format!(
            "{}\n",
            serde_json::json!({
                "id": 7,
                "method": "detectObjectsFromStream",
                "arguments": { "pixelData": vec![0u8; 64], "width": 8, "height": 8, "rotationDegrees": 0 },
            })
        );
        let replies = run(&input).await;
        assert_eq!(replies[0]["id"], 7);
        assert_eq!(replies[0]["kind"], "DETECTION_ERROR");
        assert_eq!(
            replies[0]["message"],
            sichtwerk_native::stub::UNAVAILABLE_MESSAGE
        );
    }

    #[tokio::test]
    async fn non_utf8_line_does_not_end_session() {
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"id":1,"method":"startCamera"}"#);
        input.extend_from_slice(b"\n\xff\xfe garbage\n");
        input.extend_from_slice(br#"{"id":2,"method":"startCamera"}"#);
        input.push(b'\n');

        let replies = run_bytes(&input).await;
        assert_eq!(replies.len(), 3);
        let answered: Vec<u64> = replies.iter().filter_map(|r| r["id"].as_u64()).collect();
        assert!(answered.contains(&1) && answered.contains(&2));

        let malformed: Vec<&Value> = replies.iter().filter(|r| r["id"].is_null()).collect();
        assert_eq!(malformed.len(), 1);
        assert_eq!(malformed[0]["kind"], "PROCESSING_ERROR");
    }

    struct BrokenPipe;

    impl tokio::io::AsyncRead for BrokenPipe {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("pipe broke")))
        }
    }

    #[tokio::test]
    async fn read_error_drains_accepted_calls_first() {
        use tokio::io::AsyncReadExt;

        let config = BridgeConfig::default();
        let backend = platform_backend(config.detector).expect("backend");
        let channel = MethodChannel::new("object_detection", FrameBridge::start(backend, &config));

        let line = serde_json::json!({
            "id": 1,
            "method": "detectObjectsFromStream",
            "arguments": { "pixelData": vec![0u8; 64], "width": 8, "height": 8 },
        });
        let first = format!("{line}\n").into_bytes();
        let input = tokio::io::BufReader::new(first.as_slice().chain(BrokenPipe));

        let err = serve(channel.clone(), input, Vec::new())
            .await
            .expect_err("read error surfaces");
        assert!(matches!(err, SichtwerkError::Io(_)));

        let stats = channel.bridge().stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed + stats.failed, 1);
    }

    #[tokio::test]
    async fn last_line_without_newline_is_served() {
        let replies = run(r#"{"id":4,"method":"startCamera"}"#).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["status"], "not_implemented");
    }

    #[tokio::test]
    async fn empty_input_writes_nothing() {
        assert!(run("").await.is_empty());
    }
}
