// tests/transport_rpc.rs

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use testrelay::errors::RelayError;
use testrelay::transport::{HandlerFuture, RequestHandler, Transport};
use testrelay_test_utils::{init_tracing, with_timeout};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

type TestResult = Result<(), Box<dyn Error>>;

struct Echo;

impl RequestHandler for Echo {
    fn handle(&self, method: String, args: Vec<Value>) -> HandlerFuture {
        Box::pin(async move {
            match method.as_str() {
                "echo" => Ok(Value::Array(args)),
                "sum" => Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>())),
                "fail" => Err("nope".to_string()),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("slow"))
                }
                "hang" => {
                    std::future::pending::<()>().await;
                    Ok(Value::Null)
                }
                _ => Ok(Value::Null),
            }
        })
    }
}

fn connected() -> (Transport, Transport) {
    let (controller, worker) = Transport::pair();
    worker.serve(Echo);
    (controller, worker)
}

#[tokio::test]
async fn call_round_trips_and_decodes() -> TestResult {
    with_timeout(async {
        init_tracing();
        let (controller, _worker) = connected();

        let echoed = controller.call("echo", vec![json!("a"), json!(1)]).await?;
        assert_eq!(echoed, json!(["a", 1]));

        let sum: i64 = controller.call_as("sum", vec![json!(2), json!(40)]).await?;
        assert_eq!(sum, 42);
        assert_eq!(controller.pending_calls(), 0);
        Ok(())
    })
    .await
}

#[tokio::test]
async fn remote_errors_name_the_method() -> TestResult {
    with_timeout(async {
        let (controller, _worker) = connected();
        match controller.call("fail", Vec::new()).await {
            Err(RelayError::Remote { method, message }) => {
                assert_eq!(method, "fail");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected: {other:?}"),
        }
        Ok(())
    })
    .await
}

#[tokio::test]
async fn responses_are_correlated_out_of_order() -> TestResult {
    with_timeout(async {
        let (controller, _worker) = connected();
        let slow = controller.call("slow", Vec::new());
        let fast = controller.call("echo", vec![json!("fast")]);

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow?, json!("slow"));
        assert_eq!(fast?, json!(["fast"]));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn events_reach_subscribers_in_order() -> TestResult {
    with_timeout(async {
        let (controller, worker) = connected();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = controller.on("tick", move |args| {
            sink.lock().unwrap().push(args[0].clone());
        });

        for i in 0..5 {
            worker.emit("tick", vec![json!(i)])?;
        }
        // A call after the events is answered after they were dispatched.
        controller.serve(Echo);
        worker.call("echo", Vec::new()).await?;

        assert_eq!(*seen.lock().unwrap(), (0..5).map(|i| json!(i)).collect::<Vec<_>>());

        assert!(controller.off(sub));
        assert!(!controller.off(sub));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn close_rejects_pending_and_later_calls() -> TestResult {
    with_timeout(async {
        let (controller, worker) = connected();

        let hanging = controller.call("hang", Vec::new());
        controller.close();

        assert!(matches!(hanging.await, Err(RelayError::ChannelClosed)));
        assert!(controller.is_closed());
        assert!(controller
            .call("echo", Vec::new())
            .await
            .is_err_and(|e| e.is_channel_closed()));
        assert!(controller.emit("tick", Vec::new()).is_err());

        // The peer notices the stream ended.
        worker.closed().await;
        assert!(worker.is_closed());
        Ok(())
    })
    .await
}

#[tokio::test]
async fn peer_going_away_rejects_pending_calls() -> TestResult {
    with_timeout(async {
        let (controller, worker) = connected();
        let hanging = controller.call("hang", Vec::new());

        worker.close();

        assert!(matches!(hanging.await, Err(RelayError::ChannelClosed)));
        controller.closed().await;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn calls_without_a_handler_are_rejected() -> TestResult {
    with_timeout(async {
        let (controller, _worker) = Transport::pair();
        let err = controller
            .call("getFiles", Vec::new())
            .await
            .err()
            .ok_or("call should fail")?;
        assert!(err.to_string().contains("no handler"));
        Ok(())
    })
    .await
}

#[tokio::test]
async fn malformed_lines_are_skipped() -> TestResult {
    with_timeout(async {
        init_tracing();
        let (ours, theirs) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(ours);
        let transport = Transport::from_io(read, write);

        let (their_read, mut their_write) = tokio::io::split(theirs);
        let call = transport.call("getFiles", Vec::new());

        let mut lines = BufReader::new(their_read).lines();
        let request: Value =
            serde_json::from_str(&lines.next_line().await?.ok_or("no request")?)?;
        assert_eq!(request["type"], "request");
        assert_eq!(request["method"], "getFiles");
        let id = request["id"].as_u64().ok_or("no id")?;

        their_write.write_all(b"vite v5 ready in 120ms\n\n").await?;
        let response = json!({"type": "response", "id": id, "result": [["", "/p/a.test.ts"]]});
        their_write
            .write_all(format!("{response}\n").as_bytes())
            .await?;

        assert_eq!(call.await?, json!([["", "/p/a.test.ts"]]));
        assert!(!transport.is_closed());
        Ok(())
    })
    .await
}
