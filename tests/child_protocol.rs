// tests/child_protocol.rs

use std::error::Error;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use watchpipe::errors::ErrorInfo;
use watchpipe::exec::child::serve_io;
use watchpipe::exec::protocol::{Directive, WireEvent, decode_directive, decode_event, encode_line};
use watchpipe::exec::runnable::TaskReport;
use watchpipe::pipeline::TaskEvent;
use watchpipe_test_utils::scripted_task::{Behaviour, ScriptedTask};
use watchpipe_test_utils::{changed, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn test_directive_wire_shapes() -> TestResult {
    let run = Directive::Run {
        changed_paths: changed(&["a.rs"]),
    };
    let value: Value = serde_json::from_str(&encode_line(&run)?)?;
    assert_eq!(
        value,
        json!({
            "directive": "run",
            "changedPaths": { "added": [], "changed": ["a.rs"], "removed": [] }
        })
    );

    assert_eq!(
        decode_directive(r#"{"directive":"start","options":{"level":2}}"#)?,
        Directive::Start {
            options: json!({ "level": 2 }),
            stop_timeout_ms: None,
        }
    );

    let start = Directive::Start {
        options: json!({}),
        stop_timeout_ms: Some(250),
    };
    let value: Value = serde_json::from_str(&encode_line(&start)?)?;
    assert_eq!(
        value,
        json!({ "directive": "start", "options": {}, "stopTimeoutMs": 250 })
    );
    assert_eq!(decode_directive("{\"directive\":\"stop\"}\n")?, Directive::Stop);
    assert_eq!(decode_directive(r#"{"directive":"exit"}"#)?, Directive::Exit);
    Ok(())
}

#[test]
fn test_event_wire_shapes() -> TestResult {
    assert_eq!(decode_event(r#"{"eventType":"ready"}"#)?, WireEvent::Ready);
    assert_eq!(
        decode_event(r#"{"eventType":"update","update":"50%"}"#)?,
        WireEvent::Update {
            update: "50%".into()
        }
    );
    // A result without a body is an empty, successful report.
    assert_eq!(
        decode_event(r#"{"eventType":"result"}"#)?,
        WireEvent::Result {
            result: TaskReport::success()
        }
    );
    // Error payloads without a name get the generic one.
    assert_eq!(
        decode_event(r#"{"eventType":"error","error":{"message":"bad"}}"#)?,
        WireEvent::Error {
            error: ErrorInfo::new("Error", "bad")
        }
    );

    let line = encode_line(&WireEvent::from_terminal(TaskEvent::Stop))?;
    assert!(line.ends_with('\n'));
    assert_eq!(
        serde_json::from_str::<Value>(&line)?,
        json!({ "eventType": "stop" })
    );

    assert!(decode_event("not json").is_err());
    assert!(decode_event(r#"{"eventType":"bogus"}"#).is_err());
    Ok(())
}

struct Parent {
    writer: DuplexStream,
    reader: tokio::io::Lines<BufReader<DuplexStream>>,
}

impl Parent {
    async fn send(&mut self, directive: Directive) -> TestResult {
        self.writer
            .write_all(encode_line(&directive)?.as_bytes())
            .await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<WireEvent, Box<dyn Error>> {
        let line = self.reader.next_line().await?.ok_or("child closed stdout")?;
        Ok(decode_event(&line)?)
    }
}

fn start(options: Value) -> Directive {
    Directive::Start {
        options,
        stop_timeout_ms: None,
    }
}

fn serve(behaviour: Behaviour) -> (Parent, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let (task, _) = ScriptedTask::new(behaviour).shared();
    let (parent_out, child_in) = tokio::io::duplex(4096);
    let (child_out, parent_in) = tokio::io::duplex(4096);
    let handle = tokio::spawn(serve_io(task, child_in, child_out));
    (
        Parent {
            writer: parent_out,
            reader: BufReader::new(parent_in).lines(),
        },
        handle,
    )
}

#[tokio::test]
async fn test_child_harness_start_run_exit() -> TestResult {
    init_tracing();
    let (mut parent, handle) = serve(Behaviour::Succeed);

    with_timeout(async {
        parent.send(start(json!({}))).await?;
        assert_eq!(parent.next_event().await?, WireEvent::Ready);

        parent
            .send(Directive::Run {
                changed_paths: changed(&["x.rs"]),
            })
            .await?;
        assert_eq!(
            parent.next_event().await?,
            WireEvent::Update {
                update: "run 1 started".into()
            }
        );
        match parent.next_event().await? {
            WireEvent::Result { result } => assert_eq!(result.results, vec![json!({ "path": "x.rs" })]),
            other => panic!("expected a result, got {other:?}"),
        }

        parent.send(Directive::Exit).await?;
        handle.await??;
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn test_child_harness_stop_ends_run_with_stop_event() -> TestResult {
    init_tracing();
    let (mut parent, handle) = serve(Behaviour::BlockUntilStopped);

    with_timeout(async {
        parent.send(start(Value::Null)).await?;
        assert_eq!(parent.next_event().await?, WireEvent::Ready);

        parent
            .send(Directive::Run {
                changed_paths: changed(&["x.rs"]),
            })
            .await?;
        // The update proves the run is in flight before the stop goes out.
        assert!(matches!(parent.next_event().await?, WireEvent::Update { .. }));

        parent.send(Directive::Stop).await?;
        assert_eq!(parent.next_event().await?, WireEvent::Stop);

        // Closing stdin ends the harness too.
        drop(parent.writer);
        handle.await??;
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn test_run_before_start_is_an_error_event() -> TestResult {
    let (mut parent, _handle) = serve(Behaviour::Succeed);

    with_timeout(async {
        parent
            .send(Directive::Run {
                changed_paths: changed(&["x.rs"]),
            })
            .await?;
        assert!(matches!(parent.next_event().await?, WireEvent::Error { .. }));
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn test_malformed_directives_are_skipped() -> TestResult {
    let (mut parent, _handle) = serve(Behaviour::Succeed);

    with_timeout(async {
        parent.writer.write_all(b"this is not json\n\n").await?;
        parent.send(start(Value::Null)).await?;
        assert_eq!(parent.next_event().await?, WireEvent::Ready);
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn test_harness_exits_when_input_closes_mid_run() -> TestResult {
    let (mut parent, handle) = serve(Behaviour::Delay(Duration::from_secs(30)));

    with_timeout(async {
        parent.send(start(Value::Null)).await?;
        parent.next_event().await?;
        parent
            .send(Directive::Run {
                changed_paths: changed(&["x.rs"]),
            })
            .await?;
        drop(parent.writer);
        handle.await??;
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn test_panicking_run_still_ends_with_an_error_event() -> TestResult {
    init_tracing();
    let (mut parent, handle) = serve(Behaviour::Panic);

    with_timeout(async {
        parent.send(start(Value::Null)).await?;
        assert_eq!(parent.next_event().await?, WireEvent::Ready);

        parent
            .send(Directive::Run {
                changed_paths: changed(&["x.rs"]),
            })
            .await?;
        let terminal = loop {
            match parent.next_event().await? {
                WireEvent::Update { .. } => continue,
                other => break other,
            }
        };
        match terminal {
            WireEvent::Error { error } => assert_eq!(error.name, "UnexpectedTaskTerminationError"),
            other => panic!("expected an error event, got {other:?}"),
        }

        // The harness keeps serving after the panic.
        parent
            .send(Directive::Run {
                changed_paths: changed(&["y.rs"]),
            })
            .await?;
        assert!(matches!(parent.next_event().await?, WireEvent::Update { .. }));

        parent.send(Directive::Exit).await?;
        handle.await??;
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}

#[tokio::test]
async fn test_child_applies_the_stop_timeout_from_start() -> TestResult {
    init_tracing();
    let (mut parent, _handle) = serve(Behaviour::NeverSettle);

    with_timeout(async {
        parent
            .send(Directive::Start {
                options: Value::Null,
                stop_timeout_ms: Some(100),
            })
            .await?;
        assert_eq!(parent.next_event().await?, WireEvent::Ready);

        parent
            .send(Directive::Run {
                changed_paths: changed(&["x.rs"]),
            })
            .await?;
        assert!(matches!(parent.next_event().await?, WireEvent::Update { .. }));

        let started = Instant::now();
        parent.send(Directive::Stop).await?;
        match parent.next_event().await? {
            WireEvent::Error { error } => {
                assert_eq!(error.name, "TaskTerminationTimeoutError");
                assert!(error.message.contains("100ms"), "message: {}", error.message);
            }
            other => panic!("expected an error event, got {other:?}"),
        }
        // Well under the 3s default.
        assert!(started.elapsed() < Duration::from_secs(2));
        Ok::<_, Box<dyn Error>>(())
    })
    .await
}
