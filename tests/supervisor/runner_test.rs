//! Supervisor lifecycle tests against scripted processes.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use script_supervisor::buffer::Channel;
use script_supervisor::config::ScriptConfig;
use script_supervisor::process::Termination;
use script_supervisor::supervisor::{
    ChannelDelegate, Failure, Outcome, PatternClassifier, ProcessSupervisor, RecordingDelegate,
    RunState, SupervisorEvent,
};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;

use super::fake::{process_with_pipes, FakeSpawner};

fn config(delimiter: &str, autostart: bool) -> ScriptConfig {
    ScriptConfig {
        delimiter: delimiter.to_string(),
        autostart,
        ..ScriptConfig::new("/usr/local/bin/build.sh")
    }
}

async fn supervisor(
    spawner: &FakeSpawner,
    delimiter: &str,
    delegate: Arc<RecordingDelegate>,
) -> ProcessSupervisor {
    ProcessSupervisor::builder(config(delimiter, true))
        .unwrap()
        .spawner(spawner.clone())
        .build(delegate)
        .await
        .unwrap()
}

/// Wait for the next piece on a channel delegate's stream.
async fn next_piece(
    events: &mut (impl tokio_stream::Stream<Item = SupervisorEvent> + Unpin),
) -> (Channel, String) {
    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for a piece")
        .expect("event stream closed");
    match event {
        SupervisorEvent::Piece { channel, text } => (channel, text),
        SupervisorEvent::Outcome { outcome } => panic!("expected a piece, got {outcome:?}"),
    }
}

#[tokio::test]
async fn test_pieces_then_success_with_tail() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "|", delegate.clone()).await;
    assert_eq!(supervisor.state(), RunState::Running);

    handle.stdout.write_all(b"a|b").await.unwrap();
    handle.stdout.write_all(b"|c").await.unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(0)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(outcome, Outcome::Success("c".to_string()));
    assert_eq!(supervisor.state(), RunState::Stopped);
    assert_eq!(supervisor.outcome(), Some(outcome));
    assert_eq!(delegate.pieces(Channel::Stdout), vec!["a", "b"]);
    assert!(delegate.pieces(Channel::Stderr).is_empty());

    let events = delegate.events();
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_channels_are_segmented_independently() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "\n", delegate.clone()).await;

    handle.stdout.write_all(b"out one\nout ").await.unwrap();
    handle.stderr.write_all(b"warn one\nwarn").await.unwrap();
    handle.stdout.write_all(b"two\n").await.unwrap();
    handle.stderr.write_all(b" two\n").await.unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(0)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(outcome, Outcome::Success(String::new()));
    assert_eq!(delegate.pieces(Channel::Stdout), vec!["out one", "out two"]);
    assert_eq!(delegate.pieces(Channel::Stderr), vec!["warn one", "warn two"]);
}

#[tokio::test]
async fn test_nonzero_exit_with_stderr_is_syntax_error() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    handle
        .stderr
        .write_all(b"line 3: unexpected token\n")
        .await
        .unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(2)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Failure(Failure::SyntaxError {
            stderr: "line 3: unexpected token\n".to_string(),
            exit_code: 2,
        })
    );
    assert!(delegate.events().iter().all(SupervisorEvent::is_terminal));
}

#[tokio::test]
async fn test_nonzero_exit_without_stderr_is_generic() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "|", delegate.clone()).await;

    handle.stdout.write_all(b"step 1|partial").await.unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(4)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Failure(Failure::Generic {
            output: "step 1|partial".to_string(),
            exit_code: 4,
        })
    );
    assert_eq!(delegate.pieces(Channel::Stdout), vec!["step 1"]);
}

#[tokio::test]
async fn test_line_delimited_stderr_is_still_syntax_error() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "\n", delegate.clone()).await;

    handle
        .stderr
        .write_all(b"line 3: unexpected token\n")
        .await
        .unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(2)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Failure(Failure::SyntaxError {
            stderr: "line 3: unexpected token\n".to_string(),
            exit_code: 2,
        })
    );
    assert_eq!(
        delegate.pieces(Channel::Stderr),
        vec!["line 3: unexpected token"]
    );
}

#[tokio::test]
async fn test_line_delimited_generic_carries_all_output() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = ProcessSupervisor::builder(config("\n", true))
        .unwrap()
        .spawner(spawner.clone())
        .classifier(PatternClassifier::new("(?i)syntax error").unwrap())
        .build(delegate.clone())
        .await
        .unwrap();

    handle.stdout.write_all(b"step1\n").await.unwrap();
    handle.stderr.write_all(b"oops\n").await.unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(3)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Failure(Failure::Generic {
            output: "step1\noops\n".to_string(),
            exit_code: 3,
        })
    );
    assert_eq!(delegate.pieces(Channel::Stdout), vec!["step1"]);
    assert_eq!(delegate.pieces(Channel::Stderr), vec!["oops"]);
}

#[tokio::test]
async fn test_line_delimited_success_carries_only_tail() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "\n", delegate.clone()).await;

    handle.stdout.write_all(b"first\nlast").await.unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(0)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(outcome, Outcome::Success("last".to_string()));
}

#[tokio::test]
async fn test_restart_does_not_carry_output_into_next_outcome() {
    let spawner = FakeSpawner::new();
    let mut first = spawner.push_process();
    let mut second = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "\n", delegate.clone()).await;

    first.stderr.write_all(b"old warning\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    supervisor.restart().await.unwrap();

    second.stdout.write_all(b"new\n").await.unwrap();
    drop(second.stdout);
    drop(second.stderr);
    second.exit.send(Termination::exited(5)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Failure(Failure::Generic {
            output: "new\n".to_string(),
            exit_code: 5,
        })
    );
}

#[tokio::test]
async fn test_external_signal_is_generic() {
    let spawner = FakeSpawner::new();
    let handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::signaled(9)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert!(matches!(
        outcome,
        Outcome::Failure(Failure::Generic { exit_code: 9, .. })
    ));
    assert_eq!(supervisor.stats().manual_stops, 0);
}

#[tokio::test]
async fn test_custom_classifier_overrides_default() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = ProcessSupervisor::builder(config("", true))
        .unwrap()
        .spawner(spawner.clone())
        .classifier(PatternClassifier::new("(?i)syntax error").unwrap())
        .build(delegate.clone())
        .await
        .unwrap();

    handle.stderr.write_all(b"disk full\n").await.unwrap();
    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(1)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Failure(Failure::Generic {
            output: "disk full\n".to_string(),
            exit_code: 1,
        })
    );
}

#[tokio::test]
async fn test_launch_failure_is_generic_127() {
    let spawner = FakeSpawner::new();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    let outcome = supervisor.wait().await.unwrap();
    match outcome {
        Outcome::Failure(Failure::Generic { output, exit_code }) => {
            assert_eq!(exit_code, 127);
            assert!(output.contains("build.sh"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(supervisor.state(), RunState::Stopped);
    assert_eq!(delegate.outcomes().len(), 1);
}

#[tokio::test]
async fn test_chunked_reads_from_mock_pipes() {
    let spawner = FakeSpawner::new();
    let stdout = tokio_test::io::Builder::new()
        .read(b"pie")
        .read(b"ce|pi")
        .wait(Duration::from_millis(10))
        .read("ece|t\u{e4}".as_bytes())
        .read(b"il")
        .build();
    let stderr = tokio_test::io::Builder::new().build();
    spawner.push(process_with_pipes(
        Box::new(stdout),
        Box::new(stderr),
        Termination::exited(0),
    ));
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "|", delegate.clone()).await;

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(outcome, Outcome::Success("t\u{e4}il".to_string()));
    assert_eq!(delegate.pieces(Channel::Stdout), vec!["piece", "piece"]);
}

#[tokio::test]
async fn test_stop_while_running_is_manual_termination() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let (delegate, mut events) = ChannelDelegate::new();
    let supervisor = ProcessSupervisor::builder(config("\n", true))
        .unwrap()
        .spawner(spawner.clone())
        .build(Arc::new(delegate))
        .await
        .unwrap();

    handle.stdout.write_all(b"working\n").await.unwrap();
    assert_eq!(
        next_piece(&mut events).await,
        (Channel::Stdout, "working".to_string())
    );

    supervisor.stop().await.unwrap();
    assert!(handle.was_terminated());
    assert_eq!(supervisor.state(), RunState::Stopped);
    assert_eq!(
        supervisor.outcome(),
        Some(Outcome::Failure(Failure::ManualTermination))
    );
    assert_eq!(supervisor.stats().manual_stops, 1);

    // The outcome was delivered before stop returned.
    let event = events.next().await.unwrap();
    assert_eq!(
        event,
        SupervisorEvent::Outcome {
            outcome: Outcome::Failure(Failure::ManualTermination)
        }
    );

    // Nothing follows the outcome, even if the process keeps writing.
    let _ = handle.stdout.write_all(b"late\n").await;
    let late = tokio::time::timeout(Duration::from_millis(100), events.next()).await;
    assert!(!matches!(late, Ok(Some(_))));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let spawner = FakeSpawner::new();
    let _handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    supervisor.stop().await.unwrap();
    supervisor.stop().await.unwrap();

    assert_eq!(
        delegate.outcomes(),
        vec![Outcome::Failure(Failure::ManualTermination)]
    );
    assert_eq!(supervisor.stats().manual_stops, 1);
}

#[tokio::test]
async fn test_stop_after_natural_exit_keeps_outcome() {
    let spawner = FakeSpawner::new();
    let handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(0)).unwrap();
    supervisor.wait().await.unwrap();

    supervisor.stop().await.unwrap();
    assert_eq!(delegate.outcomes(), vec![Outcome::Success(String::new())]);
    assert_eq!(supervisor.stats().manual_stops, 0);
}

#[tokio::test]
async fn test_stop_after_exit_observed_keeps_natural_outcome() {
    let spawner = FakeSpawner::new();
    let mut handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    handle.stdout.write_all(b"done").await.unwrap();
    handle.exit.send(Termination::exited(0)).unwrap();
    // Pipes stay open, so the run is still draining when stop arrives.
    tokio::time::sleep(Duration::from_millis(100)).await;

    supervisor.stop().await.unwrap();
    assert!(!handle.terminated.load(Ordering::SeqCst));
    assert_eq!(delegate.outcomes(), vec![Outcome::Success("done".to_string())]);
    assert_eq!(supervisor.stats().manual_stops, 0);
}

#[tokio::test]
async fn test_start_while_running_is_noop() {
    let spawner = FakeSpawner::new();
    let _handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;
    let run_id = supervisor.run_id();

    supervisor.start().await.unwrap();
    assert_eq!(spawner.launches().len(), 1);
    assert_eq!(supervisor.run_id(), run_id);
    assert_eq!(supervisor.state(), RunState::Running);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_uses_fresh_buffers() {
    let spawner = FakeSpawner::new();
    let mut first = spawner.push_process();
    let mut second = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "|", delegate.clone()).await;
    let first_id = supervisor.run_id().unwrap();

    first.stdout.write_all(b"stale").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    supervisor.restart().await.unwrap();
    assert!(first.was_terminated());
    assert_eq!(supervisor.state(), RunState::Running);
    assert!(supervisor.outcome().is_none());
    assert_ne!(supervisor.run_id().unwrap(), first_id);

    second.stdout.write_all(b"fresh|").await.unwrap();
    drop(second.stdout);
    drop(second.stderr);
    second.exit.send(Termination::exited(0)).unwrap();

    let outcome = supervisor.wait().await.unwrap();
    assert_eq!(outcome, Outcome::Success(String::new()));
    assert_eq!(delegate.pieces(Channel::Stdout), vec!["fresh"]);
    assert_eq!(
        delegate.outcomes(),
        vec![
            Outcome::Failure(Failure::ManualTermination),
            Outcome::Success(String::new()),
        ]
    );
    assert_eq!(spawner.launches().len(), 2);
    assert_eq!(supervisor.stats().runs, 2);
}

#[tokio::test]
async fn test_restart_when_idle_starts() {
    let spawner = FakeSpawner::new();
    let handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = ProcessSupervisor::builder(config("", false))
        .unwrap()
        .spawner(spawner.clone())
        .build(delegate.clone())
        .await
        .unwrap();

    supervisor.restart().await.unwrap();
    assert_eq!(supervisor.state(), RunState::Running);
    assert!(delegate.outcomes().is_empty());

    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(0)).unwrap();
    assert!(supervisor.wait().await.unwrap().is_success());
}

#[tokio::test]
async fn test_autostart_disabled_waits_for_start() {
    let spawner = FakeSpawner::new();
    let handle = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = ProcessSupervisor::builder(config("", false))
        .unwrap()
        .spawner(spawner.clone())
        .build(delegate.clone())
        .await
        .unwrap();

    assert_eq!(supervisor.state(), RunState::Idle);
    assert!(spawner.launches().is_empty());

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), RunState::Running);
    let launches = spawner.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(
        launches[0].path,
        std::path::PathBuf::from("/usr/local/bin/build.sh")
    );

    drop(handle.stdout);
    drop(handle.stderr);
    handle.exit.send(Termination::exited(0)).unwrap();
    assert!(supervisor.wait().await.unwrap().is_success());
}

#[tokio::test]
async fn test_start_after_outcome_begins_new_run() {
    let spawner = FakeSpawner::new();
    let first = spawner.push_process();
    let second = spawner.push_process();
    let delegate = Arc::new(RecordingDelegate::new());
    let supervisor = supervisor(&spawner, "", delegate.clone()).await;

    drop(first.stdout);
    drop(first.stderr);
    first.exit.send(Termination::exited(1)).unwrap();
    assert!(!supervisor.wait().await.unwrap().is_success());

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), RunState::Running);
    assert!(supervisor.outcome().is_none());

    drop(second.stdout);
    drop(second.stderr);
    second.exit.send(Termination::exited(0)).unwrap();
    assert!(supervisor.wait().await.unwrap().is_success());
    assert_eq!(delegate.outcomes().len(), 2);
}
