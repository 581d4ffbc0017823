//! Session multiplexer tests over an in-memory channel

use std::time::Duration;
use tether::{run_session, RejectReason, SessionOutcome, SessionSpec};
use tether_pty::{PtyAllocator, PtyLauncher, ShellCommand};
use tether_test_utils::fixtures::data;
use tether_test_utils::{init_test_logging, mock_channel, TestFixtures};
use tokio::time::timeout;

const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

fn shell_spec(script: &str) -> SessionSpec {
    let command = ShellCommand::new("/bin/sh")
        .arg("-c")
        .arg(script)
        .env("PATH", "/bin:/usr/bin");
    SessionSpec::new(PtyLauncher::default(), command)
}

fn interactive_spec() -> SessionSpec {
    let command = ShellCommand::new("/bin/sh")
        .env("PATH", "/bin:/usr/bin")
        .env("PS1", "tether$ ");
    SessionSpec::new(PtyLauncher::default(), command)
}

#[cfg(unix)]
mod unix_tests {
    use super::*;

    #[tokio::test]
    async fn test_non_session_channels_are_rejected() {
        init_test_logging();
        // A broken device proves nothing is allocated: allocation would fail
        // and turn the outcome into LaunchFailed.
        let spec = SessionSpec::new(
            PtyLauncher::new(PtyAllocator::with_device("/nonexistent/ptmx")),
            ShellCommand::default(),
        );

        for channel_type in ["direct-tcpip", "x11", "forwarded-tcpip", "Session"] {
            let (channel, peer) = mock_channel(channel_type);
            let outcome = run_session(channel, &spec).await;

            assert_eq!(
                outcome,
                SessionOutcome::Rejected {
                    channel_type: channel_type.to_string()
                }
            );
            assert_eq!(
                peer.rejection(),
                Some((
                    RejectReason::UnknownChannelType,
                    format!("unknown channel type: {channel_type}")
                ))
            );
            assert!(!peer.was_accepted());
            assert_eq!(peer.close_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_allocation_failure_closes_channel() {
        init_test_logging();
        let spec = SessionSpec::new(
            PtyLauncher::new(PtyAllocator::with_device("/nonexistent/ptmx")),
            ShellCommand::default(),
        );
        let (channel, mut peer) = mock_channel("session");

        let outcome = run_session(channel, &spec).await;
        assert_eq!(outcome, SessionOutcome::LaunchFailed);
        assert!(peer.was_accepted());
        assert_eq!(peer.close_count(), 1);

        // No control loop is reading requests and no copy loop produced output
        assert!(peer.request("pty-req", Vec::new(), true).await.is_err());
        let output = peer.read_to_end(Duration::from_secs(2)).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_accept_failure() {
        let (channel, peer) = mock_channel("session");
        peer.fail_accept();

        let outcome = run_session(channel, &SessionSpec::default()).await;
        assert_eq!(outcome, SessionOutcome::AcceptFailed);
        assert_eq!(peer.close_count(), 0);
    }

    #[tokio::test]
    async fn test_process_output_reaches_peer() {
        init_test_logging();
        let spec = shell_spec("echo hello-from-pty");
        let (channel, mut peer) = mock_channel("session");
        let session = tokio::spawn(async move { run_session(channel, &spec).await });

        peer.read_until("hello-from-pty", SESSION_TIMEOUT)
            .await
            .unwrap();

        let outcome = timeout(SESSION_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Closed { exit_code: Some(0) });
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_peer_input_reaches_process() {
        init_test_logging();
        let spec = interactive_spec();
        let (channel, mut peer) = mock_channel("session");
        let session = tokio::spawn(async move { run_session(channel, &spec).await });

        peer.write(b"echo marker-$((6 * 7))\n").await.unwrap();
        peer.read_until("marker-42", SESSION_TIMEOUT).await.unwrap();

        peer.write(b"exit 3\n").await.unwrap();
        let outcome = timeout(SESSION_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Closed { exit_code: Some(3) });
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_peer_hang_up_ends_shell() {
        init_test_logging();
        let spec = interactive_spec();
        let (channel, mut peer) = mock_channel("session");
        let session = tokio::spawn(async move { run_session(channel, &spec).await });

        peer.read_until("tether$ ", SESSION_TIMEOUT).await.unwrap();
        peer.hang_up().await.unwrap();

        // The shell never exits on its own; only the hang-up reaches it.
        let outcome = timeout(SESSION_TIMEOUT, session).await.unwrap().unwrap();
        assert!(matches!(outcome, SessionOutcome::Closed { .. }));
        assert_eq!(peer.close_count(), 1);
    }

    #[tokio::test]
    async fn test_close_runs_once_when_both_sides_finish() {
        init_test_logging();
        for _ in 0..10 {
            let spec = shell_spec("exit 0");
            let (channel, mut peer) = mock_channel("session");
            peer.hang_up().await.unwrap();

            let outcome = timeout(SESSION_TIMEOUT, run_session(channel, &spec))
                .await
                .unwrap();
            assert!(matches!(outcome, SessionOutcome::Closed { .. }));
            assert_eq!(peer.close_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_control_requests() {
        init_test_logging();
        let spec = shell_spec("read line; stty size");
        let (channel, mut peer) = mock_channel("session");
        let session = tokio::spawn(async move { run_session(channel, &spec).await });

        let pty_req = data::pty_request("xterm", 100, 30);
        assert_eq!(peer.request("pty-req", pty_req, true).await.unwrap(), Some(true));
        assert_eq!(peer.request("env", b"LANG".to_vec(), false).await.unwrap(), None);
        // env is never answered, even when a reply is wanted
        assert_eq!(peer.request("env", b"LANG".to_vec(), true).await.unwrap(), None);
        assert_eq!(peer.request("x11-req", Vec::new(), true).await.unwrap(), Some(false));

        let resize = data::window_change(80, 24, [0xdead_beef, 0xffff_ffff]);
        assert_eq!(
            peer.request("window-change", resize, true).await.unwrap(),
            Some(true)
        );
        assert_eq!(peer.request("shell", Vec::new(), true).await.unwrap(), Some(true));
        assert_eq!(peer.request("exec", b"ls".to_vec(), true).await.unwrap(), Some(false));

        peer.write(b"\n").await.unwrap();
        peer.read_until("24 80", SESSION_TIMEOUT).await.unwrap();

        let outcome = timeout(SESSION_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Closed { exit_code: Some(0) });
    }

    #[tokio::test]
    async fn test_shell_without_pty_request() {
        init_test_logging();
        let spec = interactive_spec();
        let (channel, mut peer) = mock_channel("session");
        let session = tokio::spawn(async move { run_session(channel, &spec).await });

        assert_eq!(peer.request("shell", Vec::new(), true).await.unwrap(), Some(true));
        // Only the explicit environment reaches the shell
        peer.write(b"echo home=[$HOME]\n").await.unwrap();
        peer.read_until("home=[]", SESSION_TIMEOUT).await.unwrap();

        peer.write(b"exit\n").await.unwrap();
        let outcome = timeout(SESSION_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Closed { exit_code: Some(0) });
    }

    #[tokio::test]
    async fn test_session_outlives_request_stream() {
        init_test_logging();
        let fixtures = TestFixtures::new().unwrap();
        let script = fixtures
            .create_test_script("greet.sh", "#!/bin/sh\nread name\necho \"got-$name in $(pwd)\"\n")
            .unwrap();
        let command = ShellCommand::new("/bin/sh")
            .arg(script.display().to_string())
            .env("PATH", "/bin:/usr/bin")
            .current_dir(fixtures.path());
        let spec = SessionSpec::new(PtyLauncher::default(), command);

        let (channel, mut peer) = mock_channel("session");
        let session = tokio::spawn(async move { run_session(channel, &spec).await });

        // The control loop ends here; the copy loops keep going.
        peer.end_requests();
        peer.write(b"ping\n").await.unwrap();

        let workdir = std::fs::canonicalize(fixtures.path()).unwrap();
        let expected = format!("got-ping in {}", workdir.display());
        let output = peer.read_to_end(SESSION_TIMEOUT).await.unwrap();
        assert!(output.contains(&expected), "unexpected output: {output:?}");

        let outcome = timeout(SESSION_TIMEOUT, session).await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Closed { exit_code: Some(0) });
        assert_eq!(peer.close_count(), 1);
    }
}
