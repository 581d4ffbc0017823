//! Process lifecycle and edge case tests

use std::time::Duration;
use tether_pty::{PtyAllocator, PtyError, PtyLauncher, ShellCommand};
use tokio::time::timeout;

#[cfg(unix)]
mod unix_tests {
    use super::*;

    #[tokio::test]
    async fn test_two_launches_are_independent() {
        let launcher = PtyLauncher::default();
        let command = ShellCommand::new("/bin/sh").arg("-c").arg("sleep 5");

        let mut first = launcher.launch(&command).expect("first launch");
        let mut second = launcher.launch(&command).expect("second launch");

        assert_ne!(first.pid(), second.pid());
        assert_ne!(first.controller().number(), second.controller().number());
        assert_ne!(
            std::os::unix::io::AsRawFd::as_raw_fd(first.controller()),
            std::os::unix::io::AsRawFd::as_raw_fd(second.controller())
        );

        // Hanging up one terminal must not disturb the other
        let (controller, mut child) = first.into_parts();
        drop(controller);
        let status = timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("first process should exit after hang-up")
            .expect("reap");
        assert!(!status.success());
        assert!(second.pid().is_some());

        let (controller, mut child) = second.into_parts();
        drop(controller);
        let _ = timeout(Duration::from_secs(5), child.wait()).await;
    }

    #[tokio::test]
    async fn test_rapid_process_spawn() {
        let launcher = PtyLauncher::default();
        for i in 0..5 {
            let command = ShellCommand::new("/bin/sh")
                .arg("-c")
                .arg(format!("exit {i}"));
            let mut process = launcher
                .launch(&command)
                .unwrap_or_else(|_| panic!("Should launch process {i}"));

            let code = timeout(Duration::from_secs(5), process.wait())
                .await
                .expect("process should exit")
                .expect("reap");
            assert_eq!(code, Some(i));
        }
    }

    #[tokio::test]
    async fn test_launch_without_device() {
        let launcher = PtyLauncher::new(PtyAllocator::with_device("/nonexistent/ptmx"));
        let result = launcher.launch(&ShellCommand::default());
        assert!(matches!(result, Err(PtyError::AllocationFailed(_))));
    }
}
