//! Descriptor accounting for allocation and launch.
//!
//! Kept as the only test in this binary so nothing else opens or closes
//! descriptors while the counts are taken.

use tether_pty::{PtyAllocator, PtyError, PtyLauncher, ShellCommand};

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

#[tokio::test]
async fn test_no_descriptor_outlives_allocation_or_launch() {
    // First spawn sets up the runtime's child-signal plumbing for good.
    let mut warm_up = PtyLauncher::default()
        .launch(&ShellCommand::new("/bin/sh").arg("-c").arg("exit 0"))
        .unwrap();
    warm_up.wait().await.unwrap();
    drop(warm_up);

    let before = open_fds();

    for _ in 0..10 {
        match PtyAllocator::with_device("/dev/null").allocate() {
            Err(PtyError::AllocationFailed(msg)) => assert!(msg.starts_with("unlockpt failed")),
            other => panic!("expected unlock failure, got {:?}", other.map(|p| p.number)),
        }
        assert!(PtyAllocator::with_device("/nonexistent/ptmx").allocate().is_err());
        drop(PtyAllocator::new().allocate().unwrap());
    }
    assert_eq!(open_fds(), before, "allocation leaked descriptors");

    for i in 0..10 {
        let mut process = PtyLauncher::default()
            .launch(&ShellCommand::new("/bin/sh").arg("-c").arg(format!("exit {i}")))
            .unwrap();
        assert_eq!(process.wait().await.unwrap(), Some(i));
    }
    for _ in 0..10 {
        assert!(PtyLauncher::default()
            .launch(&ShellCommand::new("/nonexistent/shell"))
            .is_err());
    }
    assert_eq!(open_fds(), before, "launch leaked descriptors");
}
