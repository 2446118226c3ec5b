//! OS process helpers: liveness, signal delivery and the shutdown listener.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Returns the pid of the current process.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Returns whether a process with `pid` exists.
///
/// Uses signal 0; a process owned by another user (EPERM) counts as alive.
/// A reused pid is reported alive as well.
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: kill with signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends `signal` to process `pid`.
pub fn send_signal(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let pid = i32::try_from(pid)
        .ok()
        .filter(|pid| *pid > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid pid"))?;

    // SAFETY: plain syscall on a positive pid, no memory is shared.
    if unsafe { libc::kill(pid, signal) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Asks process `pid` to shut down gracefully.
pub fn terminate(pid: u32) -> io::Result<()> {
    send_signal(pid, libc::SIGTERM)
}

/// Spawns a task forwarding SIGTERM and SIGINT to `shutdown_tx`.
///
/// Each received signal sends one message; the task ends once every
/// receiver is gone.
pub fn listen_for_shutdown(shutdown_tx: broadcast::Sender<()>) -> io::Result<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigint.recv() => "SIGINT",
                else => break,
            };

            info!(signal = name, "Shutdown requested");
            if shutdown_tx.send(()).is_err() {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_alive(current_pid()));
    }

    #[test]
    fn test_reaped_process_is_dead() {
        assert!(!is_alive(dead_pid()));
    }

    #[test]
    fn test_invalid_pids() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
        assert!(send_signal(0, 0).is_err());
    }

    #[test]
    fn test_terminate_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();

        terminate(child.id()).unwrap();
        let status = child.wait().unwrap();

        assert!(!status.success());
        assert!(!is_alive(child.id()));
    }

    #[tokio::test]
    async fn test_listener_forwards_sigterm() {
        let (tx, mut rx) = broadcast::channel(4);
        let _listener = listen_for_shutdown(tx).unwrap();

        send_signal(current_pid(), libc::SIGTERM).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
}
