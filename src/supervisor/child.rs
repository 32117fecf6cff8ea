// src/supervisor/child.rs

//! The running apt-get/dpkg process tree and its two channels
//!
//! apt-get gets a fresh pseudo-terminal as stdin/stdout/stderr and controlling
//! terminal, which dpkg inherits, plus the write end of a pipe announced
//! through `APT::Status-Fd`.
//! The parent keeps only the pty master and the pipe's read end, both
//! switched to non-blocking mode right after spawn.

use crate::error::{Error, Result};
use crate::transaction::AptInvocation;
use nix::fcntl::OFlag;
use nix::pty::openpty;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, pipe2};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// How the child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    Exited(i32),
    Signaled(Signal),
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Shell-style exit code (128 + signal number for signals)
    pub fn code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(sig) => 128 + *sig as i32,
        }
    }
}

/// Exclusive owner of the child process and its descriptors
///
/// Descriptors close when the handle drops. A handle dropped before the child
/// was reaped kills and reaps it, so no path leaks a zombie.
#[derive(Debug)]
pub struct ChildHandle {
    pid: Pid,
    pty_master: File,
    status_read: File,
    exit: Option<ChildExit>,
}

impl ChildHandle {
    /// Spawn `program` (apt-get) for one invocation with a sanitized environment
    pub fn spawn(program: &Path, invocation: &AptInvocation, env: &[(String, String)]) -> Result<Self> {
        let pty = openpty(None, None)?;
        set_cloexec(&pty.master)?;
        set_cloexec(&pty.slave)?;

        // O_CLOEXEC here; cleared in the child only, just before exec
        let (status_read, status_write) = pipe2(OFlag::O_CLOEXEC)?;
        let status_fd = status_write.as_raw_fd();

        let mut cmd = Command::new(program);
        cmd.args(invocation.args(status_fd))
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir("/")
            .stdin(Stdio::from(pty.slave.try_clone()?))
            .stdout(Stdio::from(pty.slave.try_clone()?))
            .stderr(Stdio::from(pty.slave));

        // SAFETY: only async-signal-safe libc calls between fork and exec
        unsafe {
            cmd.pre_exec(move || child_setup(status_fd));
        }

        debug!("Spawning {} {:?}", program.display(), invocation.args(status_fd));
        let child = cmd
            .spawn()
            .map_err(|e| Error::SpawnError(format!("{}: {}", program.display(), e)))?;

        // Own the child before anything else can fail, so Drop reaps it
        let handle = Self {
            pid: Pid::from_raw(child.id() as i32),
            pty_master: File::from(pty.master),
            status_read: File::from(status_read),
            exit: None,
        };

        // Drop the parent's copies of the slave and the write end so EOF shows
        drop(cmd);
        drop(status_write);

        set_nonblocking(&handle.pty_master)?;
        set_nonblocking(&handle.status_read)?;
        Ok(handle)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The status pipe and the pty master, borrowed together
    pub fn streams(&mut self) -> (&mut File, &mut File) {
        (&mut self.status_read, &mut self.pty_master)
    }

    pub fn pty_master(&mut self) -> &mut File {
        &mut self.pty_master
    }

    /// Ask the child to stop; the exit status is still collected by `try_wait`
    pub fn terminate(&self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        kill(self.pid, Signal::SIGTERM)?;
        Ok(())
    }

    /// Non-blocking liveness check; `Some` once the child has been reaped
    pub fn try_wait(&mut self) -> Result<Option<ChildExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }

        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG))? {
            WaitStatus::Exited(_, code) => self.exit = Some(ChildExit::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => self.exit = Some(ChildExit::Signaled(sig)),
            // Still running, stopped or continued
            _ => {}
        }
        Ok(self.exit)
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        if self.exit.is_some() {
            return;
        }
        warn!("Releasing child (pid {}) before it exited, killing it", self.pid);
        let _ = kill(self.pid, Signal::SIGKILL);
        let _ = waitpid(self.pid, None);
    }
}

/// Runs in the forked child: new session, pty as controlling terminal,
/// status fd inherited across exec
fn child_setup(status_fd: RawFd) -> io::Result<()> {
    unsafe {
        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }
        // Best effort; apt and dpkg still work without a controlling terminal
        libc::ioctl(0, libc::TIOCSCTTY as _, 0);
        if libc::fcntl(status_fd, libc::F_SETFD, 0) == -1 {
            return Err(io::Error::last_os_error());
        }
        // The executor may block SIGINT for its signal thread; the child must not inherit that
        let mut empty: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut empty);
        libc::pthread_sigmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
    }
    Ok(())
}

fn set_cloexec(fd: &OwnedFd) -> Result<()> {
    let raw = fd.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFD);
        if flags == -1 || libc::fcntl(raw, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}

fn set_nonblocking(fd: &impl AsRawFd) -> Result<()> {
    let raw = fd.as_raw_fd();
    unsafe {
        let flags = libc::fcntl(raw, libc::F_GETFL);
        if flags == -1 || libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(())
}
