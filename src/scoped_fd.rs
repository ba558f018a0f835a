use nix::{
    fcntl::{fcntl, open, FcntlArg, OFlag},
    sys::stat::Mode,
    unistd::{close, pipe2},
    NixPath,
};
use std::os::unix::io::RawFd;

// We DON'T want this to be Copy or Clone because of the Drop.
#[derive(Debug)]
pub struct ScopedFd {
    fd: RawFd,
}

impl ScopedFd {
    pub fn from_raw(fd: RawFd) -> Self {
        ScopedFd { fd }
    }

    pub fn open_path_with_mode<P: ?Sized + NixPath>(
        path: &P,
        oflag: OFlag,
        mode: Mode,
    ) -> nix::Result<Self> {
        let rawfd = open(path, oflag, mode)?;
        Ok(ScopedFd { fd: rawfd })
    }

    /// Returns (read end, write end), both close-on-exec.
    pub fn pipe() -> nix::Result<(ScopedFd, ScopedFd)> {
        let (r, w) = pipe2(OFlag::O_CLOEXEC)?;
        Ok((ScopedFd::from_raw(r), ScopedFd::from_raw(w)))
    }

    pub fn set_nonblocking(&self) -> nix::Result<()> {
        let flags = OFlag::from_bits_truncate(fcntl(self.fd, FcntlArg::F_GETFL)?);
        fcntl(self.fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(())
    }

    pub fn close(&mut self) {
        if self.fd >= 0 {
            // We swallow any error on close
            close(self.fd).unwrap_or(());
        }

        self.fd = -1;
    }

    pub fn as_raw(&self) -> RawFd {
        self.fd
    }
}

impl Drop for ScopedFd {
    fn drop(&mut self) {
        self.close()
    }
}
