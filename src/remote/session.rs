//! Session addressing and socket filesystem layout.
//!
//! A session is an on-disk rendezvous: a Unix socket under the shared
//! runtime directory. The layout is
//!
//! ```text
//! <tmp>/kakoune/                   mode 01777, shared across users
//! <tmp>/kakoune/<user>/            mode 0711
//! <tmp>/kakoune/<user>/<session>   the socket, mode 0600
//! ```
//!
//! where `<tmp>` is `$TMPDIR` or `/tmp`. A session name containing `/` is
//! used verbatim below the runtime directory, bypassing the per-user
//! segment. Filesystem permissions are the sole access control on a
//! session.

use std::ffi::CStr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use crate::error::{RemoteError, Result};

/// Conservative `sun_path` capacity (104 bytes on macOS, 108 on Linux).
const MAX_SOCKET_PATH: usize = 104;

fn tmpdir() -> PathBuf {
    std::env::var_os("TMPDIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

fn runtime_directory() -> PathBuf {
    tmpdir().join("kakoune")
}

/// Name of the user owning this process, from the effective uid.
fn euid_user_name() -> Result<String> {
    let uid = unsafe { libc::geteuid() };
    let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buffer = vec![0u8; 1024];
    let mut entry: *mut libc::passwd = std::ptr::null_mut();
    loop {
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut passwd,
                buffer.as_mut_ptr() as *mut libc::c_char,
                buffer.len(),
                &mut entry,
            )
        };
        if rc == libc::ERANGE {
            buffer.resize(buffer.len() * 2, 0);
            continue;
        }
        if rc != 0 || entry.is_null() {
            return Err(RemoteError::runtime(format!(
                "cannot resolve user name for uid {uid}"
            )));
        }
        let name = unsafe { CStr::from_ptr(passwd.pw_name) };
        return Ok(name.to_string_lossy().into_owned());
    }
}

/// Socket path for a session name.
///
/// Names containing `/` map to `<tmp>/kakoune/<name>`; plain names map to
/// `<tmp>/kakoune/<user>/<name>`. Fails when the result would not fit in
/// `sun_path`.
pub fn session_path(session: &str) -> Result<PathBuf> {
    let path = if session.contains('/') {
        // Joined textually: an absolute session name must stay below the
        // runtime directory rather than replace it.
        let mut path = runtime_directory().into_os_string();
        path.push("/");
        path.push(session);
        PathBuf::from(path)
    } else {
        runtime_directory().join(euid_user_name()?).join(session)
    };

    let length = path.as_os_str().len();
    if length >= MAX_SOCKET_PATH {
        return Err(RemoteError::runtime(format!(
            "socket path too long ({length} bytes, max {}): {}",
            MAX_SOCKET_PATH - 1,
            path.display()
        )));
    }
    Ok(path)
}

fn create_directory(path: &Path, mode: u32) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(
            |err| {
                RemoteError::runtime(format!(
                    "cannot set permissions on '{}': {err}",
                    path.display()
                ))
            },
        ),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(RemoteError::runtime(format!(
            "cannot create directory '{}': {err}",
            path.display()
        ))),
    }
}

/// Create the directory tree for a session socket and return the socket
/// path. Existing directories are tolerated.
pub fn make_session_directory(session: &str) -> Result<PathBuf> {
    let path = session_path(session)?;
    create_directory(&runtime_directory(), 0o1777)?;
    if session.contains('/') {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                RemoteError::runtime(format!(
                    "cannot create directory '{}': {err}",
                    parent.display()
                ))
            })?;
        }
    } else {
        create_directory(&runtime_directory().join(euid_user_name()?), 0o711)?;
    }
    Ok(path)
}

/// Whether a session of that name currently accepts connections. The probe
/// socket is always closed.
pub fn check_session(session: &str) -> bool {
    match session_path(session) {
        Ok(path) => UnixStream::connect(path).is_ok(),
        Err(_) => false,
    }
}

/// Connect to a session socket.
pub(crate) fn connect_to(session: &str) -> Result<UnixStream> {
    let path = session_path(session)?;
    UnixStream::connect(&path).map_err(|_| RemoteError::ConnectionFailed(path))
}

/// Fill a `sockaddr_un` for binding the listening socket.
pub(crate) fn socket_address(path: &Path) -> Result<libc::sockaddr_un> {
    let bytes = path.as_os_str().as_bytes();
    let mut address: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    if bytes.len() >= address.sun_path.len() {
        return Err(RemoteError::runtime(format!(
            "socket path too long: {}",
            path.display()
        )));
    }
    address.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in address.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(address)
}
