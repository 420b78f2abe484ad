//! Session lifecycle on the filesystem: socket creation and permissions,
//! discovery, rename and teardown.

mod common;

use std::os::unix::fs::PermissionsExt;

use kakoune::remote::{check_session, session_path, Server};
use kakoune::Registry;

use common::unique_session;

#[test]
fn server_creates_socket_with_restrictive_modes() {
    let registry = Registry::new();
    let session = unique_session();
    let server = Server::new(&registry, &session).unwrap();

    let path = session_path(&session).unwrap();
    let socket_mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(socket_mode & 0o777, 0o600, "socket must be owner-only");

    let user_dir = path.parent().unwrap();
    let dir_mode = std::fs::metadata(user_dir).unwrap().permissions().mode();
    assert_eq!(dir_mode & 0o777, 0o711, "user directory must be 0711");

    let runtime_dir = user_dir.parent().unwrap();
    let runtime_mode = std::fs::metadata(runtime_dir).unwrap().permissions().mode();
    assert_eq!(
        runtime_mode & 0o7777,
        0o1777,
        "shared runtime directory must be sticky and world-writable"
    );

    drop(server);
}

#[test]
fn check_session_tracks_server_lifetime() {
    let registry = Registry::new();
    let session = unique_session();
    assert!(!check_session(&session));

    let server = Server::new(&registry, &session).unwrap();
    assert!(check_session(&session));

    drop(server);
    assert!(!check_session(&session));
}

#[test]
fn binding_an_existing_session_fails() {
    let registry = Registry::new();
    let session = unique_session();
    let _server = Server::new(&registry, &session).unwrap();
    let err = Server::new(&registry, &session).unwrap_err();
    assert!(err.to_string().contains("unable to bind"));
}

#[test]
fn rename_session_moves_the_socket() {
    let registry = Registry::new();
    let old_name = unique_session();
    let new_name = unique_session();
    let server = Server::new(&registry, &old_name).unwrap();

    assert!(server.rename_session(&new_name));
    assert_eq!(server.session(), new_name);
    assert!(!session_path(&old_name).unwrap().exists());
    assert!(check_session(&new_name));
}

#[test]
fn rename_session_reports_failure_without_aborting() {
    let registry = Registry::new();
    let session = unique_session();
    let server = Server::new(&registry, &session).unwrap();

    assert!(!server.rename_session(&"x".repeat(200)));
    assert_eq!(server.session(), session);
    assert!(check_session(&session));
}

#[test]
fn close_session_can_keep_the_socket_file() {
    let registry = Registry::new();
    let session = unique_session();
    let server = Server::new(&registry, &session).unwrap();
    let path = session_path(&session).unwrap();

    server.close_session(false);
    assert!(path.exists(), "close_session(false) must not unlink");
    // No listener left; connection attempts now fail.
    assert!(!check_session(&session));

    std::fs::remove_file(path).unwrap();
}

#[test]
fn close_session_unlinks_when_asked() {
    let registry = Registry::new();
    let session = unique_session();
    let server = Server::new(&registry, &session).unwrap();
    let path = session_path(&session).unwrap();

    server.close_session(true);
    assert!(!path.exists());
}
