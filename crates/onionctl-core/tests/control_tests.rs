//! Control-port session tests against an in-memory mock Tor daemon.
//!
//! The mock answers each command line with whatever the test's responder
//! returns and records every line it received, so tests can assert on the
//! exact bytes put on the wire (and on what was never sent).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

use onionctl_core::tor::{
    compute_client_hash, compute_server_hash, OnionKey, PortMap, TorAuth, TorController,
};
use onionctl_core::Error;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

const COOKIE: [u8; 32] = [0x42; 32];
const SERVER_NONCE: [u8; 32] = [0x17; 32];

const SERVICE_ID: &str = "pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd";
const KEY_BLOB: &str =
    "yLSDc8b11PaIHTtNtvi9lNW99IME2mdrO4k381zDkHv//WRUGrkBALBQ9MbHy2SLA/NmfS7YxmcR/FY8toRxSQ==";

/// Start a mock daemon; `respond` maps each received line to a reply.
fn spawn_mock<F>(mut respond: F) -> (TorController<DuplexStream>, JoinHandle<Vec<String>>)
where
    F: FnMut(&str) -> String + Send + 'static,
{
    let (client, daemon) = tokio::io::duplex(8192);

    let handle = tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(daemon);
        let mut reader = BufReader::new(read_half);
        let mut received = Vec::new();

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let reply = respond(&line);
            received.push(line);
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }

        received
    });

    (TorController::new(client), handle)
}

/// Mock that answers commands with `replies` in order.
fn scripted(replies: &[&str]) -> (TorController<DuplexStream>, JoinHandle<Vec<String>>) {
    let mut replies: Vec<String> = replies.iter().rev().map(|r| r.to_string()).collect();
    spawn_mock(move |_| {
        replies
            .pop()
            .unwrap_or_else(|| "510 Unrecognized command\r\n".to_string())
    })
}

/// Drop the controller and collect what the mock received.
async fn finish(tor: TorController<DuplexStream>, mock: JoinHandle<Vec<String>>) -> Vec<String> {
    drop(tor);
    mock.await.expect("mock daemon panicked")
}

fn temp_path(name: &str) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("onionctl-test-{}-{}-{}", std::process::id(), id, name))
}

fn write_cookie(cookie: &[u8]) -> PathBuf {
    let path = temp_path("control_auth_cookie");
    std::fs::write(&path, cookie).expect("write cookie");
    path
}

/// Responder implementing the daemon side of SAFECOOKIE.
///
/// `tamper` is applied to the server hash before it is sent.
fn safe_cookie_daemon(
    tamper: fn(&mut [u8; 32]),
) -> impl FnMut(&str) -> String + Send + 'static {
    let mut client_nonce: Option<Vec<u8>> = None;

    move |line: &str| {
        let line = line.trim_end();
        if let Some(nonce_hex) = line.strip_prefix("AUTHCHALLENGE SAFECOOKIE ") {
            let nonce = hex::decode(nonce_hex).expect("client nonce hex");
            let mut server_hash =
                compute_server_hash(&COOKIE, &nonce, &SERVER_NONCE).expect("server hash");
            tamper(&mut server_hash);
            client_nonce = Some(nonce);
            format!(
                "250 AUTHCHALLENGE SERVERHASH={} SERVERNONCE={}\r\n",
                hex::encode_upper(server_hash),
                hex::encode_upper(SERVER_NONCE)
            )
        } else if let Some(token) = line.strip_prefix("AUTHENTICATE ") {
            let nonce = client_nonce.as_deref().unwrap_or_default();
            let expected =
                compute_client_hash(&COOKIE, nonce, &SERVER_NONCE).expect("client hash");
            if token == hex::encode(expected) {
                "250 OK\r\n".to_string()
            } else {
                "515 Authentication failed: Safecookie response did not match expected value.\r\n"
                    .to_string()
            }
        } else {
            "510 Unrecognized command\r\n".to_string()
        }
    }
}

async fn authenticated(
    replies: &[&str],
) -> (TorController<DuplexStream>, JoinHandle<Vec<String>>) {
    let mut all = vec!["250 OK\r\n"];
    all.extend_from_slice(replies);
    let (mut tor, mock) = scripted(&all);
    tor.authenticate_password("hunter2").await.expect("authenticate");
    (tor, mock)
}

// ---------------------------------------------------------------------------
// Password and cookie authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_password_auth_success() {
    let (mut tor, mock) = scripted(&["250 OK\n"]);

    tor.authenticate_password("hunter2").await.expect("auth should succeed");
    assert!(tor.is_authenticated());

    let sent = finish(tor, mock).await;
    assert_eq!(sent, ["AUTHENTICATE \"hunter2\"\n"]);
}

#[tokio::test]
async fn test_password_auth_rejected() {
    let (mut tor, mock) = scripted(&["515 Bad password\n"]);

    let result = tor.authenticate(&TorAuth::Password("hunter2".into())).await;
    match result {
        Err(Error::Auth(message)) => assert!(message.contains("515")),
        other => panic!("expected auth error, got {:?}", other),
    }
    assert!(!tor.is_authenticated());

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_password_is_escaped() {
    let (mut tor, mock) = scripted(&["250 OK\n"]);
    tor.authenticate_password("pa\"ss\\word").await.expect("auth");

    let sent = finish(tor, mock).await;
    assert_eq!(sent, ["AUTHENTICATE \"pa\\\"ss\\\\word\"\n"]);
}

#[tokio::test]
async fn test_password_control_characters_are_escaped() {
    let (mut tor, mock) = scripted(&["250 OK\n"]);
    tor.authenticate_password("line1\nline2\ttab\r").await.expect("auth");

    let sent = finish(tor, mock).await;
    assert_eq!(sent, ["AUTHENTICATE \"line1\\nline2\\ttab\\r\"\n"]);
}

#[tokio::test]
async fn test_null_auth() {
    let (mut tor, mock) = scripted(&["250 OK\r\n"]);
    tor.authenticate(&TorAuth::None).await.expect("auth");

    let sent = finish(tor, mock).await;
    assert_eq!(sent, ["AUTHENTICATE\n"]);
}

#[tokio::test]
async fn test_cookie_auth_sends_hex_cookie() {
    let cookie_path = write_cookie(&COOKIE);
    let (mut tor, mock) = scripted(&["250 OK\r\n"]);

    tor.authenticate_cookie(&cookie_path).await.expect("auth");
    assert!(tor.is_authenticated());

    let sent = finish(tor, mock).await;
    assert_eq!(sent, [format!("AUTHENTICATE {}\n", "42".repeat(32))]);

    let _ = std::fs::remove_file(&cookie_path);
}

#[tokio::test]
async fn test_cookie_unreadable_is_io_error() {
    let (mut tor, mock) = scripted(&[]);

    let result = tor
        .authenticate(&TorAuth::Cookie(temp_path("missing-cookie")))
        .await;
    assert!(matches!(result, Err(Error::Io(_))));

    let sent = finish(tor, mock).await;
    assert!(sent.is_empty());
}

#[tokio::test]
async fn test_cookie_wrong_length_is_io_error() {
    let cookie_path = write_cookie(&[0x42; 16]);
    let (mut tor, mock) = scripted(&[]);

    let result = tor.authenticate_safe_cookie(&cookie_path).await;
    assert!(matches!(result, Err(Error::Io(_))));

    let sent = finish(tor, mock).await;
    assert!(sent.is_empty());

    let _ = std::fs::remove_file(&cookie_path);
}

// ---------------------------------------------------------------------------
// SAFECOOKIE
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_safe_cookie_success() {
    let cookie_path = write_cookie(&COOKIE);
    let (mut tor, mock) = spawn_mock(safe_cookie_daemon(|_| {}));

    tor.authenticate(&TorAuth::SafeCookie(cookie_path.clone()))
        .await
        .expect("safe cookie auth should succeed");
    assert!(tor.is_authenticated());

    let sent = finish(tor, mock).await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].starts_with("AUTHCHALLENGE SAFECOOKIE "));
    assert!(sent[1].starts_with("AUTHENTICATE "));
    // The raw cookie never crosses the wire.
    assert!(!sent.iter().any(|line| line.contains(&"42".repeat(32))));

    let _ = std::fs::remove_file(&cookie_path);
}

#[tokio::test]
async fn test_safe_cookie_corrupted_server_hash_never_authenticates() {
    let cookie_path = write_cookie(&COOKIE);
    let (mut tor, mock) = spawn_mock(safe_cookie_daemon(|hash| hash[7] ^= 0x80));

    let result = tor.authenticate_safe_cookie(&cookie_path).await;
    match result {
        Err(Error::Auth(message)) => assert_eq!(message, "server hash invalid"),
        other => panic!("expected server hash rejection, got {:?}", other),
    }
    assert!(!tor.is_authenticated());

    let sent = finish(tor, mock).await;
    assert_eq!(sent.len(), 1);
    assert!(!sent.iter().any(|line| line.starts_with("AUTHENTICATE")));

    let _ = std::fs::remove_file(&cookie_path);
}

#[tokio::test]
async fn test_safe_cookie_fresh_nonce_per_attempt() {
    let cookie_path = write_cookie(&COOKIE);
    let (mut tor, mock) = spawn_mock(safe_cookie_daemon(|hash| hash[0] ^= 0x01));

    assert!(tor.authenticate_safe_cookie(&cookie_path).await.is_err());
    assert!(tor.authenticate_safe_cookie(&cookie_path).await.is_err());

    let sent = finish(tor, mock).await;
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0], sent[1]);

    let _ = std::fs::remove_file(&cookie_path);
}

#[tokio::test]
async fn test_safe_cookie_missing_server_nonce() {
    let cookie_path = write_cookie(&COOKIE);
    let reply = format!("250 AUTHCHALLENGE SERVERHASH={}\r\n", "ab".repeat(32));
    let (mut tor, mock) = scripted(&[reply.as_str()]);

    let result = tor.authenticate_safe_cookie(&cookie_path).await;
    assert!(matches!(result, Err(Error::Protocol(_))));

    let sent = finish(tor, mock).await;
    assert_eq!(sent.len(), 1);

    let _ = std::fs::remove_file(&cookie_path);
}

#[tokio::test]
async fn test_safe_cookie_challenge_rejected() {
    let cookie_path = write_cookie(&COOKIE);
    let (mut tor, mock) = scripted(&["513 Invalid base16 client nonce\r\n"]);

    let result = tor.authenticate_safe_cookie(&cookie_path).await;
    assert!(matches!(result, Err(Error::Auth(_))));

    let sent = finish(tor, mock).await;
    assert_eq!(sent.len(), 1);

    let _ = std::fs::remove_file(&cookie_path);
}

// ---------------------------------------------------------------------------
// PROTOCOLINFO / auto
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_auto_prefers_safe_cookie() {
    let cookie_path = write_cookie(&COOKIE);
    let protocol_info = format!(
        "250-PROTOCOLINFO 1\r\n\
         250-AUTH METHODS=COOKIE,SAFECOOKIE COOKIEFILE=\"{}\"\r\n\
         250-VERSION Tor=\"0.4.8.10\"\r\n\
         250 OK\r\n",
        cookie_path.display()
    );

    let mut safe_cookie = safe_cookie_daemon(|_| {});
    let (mut tor, mock) = spawn_mock(move |line| {
        if line.starts_with("PROTOCOLINFO") {
            protocol_info.clone()
        } else {
            safe_cookie(line)
        }
    });

    tor.authenticate_auto().await.expect("auto auth");
    assert!(tor.is_authenticated());

    let sent = finish(tor, mock).await;
    assert_eq!(sent[0], "PROTOCOLINFO 1\n");
    assert!(sent[1].starts_with("AUTHCHALLENGE SAFECOOKIE "));
    assert!(sent[2].starts_with("AUTHENTICATE "));

    let _ = std::fs::remove_file(&cookie_path);
}

#[tokio::test]
async fn test_auto_password_only_fails_without_sending_auth() {
    let (mut tor, mock) = scripted(&["250-PROTOCOLINFO 1\r\n250-AUTH METHODS=HASHEDPASSWORD\r\n250 OK\r\n"]);

    let result = tor.authenticate_auto().await;
    assert!(matches!(result, Err(Error::Auth(_))));

    let sent = finish(tor, mock).await;
    assert_eq!(sent, ["PROTOCOLINFO 1\n"]);
}

// ---------------------------------------------------------------------------
// Persistent hidden services
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_persistent_service_command() {
    let (mut tor, mock) = authenticated(&["250 OK\r\n"]).await;

    let mut ports = PortMap::new();
    ports.insert(80, "127.0.0.1:80".to_string());
    tor.create_hidden_service(Path::new("/var/lib/tor/hs"), &ports)
        .await
        .expect("create");

    let sent = finish(tor, mock).await;
    assert_eq!(
        sent[1],
        "SETCONF hiddenservicedir=/var/lib/tor/hs hiddenserviceport=\"80 127.0.0.1:80\" HiddenServiceDirGroupReadable=1\n"
    );
}

#[tokio::test]
async fn test_create_persistent_service_rejected() {
    let (mut tor, mock) = authenticated(&["553 Unable to set option: Failed to configure rendezvous options\r\n"]).await;

    let mut ports = PortMap::new();
    ports.insert(80, "127.0.0.1:80".to_string());
    let result = tor
        .create_hidden_service(Path::new("/var/lib/tor/hs"), &ports)
        .await;

    match result {
        Err(Error::Operation { code, message }) => {
            assert_eq!(code, 553);
            assert!(message.contains("Unable to set option"));
        }
        other => panic!("expected operation error, got {:?}", other),
    }

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_delete_persistent_service() {
    let (mut tor, mock) = authenticated(&["250 OK\r\n"]).await;

    tor.delete_hidden_service(Path::new("/var/lib/tor/hs"))
        .await
        .expect("delete");

    let sent = finish(tor, mock).await;
    assert_eq!(sent[1], "SETCONF hiddenservicedir=/var/lib/tor/hs\n");
}

#[tokio::test]
async fn test_service_commands_require_authentication() {
    let (mut tor, mock) = scripted(&[]);

    let result = tor.delete_hidden_service(Path::new("/var/lib/tor/hs")).await;
    assert!(matches!(result, Err(Error::Auth(_))));
    let result = tor.create_ephemeral_hidden_service(80, "127.0.0.1:8080").await;
    assert!(matches!(result, Err(Error::Auth(_))));

    let sent = finish(tor, mock).await;
    assert!(sent.is_empty());
}

// ---------------------------------------------------------------------------
// Ephemeral hidden services
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_ephemeral_service() {
    let reply = format!(
        "250-ServiceID={}\r\n250-PrivateKey=ED25519-V3:{}\r\n250 OK\r\n",
        SERVICE_ID, KEY_BLOB
    );
    let (mut tor, mock) = authenticated(&[reply.as_str()]).await;

    let service = tor
        .create_ephemeral_hidden_service(80, "127.0.0.1:8080")
        .await
        .expect("create ephemeral");
    assert_eq!(service.service_id, SERVICE_ID);
    assert_eq!(service.private_key.key_type(), "ED25519-V3");
    assert_eq!(service.private_key.blob(), KEY_BLOB);
    assert_eq!(service.onion_address(), format!("{}.onion", SERVICE_ID));

    let sent = finish(tor, mock).await;
    assert_eq!(sent[1], "ADD_ONION NEW:BEST FLAGS=Detach Port=80,127.0.0.1:8080\n");
}

#[tokio::test]
async fn test_create_ephemeral_missing_key_is_protocol_error() {
    let reply = format!("250-ServiceID={}\r\n250 OK\r\n", SERVICE_ID);
    let (mut tor, mock) = authenticated(&[reply.as_str()]).await;

    let result = tor.create_ephemeral_hidden_service(80, "127.0.0.1:8080").await;
    assert!(matches!(result, Err(Error::Protocol(_))));

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_create_ephemeral_rejected() {
    let (mut tor, mock) = authenticated(&["512 Invalid VIRTPORT/TARGET\r\n"]).await;

    let result = tor.create_ephemeral_hidden_service(80, "127.0.0.1:0").await;
    assert_eq!(result.err().and_then(|e| e.status_code()), Some(512));

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_restart_ephemeral_created() {
    let reply = format!("250-ServiceID={}\r\n250 OK\r\n", SERVICE_ID);
    let (mut tor, mock) = authenticated(&[reply.as_str()]).await;

    let key: OnionKey = format!("ED25519-V3:{}", KEY_BLOB).parse().expect("key");
    let service_id = tor
        .restart_ephemeral_hidden_service(&key, 443, "127.0.0.1:8443")
        .await
        .expect("restart");
    assert_eq!(service_id.as_deref(), Some(SERVICE_ID));

    let sent = finish(tor, mock).await;
    assert_eq!(
        sent[1],
        format!("ADD_ONION ED25519-V3:{} FLAGS=Detach Port=443,127.0.0.1:8443\n", KEY_BLOB)
    );
}

#[tokio::test]
async fn test_restart_ephemeral_collision_is_success() {
    let (mut tor, mock) = authenticated(&["550 Onion address collision\r\n"]).await;

    let key: OnionKey = format!("ED25519-V3:{}", KEY_BLOB).parse().expect("key");
    let service_id = tor
        .restart_ephemeral_hidden_service(&key, 443, "127.0.0.1:8443")
        .await
        .expect("collision counts as success");
    assert_eq!(service_id, None);

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_restart_ephemeral_collision_keeps_service_id() {
    let reply = format!(
        "550-ServiceID={}\r\n550 Onion address collision\r\n",
        SERVICE_ID
    );
    let (mut tor, mock) = authenticated(&[reply.as_str()]).await;

    let key: OnionKey = format!("ED25519-V3:{}", KEY_BLOB).parse().expect("key");
    let service_id = tor
        .restart_ephemeral_hidden_service(&key, 443, "127.0.0.1:8443")
        .await
        .expect("collision counts as success");
    assert_eq!(service_id.as_deref(), Some(SERVICE_ID));

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_restart_ephemeral_other_error() {
    let (mut tor, mock) = authenticated(&["513 Invalid key blob\r\n"]).await;

    let key: OnionKey = "RSA1024:AAAA".parse().expect("key");
    let result = tor
        .restart_ephemeral_hidden_service(&key, 443, "127.0.0.1:8443")
        .await;

    match result {
        Err(Error::Operation { code, message }) => {
            assert_eq!(code, 513);
            assert_eq!(message, "Invalid key blob");
        }
        other => panic!("expected operation error, got {:?}", other),
    }

    finish(tor, mock).await;
}

#[tokio::test]
async fn test_del_onion() {
    let (mut tor, mock) = authenticated(&["250 OK\r\n"]).await;

    tor.del_onion(SERVICE_ID).await.expect("del_onion");

    let sent = finish(tor, mock).await;
    assert_eq!(sent[1], format!("DEL_ONION {}\n", SERVICE_ID));
}

// ---------------------------------------------------------------------------
// Real socket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_open_over_tcp() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let daemon = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read");
        write_half.write_all(b"250 OK\r\n").await.expect("write");
        line
    });

    let mut tor = TorController::open("tcp", &addr.to_string())
        .await
        .expect("open");
    tor.authenticate_password("hunter2").await.expect("auth");
    tor.close().await.expect("close");

    assert_eq!(daemon.await.expect("daemon"), "AUTHENTICATE \"hunter2\"\n");
}

#[tokio::test]
async fn test_open_unknown_network() {
    let result = TorController::open("udp", "127.0.0.1:9051").await;
    assert!(matches!(result, Err(Error::Connection(_))));
}
