//! Ephemeral onion service round trip against a real Tor daemon.
//!
//! Needs a local Tor with `ControlPort 9051` and `CookieAuthentication 1`:
//!
//! ```text
//! cargo test -p onionctl-core --test live_tor -- --ignored --nocapture
//! ```

use std::time::Duration;
use tokio::time::timeout;

use onionctl_core::tor::TorController;

#[tokio::test]
#[ignore = "requires a running Tor daemon"]
async fn test_ephemeral_service_lifecycle() {
    println!("\n=== EPHEMERAL ONION SERVICE TEST ===\n");

    println!("[1/4] Connecting to control port...");
    let mut tor = timeout(Duration::from_secs(10), TorController::connect_default())
        .await
        .expect("Timeout connecting to Tor")
        .expect("Failed to connect to Tor");

    println!("[2/4] Authenticating...");
    tor.authenticate_auto().await.expect("Failed to authenticate");

    println!("[3/4] Creating ephemeral service...");
    let service = tor
        .create_ephemeral_hidden_service(80, "127.0.0.1:19999")
        .await
        .expect("Failed to create ephemeral service");
    println!("      Onion address: {}", service.onion_address());

    let restarted = tor
        .restart_ephemeral_hidden_service(&service.private_key, 80, "127.0.0.1:19999")
        .await
        .expect("Restart should succeed");
    // Still registered from step 3, so Tor reports a collision.
    assert_eq!(restarted, None);

    println!("[4/4] Removing service...");
    tor.del_onion(&service.service_id)
        .await
        .expect("Failed to remove service");

    let restarted = tor
        .restart_ephemeral_hidden_service(&service.private_key, 80, "127.0.0.1:19999")
        .await
        .expect("Restart should succeed");
    assert_eq!(restarted.as_deref(), Some(service.service_id.as_str()));

    tor.del_onion(&service.service_id).await.expect("cleanup");
    tor.close().await.expect("close");

    println!("\n=== TEST PASSED ===\n");
}
