use std::net::TcpListener;
use std::time::Duration;
use tokio::time::sleep;

/// DSN pointing at a port nothing listens on.
#[allow(dead_code)]
pub const UNREACHABLE_DSN: &str = "mysql://root@127.0.0.1:1/";

/// Get an available port for testing
#[allow(dead_code)]
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Build test URL for HTTP requests
#[allow(dead_code)]
pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Wait for server to be ready
#[allow(dead_code)]
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{port}"))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}
