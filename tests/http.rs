use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use lookout::lifecycle::StopSignal;
use lookout::store::SharedFrameStore;
use lookout::stream::{serve, AppState, StreamSettings};
use lookout::{Frame, FrameShape};

static NEXT: AtomicUsize = AtomicUsize::new(0);

type ServerTask = tokio::task::JoinHandle<std::io::Result<()>>;

async fn start() -> (std::net::SocketAddr, StopSignal, ServerTask) {
    let name = format!(
        "lookout-it-http-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    );
    let shape = FrameShape::new(32, 32, 3);
    let store = Arc::new(SharedFrameStore::create(&name, shape).unwrap());
    store.write(&Frame::filled(shape, [40, 80, 120])).unwrap();

    let stop = StopSignal::new();
    let state = AppState::new(
        store,
        StreamSettings {
            send_interval: Duration::from_millis(20),
            idle_wait: Duration::from_millis(5),
            jpeg_quality: 80,
        },
        stop.clone(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = {
        let stop = stop.clone();
        async move { stop.stopped(Duration::from_millis(10)).await }
    };
    let server = tokio::spawn(serve(listener, state, shutdown));
    (addr, stop, server)
}

async fn request(addr: std::net::SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test(flavor = "multi_thread")]
async fn health_returns_ok() {
    let (addr, stop, server) = start().await;

    let mut stream = request(addr, "/health").await;
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(response.starts_with(b"HTTP/1.1 200 OK"));

    stop.trigger();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_streams_jpeg_parts_until_stopped() {
    let (addr, stop, server) = start().await;

    let mut stream = request(addr, "/").await;
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    tokio::time::timeout(Duration::from_secs(2), async {
        while !contains(&received, b"--frame\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8") {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before the first frame");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("no frame within 2s");
    assert!(contains(&received, b"multipart/x-mixed-replace; boundary=frame"));

    stop.trigger();
    tokio::time::timeout(Duration::from_secs(2), async {
        while stream.read(&mut buf).await.unwrap_or(0) > 0 {}
    })
    .await
    .expect("feed did not end after stop");
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
}
