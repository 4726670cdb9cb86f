/// Client tests against an in-process stand-in for the core
/// Each stub connection answers one request and records what it received
use splice::client::{CoreClient, SubmissionHandle};
use splice::config::CoreConfig;
use splice::error::SpliceError;
use splice::models::Request;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

/// Serve the given `(status, body)` replies in order, one per connection.
/// The join handle yields the raw requests that arrived.
fn serve(replies: Vec<(u16, String)>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in replies {
            let (mut stream, _) = listener.accept().unwrap();
            seen.push(read_request(&mut stream));

            let response = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        seen
    });

    (port, handle)
}

fn read_request(stream: &mut std::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before headers were complete");
        data.extend_from_slice(&chunk[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    while data.len() < header_end + body_len {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before body was complete");
        data.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&data).into_owned()
}

fn client_for(port: u16) -> CoreClient {
    let config = CoreConfig {
        host: "127.0.0.1".to_string(),
        port,
        api_key: "test-key".to_string(),
        scan_id: "scan-42".to_string(),
        timeout_secs: 5,
    };
    CoreClient::from_config(&config).unwrap()
}

fn sample_request() -> Request {
    Request::from_ranges("target.local", false, b"GET /?q=1 HTTP/1.1\r\nHost: target.local\r\n\r\n", &[8..9])
        .unwrap()
}

#[test]
fn queue_returns_identifier_and_authenticates() {
    let (port, server) = serve(vec![(200, r#"{"GUID":"7f3c-01"}"#.to_string())]);
    let client = client_for(port);

    let variant = sample_request().replace(0, b"<script>").unwrap();
    let handle = client.queue(&variant).unwrap();
    assert_eq!(handle.id(), "7f3c-01");
    assert!(!handle.id().is_empty());

    let requests = server.join().unwrap();
    let seen = &requests[0];
    assert!(seen.starts_with("POST /requests/queue HTTP/1.1"));
    assert!(seen.to_lowercase().contains("x-api-key: test-key"));
    assert!(seen.contains(r#""scan_id":"scan-42""#));
    assert!(seen.contains(r#""host":"target.local""#));
    assert!(seen.contains(r#""ssl":false"#));
}

#[test]
fn queue_surfaces_core_error_text() {
    let (port, server) = serve(vec![(403, "invalid API key".to_string())]);
    let client = client_for(port);

    match client.queue(&sample_request()) {
        Err(SpliceError::CoreRequestFailed { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body, "invalid API key");
        }
        other => panic!("expected CoreRequestFailed, got {:?}", other),
    }
    server.join().unwrap();
}

#[test]
fn queue_and_wait_looks_up_the_outcome() {
    use base64::{engine::general_purpose, Engine as _};

    let contents = format!(
        r#"{{"Request":"{}","Response":"{}"}}"#,
        general_purpose::STANDARD.encode("GET /?q=x HTTP/1.1\r\n\r\n"),
        general_purpose::STANDARD.encode("HTTP/1.1 500 Internal Server Error\r\nServer: t\r\n\r\nSQL syntax error")
    );
    let (port, server) = serve(vec![(200, r#"{"GUID":"g-9"}"#.to_string()), (200, contents)]);
    let client = client_for(port);

    let variant = sample_request().replace(0, b"x").unwrap();
    let outcome = client.queue_and_wait(&variant).unwrap();
    assert_eq!(outcome.status_line(), b"HTTP/1.1 500 Internal Server Error");
    assert_eq!(outcome.response_body, b"SQL syntax error".to_vec());
    assert_eq!(outcome.request, b"GET /?q=x HTTP/1.1\r\n\r\n".to_vec());

    let requests = server.join().unwrap();
    assert!(requests[0].starts_with("POST /requests/make HTTP/1.1"));
    assert!(requests[1].starts_with("GET /requests/contents?guid=g-9&scan_id=scan-42 HTTP/1.1"));
}

#[test]
fn unreachable_core_is_a_transport_error() {
    // Bind then drop to get a port nothing is listening on
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let client = client_for(port);

    assert!(matches!(
        client.get_outcome(&SubmissionHandle::new("g")),
        Err(SpliceError::Transport(_))
    ));
}
