/// End-to-end tests for the injection point model and request builder
/// Walks a captured request through substitution, serialization and repair
use splice::builder::{correct_content_length, serialize, GeneratedRequest};
use splice::models::{InjectionPoint, Request};
use std::sync::Arc;
use std::thread;

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[test]
fn scenario_single_point_substitution() {
    // Injection point covers the "1" in ?id=1
    let raw = b"GET /?id=1 HTTP/1.1\r\nHost: x\r\n\r\n";
    let base = Request::from_ranges("x", false, raw, &[9..10]).unwrap();
    assert_eq!(base.count(), 1);

    let variant = base.replace(0, b"1 OR 1=1").unwrap();

    assert_eq!(
        text(&serialize(&variant).unwrap()),
        "GET /?id=1 OR 1=1 HTTP/1.1\r\nHost: x\r\n\r\n"
    );
    let record = variant.properties().substitutions();
    assert_eq!(record.len(), 1);
    assert_eq!(record[0].index, 0);
    assert_eq!(record[0].payload, b"1 OR 1=1".to_vec());
}

#[test]
fn scenario_body_substitution_repairs_content_length() {
    let head = "POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 1\r\n\r\n";
    let raw = format!("{}a=1", head);
    let base = Request::from_ranges("x", false, raw.as_bytes(), &[head.len()..raw.len()]).unwrap();

    let variant = base.replace(0, b"aaaaa=12345").unwrap();
    let fixed = correct_content_length(&serialize(&variant).unwrap());

    assert_eq!(
        text(&fixed),
        "POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 11\r\n\r\naaaaa=12345"
    );

    // The full build pipeline gives the same bytes
    assert_eq!(GeneratedRequest::build(&variant).unwrap().bytes, fixed);
}

#[test]
fn scenario_two_points_independent_variants() {
    let raw = b"GET /?a=1&b=2 HTTP/1.1\r\nHost: x\r\n\r\n";
    let base = Request::from_ranges("x", false, raw, &[8..9, 12..13]).unwrap();

    let first = base.replace(0, b"LONGER").unwrap();
    assert_eq!(first.injection_point(1), Some(InjectionPoint { offset: 17, length: 1 }));

    let both = first.replace(1, b"Z").unwrap();
    assert_eq!(
        text(&serialize(&both).unwrap()),
        "GET /?a=LONGER&b=Z HTTP/1.1\r\nHost: x\r\n\r\n"
    );

    let second = base.replace(1, b"Q").unwrap();
    assert_eq!(
        text(&serialize(&second).unwrap()),
        "GET /?a=1&b=Q HTTP/1.1\r\nHost: x\r\n\r\n"
    );

    // Deriving the other variants left these untouched
    assert_eq!(
        text(&serialize(&first).unwrap()),
        "GET /?a=LONGER&b=2 HTTP/1.1\r\nHost: x\r\n\r\n"
    );
    assert_eq!(serialize(&base).unwrap(), raw.to_vec());
    assert_eq!(first.properties().substitutions().len(), 1);
    assert_eq!(both.properties().substitutions().len(), 2);
    assert_eq!(second.properties().substitutions()[0].index, 1);
}

#[test]
fn variants_built_on_separate_threads_do_not_interfere() {
    let raw = b"GET /?a=1&b=2 HTTP/1.1\r\nHost: x\r\n\r\n";
    let base = Arc::new(Request::from_ranges("x", false, raw, &[8..9, 12..13]).unwrap());

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let base = base.clone();
            thread::spawn(move || {
                let payload = "p".repeat(i + 1);
                let variant = base.replace(i % 2, payload.as_bytes()).unwrap();
                (i, payload, serialize(&variant).unwrap())
            })
        })
        .collect();

    for worker in workers {
        let (i, payload, bytes) = worker.join().unwrap();
        let expected = if i % 2 == 0 {
            format!("GET /?a={}&b=2 HTTP/1.1\r\nHost: x\r\n\r\n", payload)
        } else {
            format!("GET /?a=1&b={} HTTP/1.1\r\nHost: x\r\n\r\n", payload)
        };
        assert_eq!(text(&bytes), expected);
    }
    assert_eq!(serialize(&base).unwrap(), raw.to_vec());
}

#[test]
fn discovered_form_request_round_trips_through_builder() {
    let raw = b"POST /login HTTP/1.1\nHost: x\nContent-Type: application/x-www-form-urlencoded\nContent-Length: 13\n\nuser=a&pass=b";
    let base = splice::discover("x", false, raw);
    assert_eq!(base.count(), 2);

    let variant = base.replace(1, b"' OR '1'='1").unwrap();
    let built = GeneratedRequest::build(&variant).unwrap();

    assert_eq!(
        text(&built.bytes),
        "POST /login HTTP/1.1\r\nHost: x\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 23\r\n\r\nuser=a&pass=' OR '1'='1"
    );
}
