use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use assert_matches::assert_matches;

use encode_query::client::{self, ClientSettings, EncodeHttpClient};
use encode_query::error::EncodeError;
use encode_query::filters::extract_accessions;
use encode_query::query::ExperimentQuery;

/// Answers exactly one request with `status` and `body`, returning the raw
/// request head it received.
fn serve_once(status: &str, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut buffer = [0u8; 1024];
        while !head.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = stream.read(&mut buffer).unwrap();
            if read == 0 {
                break;
            }
            head.extend_from_slice(&buffer[..read]);
        }
        stream.write_all(response.as_bytes()).unwrap();
        stream.flush().unwrap();
        String::from_utf8(head).unwrap()
    });
    (base_url, handle)
}

fn client_for(base_url: String) -> EncodeHttpClient {
    EncodeHttpClient::with_settings(ClientSettings {
        base_url,
        timeout: Duration::from_secs(5),
        ..ClientSettings::default()
    })
    .unwrap()
}

#[test]
fn empty_search_answered_with_404_has_no_accessions() {
    let (base_url, server) = serve_once(
        "404 Not Found",
        "application/json",
        r#"{"@graph": [], "notification": "No results found", "total": 0}"#,
    );
    let http = client_for(base_url);

    let accessions = client::experiment(&http, &ExperimentQuery::new().target("NOPE"))
        .and_then(|envelope| extract_accessions(&envelope))
        .unwrap();

    assert!(accessions.is_empty());
    server.join().unwrap();
}

#[test]
fn search_request_on_the_wire() {
    let (base_url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"@graph": [{"accession": "ENCSR000EDP"}]}"#,
    );
    let http = client_for(base_url);
    let query = ExperimentQuery::new()
        .replicated(true)
        .drop_errors(["extremely low read depth", "missing control alignments"]);

    let envelope = client::experiment(&http, &query).unwrap();
    assert_eq!(extract_accessions(&envelope).unwrap(), vec!["ENCSR000EDP"]);

    let head = server.join().unwrap();
    let request_line = head.lines().next().unwrap();
    assert!(request_line.starts_with("GET /search/?"), "{request_line}");
    assert!(request_line.ends_with(" HTTP/1.1"), "{request_line}");
    assert!(request_line.contains(
        "audit.ERROR.category%21=extremely+low+read+depth&audit.ERROR.category%21=missing+control+alignments"
    ));
    assert!(request_line.contains("replication_type%21=unreplicated"));
    assert!(request_line.contains("type=Experiment"));
    assert!(request_line.contains("status=released"));
    assert!(request_line.contains("limit=all"));

    let headers = head.to_ascii_lowercase();
    assert!(headers.contains("\r\naccept: application/json\r\n"), "{head}");
    assert!(headers.contains("\r\nuser-agent: encode-query/"), "{head}");
}

#[test]
fn experiment_path_has_trailing_slash_and_no_query() {
    let (base_url, server) = serve_once(
        "200 OK",
        "application/json",
        r#"{"accession": "ENCSR000EDP", "files": []}"#,
    );
    let http = client_for(format!("{base_url}/"));

    let sample = client::biosample(&http, "ENCSR000EDP").unwrap();
    assert_eq!(sample["accession"], "ENCSR000EDP");

    let head = server.join().unwrap();
    assert!(
        head.starts_with("GET /experiments/ENCSR000EDP/ HTTP/1.1\r\n"),
        "{head}"
    );
}

#[test]
fn portal_error_document_is_a_status_error() {
    let (base_url, server) = serve_once(
        "404 Not Found",
        "application/json",
        r#"{"@type": ["HTTPNotFound", "Error"], "status": "error", "code": 404, "title": "Not Found", "description": "The resource could not be found."}"#,
    );
    let http = client_for(base_url);

    let err = client::biosample(&http, "ENCSR999ZZZ").unwrap_err();
    assert_matches!(
        err,
        EncodeError::Status { status: 404, message } if message == "The resource could not be found."
    );
    server.join().unwrap();
}

#[test]
fn non_json_error_body_is_a_status_error() {
    let (base_url, server) = serve_once(
        "503 Service Unavailable",
        "text/html",
        "<html>maintenance</html>",
    );
    let http = client_for(base_url);

    let err = client::experiment(&http, &ExperimentQuery::new()).unwrap_err();
    assert_matches!(
        err,
        EncodeError::Status { status: 503, message } if message.contains("maintenance")
    );
    server.join().unwrap();
}

#[test]
fn non_json_success_body_is_a_json_error() {
    let (base_url, server) = serve_once("200 OK", "text/html", "<html>ok</html>");
    let http = client_for(base_url);

    let err = client::experiment(&http, &ExperimentQuery::new()).unwrap_err();
    assert_matches!(err, EncodeError::Json(_));
    server.join().unwrap();
}

#[test]
fn unreachable_host_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let http = client_for(base_url);

    let err = client::biosample(&http, "ENCSR000EDP").unwrap_err();
    assert_matches!(err, EncodeError::Http(_));
}
