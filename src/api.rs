// API client module: a small blocking HTTP client that talks to the
// assistant API gateway. Package upload never fails with an error; its
// outcome is folded into an `UploadResult` the orchestrator can inspect.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::ArtifactReader;
use crate::config::Settings;
use crate::error::ApiError;
use crate::token::Token;

pub const TEMPLATE_PATH: &str = "/cli/templateFiles";
pub const UPLOAD_PATH: &str = "/uploadPackage";
pub const VERIFY_PATH: &str = "/cli/verifyToken";
pub const ORGANISATIONS_PATH: &str = "/cli/organisations";

/// Multipart field carrying the package bytes.
pub const UPLOAD_FIELD: &str = "file";
pub const UPLOAD_FILE_NAME: &str = "package.zip";
pub const UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// Blocking client bound to one API base URL. Tokens are passed per call.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// One file of a project template.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub name: String,
    pub body: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct TemplateResponse {
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    file_list: Vec<TemplateFile>,
}

#[derive(Deserialize, Debug)]
struct VerifyResponse {
    #[serde(default)]
    valid: bool,
}

/// Membership of the token's user in one organisation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Organisation {
    pub team_name: String,
    pub membership_type: String,
}

#[derive(Deserialize, Debug)]
struct OrganisationsResponse {
    #[serde(default)]
    organisations: BTreeMap<String, Organisation>,
}

/// Outcome of one package upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Accepted,
    /// The server answered and refused the package.
    Rejected { messages: Vec<String> },
    /// No usable answer came back.
    Network { detail: String },
}

impl UploadResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, UploadResult::Accepted)
    }

    /// Messages to show the user, in server order.
    pub fn error_messages(&self) -> Vec<String> {
        match self {
            UploadResult::Accepted => Vec::new(),
            UploadResult::Rejected { messages } => messages.clone(),
            UploadResult::Network { detail } => vec![format!("network error: {detail}")],
        }
    }
}

/// Anything that can ship a sealed package under a token.
pub trait Uploader {
    fn upload(&self, artifact: ArtifactReader, token: &Token) -> UploadResult;
}

impl ApiClient {
    /// Create an ApiClient for the configured base URL and timeout.
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        Self::with_base_url(&settings.api_url, settings.timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the project template: every file name and body.
    pub fn fetch_template(&self) -> Result<Vec<TemplateFile>, ApiError> {
        let url = self.url(TEMPLATE_PATH);
        tracing::debug!(%url, "fetching template");
        let res = self.client.get(&url).header(ACCEPT, "application/json").send()?;
        let resp: TemplateResponse = read_json(res)?;
        if resp.error.as_ref().is_some_and(is_truthy) {
            return Err(ApiError::Rejected);
        }
        Ok(resp.file_list)
    }

    /// Ask the server whether `token` is still valid.
    pub fn verify_token(&self, token: &Token) -> Result<bool, ApiError> {
        let url = self.url(VERIFY_PATH);
        let res = self.client.post(&url).headers(auth_headers(token)?).send()?;
        let resp: VerifyResponse = read_json(res)?;
        Ok(resp.valid)
    }

    /// Organisations the token's user belongs to, keyed by id.
    pub fn organisations(&self, token: &Token) -> Result<BTreeMap<String, Organisation>, ApiError> {
        let url = self.url(ORGANISATIONS_PATH);
        let res = self.client.post(&url).headers(auth_headers(token)?).send()?;
        let resp: OrganisationsResponse = read_json(res)?;
        Ok(resp.organisations)
    }

    /// Upload a sealed package as multipart/form-data.
    pub fn upload_package(&self, artifact: ArtifactReader, token: &Token) -> UploadResult {
        let headers = match auth_headers(token) {
            Ok(h) => h,
            Err(e) => return UploadResult::Rejected { messages: vec![e.to_string()] },
        };

        let part = match multipart::Part::reader_with_length(artifact.file, artifact.size)
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(UPLOAD_CONTENT_TYPE)
        {
            Ok(part) => part,
            Err(e) => return UploadResult::Network { detail: e.to_string() },
        };
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);

        let url = self.url(UPLOAD_PATH);
        tracing::debug!(%url, bytes = artifact.size, "uploading package");
        let res = match self.client.post(&url).headers(headers).multipart(form).send() {
            Ok(res) => res,
            Err(e) => return UploadResult::Network { detail: e.to_string() },
        };

        let status = res.status().as_u16();
        match res.bytes() {
            Ok(body) => classify_upload_response(status, &body),
            Err(e) => UploadResult::Network { detail: e.to_string() },
        }
    }
}

impl Uploader for ApiClient {
    fn upload(&self, artifact: ArtifactReader, token: &Token) -> UploadResult {
        self.upload_package(artifact, token)
    }
}

/// Authorization and Accept headers for a bearer token.
fn auth_headers(token: &Token) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    let val = format!("Bearer {}", token.as_str());
    let val = HeaderValue::from_str(&val).map_err(|e| ApiError::InvalidToken(e.to_string()))?;
    headers.insert(AUTHORIZATION, val);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, ApiError> {
    if !res.status().is_success() {
        let status = res.status().as_u16();
        let body = res.text().unwrap_or_default();
        return Err(ApiError::Status { status, body });
    }
    Ok(res.json()?)
}

/// Classify an upload response body.
///
/// An `error` flag wins whatever the status. Without one, a 2xx status is
/// success and anything else is a rejection naming the status.
pub fn classify_upload_response(status: u16, body: &[u8]) -> UploadResult {
    let value: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            return UploadResult::Network {
                detail: format!("malformed response body (HTTP {status}): {e}"),
            }
        }
    };
    let Some(obj) = value.as_object() else {
        return UploadResult::Network {
            detail: format!("malformed response body (HTTP {status}): expected a JSON object"),
        };
    };

    if obj.get("error").is_some_and(is_truthy) {
        let messages = obj
            .get("errorMessages")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(message_text).collect())
            .unwrap_or_default();
        return UploadResult::Rejected { messages };
    }

    if (200..300).contains(&status) {
        UploadResult::Accepted
    } else {
        UploadResult::Rejected {
            messages: vec![format!("server returned HTTP {status}")],
        }
    }
}

fn message_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{SealedArtifact, TempArtifact};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::TempDir;

    /// One-shot HTTP server answering a canned response. Joining the
    /// handle yields the raw request it received.
    struct MockServer {
        url: String,
        handle: thread::JoinHandle<Vec<u8>>,
    }

    impl MockServer {
        fn request(self) -> String {
            String::from_utf8_lossy(&self.handle.join().unwrap()).into_owned()
        }
    }

    fn mock_server(status: u16, body: &str) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let body = body.to_string();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            let request = read_request(&mut stream);

            let resp = format!(
                "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(resp.as_bytes());
            let _ = stream.flush();
            request
        });

        MockServer { url, handle }
    }

    // Reads headers, then the body by Content-Length or chunked framing.
    fn read_request(stream: &mut std::net::TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        let header_end = loop {
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return buf,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        let content_length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        let chunked = head.contains("transfer-encoding: chunked");

        loop {
            let body_len = buf.len() - header_end;
            let done = match content_length {
                Some(len) => body_len >= len,
                None if chunked => buf.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if done {
                return buf;
            }
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => return buf,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn client(url: &str) -> ApiClient {
        ApiClient::with_base_url(url, Duration::from_secs(5)).unwrap()
    }

    fn token() -> Token {
        Token::new("test-token").unwrap()
    }

    fn package(dir: &TempDir, bytes: &[u8]) -> (SealedArtifact, ArtifactReader) {
        let mut artifact = TempArtifact::allocate_in(dir.path(), "up-", ".zip").unwrap();
        artifact.writer().write_all(bytes).unwrap();
        let sealed = artifact.seal().unwrap();
        let reader = sealed.open_for_read().unwrap();
        (sealed, reader)
    }

    #[test]
    fn classifies_rejection_with_messages() {
        let result = classify_upload_response(200, br#"{"error": true, "errorMessages": ["bad token"]}"#);
        assert!(!result.succeeded());
        assert_eq!(result.error_messages(), vec!["bad token"]);
    }

    #[test]
    fn classifies_empty_object_as_success() {
        let result = classify_upload_response(200, b"{}");
        assert!(result.succeeded());
        assert!(result.error_messages().is_empty());
    }

    #[test]
    fn truthy_error_without_messages_is_rejection() {
        for body in [r#"{"error": 1}"#, r#"{"error": "yes"}"#, r#"{"error": {}}"#] {
            let result = classify_upload_response(200, body.as_bytes());
            assert_eq!(result, UploadResult::Rejected { messages: vec![] }, "{body}");
        }
        for body in [r#"{"error": false}"#, r#"{"error": 0}"#, r#"{"error": ""}"#, r#"{"error": null}"#] {
            assert!(classify_upload_response(200, body.as_bytes()).succeeded(), "{body}");
        }
    }

    #[test]
    fn malformed_body_is_network_error() {
        let result = classify_upload_response(200, b"<html>oops</html>");
        assert!(matches!(result, UploadResult::Network { .. }));
        assert!(result.error_messages()[0].starts_with("network error: "));
        assert!(matches!(classify_upload_response(200, b"[]"), UploadResult::Network { .. }));
    }

    #[test]
    fn error_status_without_flag_is_rejection() {
        let result = classify_upload_response(500, b"{}");
        assert_eq!(result.error_messages(), vec!["server returned HTTP 500"]);
    }

    #[test]
    fn upload_sends_multipart_with_bearer_token() {
        let dir = TempDir::new().unwrap();
        let server = mock_server(200, "{}");
        let (_sealed, reader) = package(&dir, b"PK-zip-bytes");
        let result = client(&server.url).upload_package(reader, &token());
        assert_eq!(result, UploadResult::Accepted);

        let request = server.request();
        assert!(request.starts_with("POST /uploadPackage HTTP/1.1"));
        let lower = request.to_ascii_lowercase();
        assert!(lower.contains("authorization: bearer test-token"));
        assert!(lower.contains("content-type: multipart/form-data"));
        assert!(request.contains("name=\"file\""));
        assert!(lower.contains("content-type: application/octet-stream"));
        assert!(request.contains("PK-zip-bytes"));
    }

    #[test]
    fn upload_surfaces_server_messages() {
        let dir = TempDir::new().unwrap();
        let server = mock_server(
            400,
            r#"{"error": true, "errorMessages": ["missing index.js", "bad runtime"]}"#,
        );
        let (_sealed, reader) = package(&dir, b"zip");
        let result = client(&server.url).upload_package(reader, &token());
        assert_eq!(result.error_messages(), vec!["missing index.js", "bad runtime"]);
        server.request();
    }

    #[test]
    fn connection_refused_is_network_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = TempDir::new().unwrap();
        let (_sealed, reader) = package(&dir, b"zip");
        let result = client(&format!("http://127.0.0.1:{port}")).upload_package(reader, &token());
        assert!(!result.succeeded());
        assert!(!result.error_messages().is_empty());
        assert!(matches!(result, UploadResult::Network { .. }));
    }

    #[test]
    fn fetch_template_returns_file_list() {
        let server = mock_server(
            200,
            r#"{"fileList": [{"name": "index.js", "body": "exports.x = 1;"}, {"name": "lib/a.js", "body": ""}]}"#,
        );
        let files = client(&server.url).fetch_template().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "index.js");
        assert_eq!(files[1].body, "");
        assert!(server.request().starts_with("GET /cli/templateFiles"));
    }

    #[test]
    fn fetch_template_error_flag_is_rejected() {
        let server = mock_server(200, r#"{"error": true}"#);
        assert!(matches!(client(&server.url).fetch_template(), Err(ApiError::Rejected)));
        server.request();
    }

    #[test]
    fn verify_token_reads_valid_flag() {
        let server = mock_server(200, r#"{"valid": true}"#);
        assert!(client(&server.url).verify_token(&token()).unwrap());
        let request = server.request();
        assert!(request.starts_with("POST /cli/verifyToken"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer test-token"));
    }

    #[test]
    fn organisations_are_keyed_by_id() {
        let server = mock_server(
            200,
            r#"{"organisations": {"org-2": {"teamName": "Beta", "membershipType": "member"},
                                  "org-1": {"teamName": "Alpha", "membershipType": "owner"}}}"#,
        );
        let orgs = client(&server.url).organisations(&token()).unwrap();
        let ids: Vec<&str> = orgs.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["org-1", "org-2"]);
        assert_eq!(orgs["org-1"].team_name, "Alpha");
        assert_eq!(orgs["org-2"].membership_type, "member");
        server.request();
    }

    #[test]
    fn api_status_errors_carry_body() {
        let server = mock_server(401, r#"{"message": "nope"}"#);
        match client(&server.url).verify_token(&token()) {
            Err(ApiError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("nope"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        server.request();
    }
}
