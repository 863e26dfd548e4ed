// API client module: a small blocking client for the VirusTotal v2 file
// endpoints. The HTTP layer sits behind the `Transport` trait so the scan
// and report calls can be driven by a scripted transport in tests.

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sample::Sample;

/// Canonical service hostname. The service rejects requests whose Host
/// header differs, whatever address we actually connect to.
pub const API_HOST: &str = "www.virustotal.com";
pub const API_PORT: u16 = 443;
/// Used when DNS resolution of `API_HOST` fails.
pub const FALLBACK_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(74, 125, 34, 46));

pub const SCAN_PATH: &str = "/vtapi/v2/file/scan";
pub const REPORT_PATH: &str = "/vtapi/v2/file/report";

/// Multipart boundary used for sample uploads.
pub const BOUNDARY: &str = "----------ThIs_Is_tHe_bouNdaRY_$";

const HTTP_TIMEOUT_SECS: u64 = 300;

/// `response_code` value meaning the report is complete.
pub const RESPONSE_READY: i64 = 1;
/// `response_code` value meaning the sample is not analysed yet.
pub const RESPONSE_PENDING: i64 = 0;

/// Failures the service reports through dedicated status codes. Both are
/// fatal for the call that produced them.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    #[error("request rate limit exceeded")]
    RateLimited,
    #[error("invalid or insufficient API key")]
    Unauthorized,
}

/// Raw status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// The only thing the client needs from the network. `None` means no
/// response was obtained at all (connection refused, TLS failure, ...).
pub trait Transport {
    fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Option<HttpResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Option<HttpResponse> {
        (**self).send(method, path, headers, body)
    }
}

/// HTTPS transport pinned to the address `API_HOST` resolved to at
/// construction time. URLs keep the canonical hostname, so SNI and the
/// Host header stay correct even when the fallback address is used.
pub struct HttpsTransport {
    client: Client,
    addr: SocketAddr,
}

impl HttpsTransport {
    pub fn new() -> Result<Self> {
        let addr = resolve_host(API_HOST);
        let client = Client::builder()
            .resolve(API_HOST, addr)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpsTransport { client, addr })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Look `host` up once; fall back to `FALLBACK_IP` when the lookup fails
/// or yields nothing.
fn resolve_host(host: &str) -> SocketAddr {
    match (host, API_PORT).to_socket_addrs() {
        Ok(mut addrs) => {
            if let Some(addr) = addrs.next() {
                debug!(%addr, "resolved {}", host);
                return addr;
            }
            warn!("no addresses for {}, using fallback {}", host, FALLBACK_IP);
        }
        Err(e) => warn!(error = %e, "could not resolve {}, using fallback {}", host, FALLBACK_IP),
    }
    SocketAddr::new(FALLBACK_IP, API_PORT)
}

impl Transport for HttpsTransport {
    fn send(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Option<HttpResponse> {
        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "invalid HTTP method {}", method);
                return None;
            }
        };
        let url = format!("https://{}{}", API_HOST, path);
        let mut req = self.client.request(method, &url).body(body);
        for (name, value) in headers {
            req = req.header(*name, value.as_str());
        }

        let res = match req.send() {
            Ok(res) => res,
            Err(e) => {
                warn!(error = %e, "request to {} failed", path);
                return None;
            }
        };
        let status = res.status().as_u16();
        match res.bytes() {
            Ok(bytes) => Some(HttpResponse {
                status,
                body: bytes.to_vec(),
            }),
            Err(e) => {
                warn!(error = %e, status, "failed to read response body from {}", path);
                None
            }
        }
    }
}

/// Decoded body of the scan (submit) call.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ScanResponse {
    pub response_code: i64,
    pub verbose_msg: String,
    pub resource: String,
    pub scan_id: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub permalink: String,
}

/// Decoded body of the report call.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Report {
    pub response_code: i64,
    pub verbose_msg: String,
    pub resource: String,
    pub scan_id: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub scan_date: String,
    pub permalink: String,
    pub positives: u32,
    pub total: u32,
    pub scans: BTreeMap<String, EngineResult>,
}

impl Report {
    pub fn is_ready(&self) -> bool {
        self.response_code == RESPONSE_READY
    }
}

/// One antivirus engine's verdict. Clean engines report `null` for the
/// signature name, so everything but the flag is optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EngineResult {
    pub detected: bool,
    pub version: Option<String>,
    pub result: Option<String>,
    pub update: Option<String>,
}

/// Link to the analysis page, for when the submit call gave us none.
pub fn fallback_permalink(sha256: &str) -> String {
    format!("https://{}/file/{}/analysis/", API_HOST, sha256)
}

/// Build the upload body. Parts are joined with CRLF and the body ends with
/// the closing boundary followed by one CRLF.
pub fn multipart_body(boundary: &str, api_key: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    const CRLF: &[u8] = b"\r\n";
    let mut lines: Vec<&[u8]> = Vec::with_capacity(11);
    let open = format!("--{}", boundary);
    let apikey_disposition = "Content-Disposition: form-data; name=\"apikey\"".to_string();
    let file_disposition = format!(
        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"",
        filename
    );
    let close = format!("--{}--", boundary);

    lines.push(open.as_bytes());
    lines.push(apikey_disposition.as_bytes());
    lines.push(b"");
    lines.push(api_key.as_bytes());
    lines.push(open.as_bytes());
    lines.push(file_disposition.as_bytes());
    lines.push(b"Content-Type: application/octet-stream");
    lines.push(b"");
    lines.push(data);
    lines.push(close.as_bytes());
    lines.push(b"");

    lines.join(CRLF)
}

/// URL-encoded body for the report call.
pub fn report_form(api_key: &str, resource: &str) -> String {
    format!(
        "apikey={}&resource={}",
        urlencoding::encode(api_key),
        urlencoding::encode(resource)
    )
}

/// Client for the two file endpoints, authenticated with one API key.
pub struct ApiClient<T: Transport> {
    transport: T,
    api_key: String,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T, api_key: impl Into<String>) -> Self {
        ApiClient {
            transport,
            api_key: api_key.into(),
        }
    }

    /// Upload `sample` for scanning.
    pub fn scan_sample(&self, sample: &Sample) -> Result<Option<ScanResponse>, ApiError> {
        let body = multipart_body(BOUNDARY, &self.api_key, sample.filename(), sample.data());
        let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
        debug!(file = sample.filename(), bytes = body.len(), "submitting sample");
        self.execute(SCAN_PATH, content_type, body)
    }

    /// Fetch the report for a previously submitted resource.
    pub fn retrieve_report(&self, sha256: &str) -> Result<Option<Report>, ApiError> {
        let body = report_form(&self.api_key, sha256).into_bytes();
        debug!(resource = sha256, "requesting report");
        self.execute(
            REPORT_PATH,
            "application/x-www-form-urlencoded".to_string(),
            body,
        )
    }

    fn execute<R: DeserializeOwned>(
        &self,
        path: &str,
        content_type: String,
        body: Vec<u8>,
    ) -> Result<Option<R>, ApiError> {
        let headers = [("Content-Type", content_type)];
        let Some(res) = self.transport.send("POST", path, &headers, body) else {
            warn!("no response from {}", path);
            return Ok(None);
        };
        match res.status {
            204 => Err(ApiError::RateLimited),
            403 => Err(ApiError::Unauthorized),
            status => match serde_json::from_slice(&res.body) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    debug!(status, error = %e, "undecodable response from {}", path);
                    Ok(None)
                }
            },
        }
    }
}
