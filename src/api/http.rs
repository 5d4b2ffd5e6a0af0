//! Purpose: Talk to an S3-compatible REST endpoint (ListObjectsV2 + GetObject).
//! Exports: `HttpStore`.
//! Role: Network `ObjectStore` used by the CLI and library callers.
//! Invariants: Path-style addressing: `{endpoint}/{bucket}/{key}`.
//! Invariants: Requests are unsigned (optionally carrying a bearer token); no retries.
//! Invariants: Bodies are handed over undecoded; gzip is the encoding selector's job.
#![allow(clippy::result_large_err)]

use serde::Deserialize;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use ureq::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use ureq::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use ureq::rustls::{DigitallySignedStruct, Error as TlsError, SignatureScheme};
use url::Url;

use crate::api::store::{ListPage, ObjectMeta, ObjectStore, StoredObject};
use crate::core::error::{Error, ErrorKind};

type ApiResult<T> = Result<T, Error>;

pub const ENDPOINT_ENV: &str = "FIREHOSE_SIPPER_ENDPOINT";
pub const TOKEN_ENV: &str = "FIREHOSE_SIPPER_TOKEN";
const AWS_ENDPOINT_ENV: &str = "AWS_ENDPOINT_URL";

#[derive(Clone)]
pub struct HttpStore {
    inner: Arc<HttpStoreInner>,
}

struct HttpStoreInner {
    endpoint: Url,
    token: Option<String>,
    max_keys: Option<u32>,
    agent: ureq::Agent,
}

#[derive(Debug)]
struct AcceptAllServerCertVerifier;

impl ServerCertVerifier for AcceptAllServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ureq::rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
    #[serde(default)]
    contents: Option<Vec<ListEntry>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoteError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpStore {
    pub fn new(endpoint: impl Into<String>) -> ApiResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let agent = ureq::AgentBuilder::new().build();
        Ok(Self {
            inner: Arc::new(HttpStoreInner {
                endpoint,
                token: None,
                max_keys: None,
                agent,
            }),
        })
    }

    /// Build from `FIREHOSE_SIPPER_ENDPOINT` (falling back to `AWS_ENDPOINT_URL`)
    /// and `FIREHOSE_SIPPER_TOKEN`.
    pub fn from_env() -> ApiResult<Self> {
        let endpoint = std::env::var(ENDPOINT_ENV)
            .or_else(|_| std::env::var(AWS_ENDPOINT_ENV))
            .map_err(|_| {
                Error::new(ErrorKind::InvalidArgument)
                    .with_message("no object store endpoint configured")
                    .with_hint(format!("Set {ENDPOINT_ENV} or pass --endpoint."))
            })?;
        let mut store = Self::new(endpoint)?;
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            store = store.with_token(token);
        }
        Ok(store)
    }

    pub fn with_token(self, token: impl Into<String>) -> Self {
        let token = Some(token.into());
        self.rebuild(|inner| HttpStoreInner {
            endpoint: inner.endpoint.clone(),
            token,
            max_keys: inner.max_keys,
            agent: inner.agent.clone(),
        })
    }

    /// Page size hint sent as `max-keys`; the server may return fewer.
    pub fn with_max_keys(self, max_keys: u32) -> Self {
        self.rebuild(|inner| HttpStoreInner {
            endpoint: inner.endpoint.clone(),
            token: inner.token.clone(),
            max_keys: Some(max_keys),
            agent: inner.agent.clone(),
        })
    }

    pub fn with_tls_ca_file(self, path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!(
                    "failed to read TLS CA/certificate file {}",
                    path.display()
                ))
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::InvalidArgument)
                    .with_message("failed to parse TLS CA/certificate file")
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("TLS CA/certificate file contains no certificates"));
        }

        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = ureq::rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("TLS CA/certificate file contains no parsable certificates"));
        }

        let tls_config = ureq::rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        Ok(self.with_agent(agent))
    }

    pub fn with_tls_skip_verify(self) -> Self {
        let _ = ureq::rustls::crypto::aws_lc_rs::default_provider().install_default();
        let tls_config = ureq::rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllServerCertVerifier))
            .with_no_client_auth();
        let agent = ureq::builder().tls_config(Arc::new(tls_config)).build();
        self.with_agent(agent)
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    fn with_agent(self, agent: ureq::Agent) -> Self {
        self.rebuild(|inner| HttpStoreInner {
            endpoint: inner.endpoint.clone(),
            token: inner.token.clone(),
            max_keys: inner.max_keys,
            agent,
        })
    }

    fn rebuild(self, build: impl FnOnce(&HttpStoreInner) -> HttpStoreInner) -> Self {
        Self {
            inner: Arc::new(build(&self.inner)),
        }
    }

    fn list_url(&self, bucket: &str, prefix: &str, continuation_token: Option<&str>) -> ApiResult<Url> {
        let mut url = build_url(&self.inner.endpoint, &[bucket])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("list-type", "2");
            pairs.append_pair("prefix", prefix);
            if let Some(token) = continuation_token {
                pairs.append_pair("continuation-token", token);
            }
            if let Some(max_keys) = self.inner.max_keys {
                pairs.append_pair("max-keys", &max_keys.to_string());
            }
        }
        Ok(url)
    }

    fn object_url(&self, bucket: &str, key: &str) -> ApiResult<Url> {
        let mut segments = vec![bucket];
        segments.extend(key.split('/'));
        build_url(&self.inner.endpoint, &segments).map_err(|err| err.with_key(key))
    }

    fn call(&self, url: &Url) -> ApiResult<ureq::Response> {
        let mut request = self.inner.agent.request("GET", url.as_str());
        if let Some(token) = &self.inner.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        match request.call() {
            Ok(resp) => Ok(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message("request failed")
                .with_source(err)),
        }
    }
}

impl ObjectStore for HttpStore {
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        let url = self.list_url(bucket, prefix, continuation_token)?;
        let response = self.call(&url)?;
        let body = response.into_string().map_err(|err| {
            Error::new(ErrorKind::Transport)
                .with_message("failed to read listing response")
                .with_source(err)
        })?;
        parse_list_result(&body)
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<StoredObject, Error> {
        let url = self.object_url(bucket, key)?;
        let response = self.call(&url).map_err(|err| err.with_key(key))?;
        let meta = ObjectMeta {
            content_encoding: response.header("Content-Encoding").map(str::to_string),
            content_type: response.header("Content-Type").map(str::to_string),
            content_length: response
                .header("Content-Length")
                .and_then(|value| value.trim().parse().ok()),
        };
        Ok(StoredObject {
            meta,
            body: response.into_reader(),
        })
    }
}

fn normalize_endpoint(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::InvalidArgument)
            .with_message("invalid object store endpoint")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message("object store endpoint must use http or https scheme"));
    }
    if url.cannot_be_a_base() {
        return Err(Error::new(ErrorKind::InvalidArgument)
            .with_message("object store endpoint cannot be a base url"));
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(endpoint: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = endpoint.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message("object store endpoint cannot be a base")
        })?;
        path.pop_if_empty();
        for segment in segments {
            // URL parsing collapses dot segments (even percent-encoded ones),
            // which would silently address a different object.
            if matches!(*segment, "." | "..") {
                return Err(Error::new(ErrorKind::InvalidArgument)
                    .with_message(format!(
                        "path segment {segment:?} cannot be addressed over http"
                    ))
                    .with_hint(
                        "Keys with `.` or `..` segments need a store that takes raw keys.",
                    ));
            }
            path.push(segment);
        }
    }
    Ok(url)
}

fn parse_list_result(body: &str) -> ApiResult<ListPage> {
    let result: ListBucketResult = quick_xml::de::from_str(body).map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("invalid listing response xml")
            .with_source(err)
    })?;
    Ok(ListPage {
        truncated: result.is_truncated,
        continuation_token: result.next_continuation_token,
        entries: result
            .contents
            .map(|contents| contents.into_iter().map(|entry| entry.key).collect()),
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    let mut message = format!("remote error status {status}");
    if let Ok(remote) = quick_xml::de::from_str::<RemoteError>(&body) {
        if let Some(code) = remote.code {
            message.push_str(&format!(": {code}"));
        }
        if let Some(detail) = remote.message {
            message.push_str(&format!(": {detail}"));
        }
    }
    let err = Error::new(ErrorKind::Transport).with_message(message);
    match status {
        401 | 403 => err.with_hint(
            "Requests are unsigned; the bucket must allow anonymous reads or sit behind a signing proxy.",
        ),
        _ => err,
    }
}
