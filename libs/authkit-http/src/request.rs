use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, USER_AGENT};
use http::{Method, Request, Uri};
use http_body_util::Full;
use serde::Serialize;
use tower::Service;

use crate::client::{BufferedService, map_buffer_error, try_acquire_buffer_slot};
use crate::config::TransportSecurity;
use crate::error::HttpError;
use crate::response::HttpResponse;

const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";

/// One outgoing request, created by [`HttpClient::get`](crate::HttpClient::get)
/// or [`HttpClient::post`](crate::HttpClient::post).
///
/// A bad header is remembered and reported by [`send`](Self::send) (or by the
/// body setters, which return `Result` already).
#[must_use = "a request is only sent by .send()"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    transport: TransportSecurity,
    user_agent: HeaderValue,
    method: Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    extensions: http::Extensions,
    body: Option<(&'static str, Bytes)>,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        transport: TransportSecurity,
        user_agent: HeaderValue,
        method: Method,
        url: String,
    ) -> Self {
        Self {
            service,
            max_body_size,
            transport,
            user_agent,
            method,
            url,
            headers: Vec::new(),
            extensions: http::Extensions::new(),
            body: None,
            error: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_none() {
            match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
                (Ok(name), Ok(value)) => self.headers.push((name, value)),
                _ => {
                    self.error = Some(HttpError::InvalidHeader {
                        name: name.to_owned(),
                    });
                }
            }
        }
        self
    }

    /// Attach a typed value to the `http::Request` extensions, where layers in
    /// the client stack can read it. The refresh-auth layer looks for a
    /// `UserId` here to pick the token slot.
    pub fn extension<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value);
        self
    }

    /// JSON body with `Content-Type: application/json`.
    ///
    /// # Errors
    /// A header error recorded earlier, or [`HttpError::Json`].
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = Some((JSON, Bytes::from(serde_json::to_vec(body)?)));
        Ok(self)
    }

    /// URL-encoded form body, as token endpoints expect.
    ///
    /// # Errors
    /// A header error recorded earlier, or [`HttpError::FormEncode`].
    pub fn form(mut self, fields: &[(&str, &str)]) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.body = Some((FORM, Bytes::from(serde_urlencoded::to_string(fields)?)));
        Ok(self)
    }

    fn parse_url(&self) -> Result<Uri, HttpError> {
        let invalid = |reason| HttpError::InvalidUrl {
            url: self.url.clone(),
            reason,
        };
        let uri: Uri = self.url.parse().map_err(|_| invalid("not a URI"))?;
        if uri.authority().is_none() {
            return Err(invalid("no host"));
        }
        match (uri.scheme_str(), self.transport) {
            (Some("https"), _) | (Some("http"), TransportSecurity::AllowInsecureHttp) => Ok(uri),
            (Some("http"), _) => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "client is TLS-only",
            }),
            (Some(other), _) => Err(HttpError::InvalidScheme {
                scheme: other.to_owned(),
                reason: "only http and https are supported",
            }),
            (None, _) => Err(invalid("no scheme")),
        }
    }

    /// Send the request through the client stack.
    ///
    /// Any status, 4xx and 5xx included, is `Ok`.
    ///
    /// # Errors
    /// Builder errors, a URL the transport policy refuses, connection
    /// failures, timeouts, a full request queue, and errors raised by the auth
    /// layer (boxed in [`HttpError::Transport`]).
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let uri = self.parse_url()?;

        let mut request = Request::builder().method(self.method).uri(uri);
        let caller_sets = |name: &HeaderName| self.headers.iter().any(|(n, _)| n == name);
        if let Some((content_type, _)) = &self.body
            && !caller_sets(&CONTENT_TYPE)
        {
            request = request.header(CONTENT_TYPE, *content_type);
        }
        if !caller_sets(&USER_AGENT) {
            request = request.header(USER_AGENT, self.user_agent);
        }
        for (name, value) in self.headers {
            request = request.header(name, value);
        }

        let body = self.body.map(|(_, bytes)| bytes).unwrap_or_default();
        let mut request = request.body(Full::new(body))?;
        *request.extensions_mut() = self.extensions;

        try_acquire_buffer_slot(&mut self.service).await?;
        let inner = self.service.call(request).await.map_err(map_buffer_error)?;

        Ok(HttpResponse {
            inner,
            max_body_size: self.max_body_size,
        })
    }
}
