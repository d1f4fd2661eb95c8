use hyper::header::HeaderMap;
use hyper::{Body, Response, StatusCode};

/// In-memory response writer used by the middleware chain.
///
/// Buffers status code, headers and body so that outer stages can inspect
/// the outcome of inner stages before anything reaches the wire. The retry
/// stage resets the buffer between attempts; only the outermost stage flushes
/// the final state into a real response. Exactly one request path owns one
/// instance.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    code: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffered status code. 0 means "not written yet"; a later call
    /// overwrites an earlier one, mirroring how inner stages get corrected by
    /// outer error handling.
    pub fn write_header(&mut self, code: u16) {
        self.code = code;
    }

    /// Append bytes to the buffered body, returning how many were taken.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        self.body.extend_from_slice(buf);
        buf.len()
    }

    pub fn header(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The buffered status code, 0 when no stage has written one.
    pub fn response_code(&self) -> u16 {
        self.code
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Clear status, headers and body so the buffer can be reused for the
    /// next retry attempt.
    pub fn reset(&mut self) {
        self.code = 0;
        self.headers.clear();
        self.body.clear();
    }

    /// Flush status, headers, then body into another writer.
    pub fn copy_to(&self, dst: &mut ResponseWriter) {
        dst.write_header(self.code);
        for (name, value) in self.headers.iter() {
            dst.headers.append(name.clone(), value.clone());
        }
        dst.write(&self.body);
    }

    /// Turn the buffered state into a wire response. An unset status code
    /// flushes as 200, like a handler that only ever wrote a body.
    pub fn into_response(self) -> Response<Body> {
        let status = if self.code == 0 {
            StatusCode::OK
        } else {
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        };
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}
