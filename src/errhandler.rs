use hyper::header::{HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use tracing::debug;

use crate::response_writer::ResponseWriter;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Simple JSON error body, `{"err": <msg>}`.
#[derive(Debug, Serialize)]
struct ErrBody<'a> {
    err: &'a str,
}

/// Write a JSON error message with the given status code into the buffered
/// writer. An empty message is a no-op so callers can pass through optional
/// errors unconditionally.
pub fn err_handler(rw: &mut ResponseWriter, code: u16, err: &str) {
    if err.is_empty() {
        return;
    }
    debug!(code, error = err, "handler error");
    rw.header_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    rw.write_header(code);
    match serde_json::to_vec(&ErrBody { err }) {
        Ok(body) => {
            rw.write(&body);
        }
        Err(e) => {
            debug!(error = %e, "failed to encode error body");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_err_handler_writes_json() {
        let mut rw = ResponseWriter::new();
        err_handler(&mut rw, 500, "no proxy ip address");
        assert_eq!(rw.response_code(), 500);
        assert_eq!(
            rw.header().get(CONTENT_TYPE).unwrap(),
            JSON_CONTENT_TYPE
        );
        let body: serde_json::Value = serde_json::from_slice(rw.bytes()).unwrap();
        assert_eq!(body["err"], "no proxy ip address");
    }

    #[test]
    fn test_err_handler_ignores_empty_message() {
        let mut rw = ResponseWriter::new();
        err_handler(&mut rw, 500, "");
        assert_eq!(rw.response_code(), 0);
        assert_eq!(rw.len(), 0);
    }
}
