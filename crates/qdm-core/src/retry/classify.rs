//! Which fetch failures are worth another attempt.

/// 429 and 503: the server is asking the client to back off.
pub fn is_throttle_status(code: u32) -> bool {
    matches!(code, 429 | 503)
}

pub fn is_server_error(code: u32) -> bool {
    (500..600).contains(&code)
}

/// Timeouts and dropped or refused connections. Malformed URLs, TLS and
/// protocol errors will fail the same way again.
pub fn is_transient_curl(e: &curl::Error) -> bool {
    e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
}
