use std::fmt;

/// HTTP/2 client connection preface. Every gRPC client opens with it.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// HTTP/1.x request methods recognized at the start of a connection.
const HTTP1_METHODS: &[&[u8]] = &[
    b"GET", b"HEAD", b"POST", b"PUT", b"PATCH", b"DELETE", b"OPTIONS", b"CONNECT", b"TRACE",
];

/// Protocol spoken on an accepted connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Binary RPC over HTTP/2.
    Rpc,
    /// HTTP/1.x requests.
    Http,
    /// Neither; the connection is dropped.
    Unknown,
}

impl Protocol {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Rpc => "rpc",
            Protocol::Http => "http",
            Protocol::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a connection from the first bytes the client sent.
///
/// Returns `None` while `prefix` could still become more than one outcome;
/// the caller reads more bytes and asks again.
///
/// Any connection opening with the HTTP/2 preface is [`Protocol::Rpc`]; the
/// gRPC `content-type` is never looked at. A plain HTTP/2 client therefore
/// reaches the RPC stack, not the HTTP/1.1 gateway.
pub fn classify(prefix: &[u8]) -> Option<Protocol> {
    if prefix.is_empty() {
        return None;
    }

    let could_be_rpc = match_prefix(prefix, HTTP2_PREFACE);
    if could_be_rpc == Some(true) {
        return Some(Protocol::Rpc);
    }

    let mut could_be_http = false;
    for method in HTTP1_METHODS {
        match match_prefix(prefix, method) {
            Some(true) => match prefix.get(method.len()) {
                Some(b' ') => return Some(Protocol::Http),
                Some(_) => {}
                None => could_be_http = true,
            },
            Some(false) => could_be_http = true,
            None => {}
        }
    }

    if could_be_rpc.is_some() || could_be_http {
        None
    } else {
        Some(Protocol::Unknown)
    }
}

/// `Some(true)` when `prefix` starts with `token`, `Some(false)` when `prefix`
/// is a proper prefix of `token`, `None` when they diverge.
fn match_prefix(prefix: &[u8], token: &[u8]) -> Option<bool> {
    let n = prefix.len().min(token.len());
    if prefix[..n] != token[..n] {
        return None;
    }
    Some(prefix.len() >= token.len())
}
