//! Decoding of control request payloads

use tether_pty::WindowSize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("{kind} payload truncated: need {needed} bytes, got {got}")]
    Truncated {
        kind: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("{kind} payload has a non UTF-8 terminal name")]
    InvalidString { kind: &'static str },
}

/// Request types the session understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Shell,
    PtyReq,
    WindowChange,
    Env,
    Other,
}

impl RequestKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "shell" => Self::Shell,
            "pty-req" => Self::PtyReq,
            "window-change" => Self::WindowChange,
            "env" => Self::Env,
            _ => Self::Other,
        }
    }
}

/// Terminal parameters from a `pty-req`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub size: WindowSize,
}

struct Reader<'a> {
    kind: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(kind: &'static str, buf: &'a [u8]) -> Self {
        Self { kind, buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RequestError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(RequestError::Truncated {
                kind: self.kind,
                needed: self.pos.saturating_add(len),
                got: self.buf.len(),
            }),
        }
    }

    fn u32(&mut self) -> Result<u32, RequestError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn string(&mut self) -> Result<&'a str, RequestError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| RequestError::InvalidString { kind: self.kind })
    }
}

/// Parse a `window-change` payload.
///
/// Only the leading width and height are read; the pixel fields that follow
/// are ignored whatever they contain.
pub fn parse_window_change(payload: &[u8]) -> Result<WindowSize, RequestError> {
    let mut reader = Reader::new("window-change", payload);
    let width = reader.u32()?;
    let height = reader.u32()?;
    Ok(WindowSize::new(width, height))
}

/// Parse the terminal name and size from a `pty-req` payload
pub fn parse_pty_request(payload: &[u8]) -> Result<PtyRequest, RequestError> {
    let mut reader = Reader::new("pty-req", payload);
    let term = reader.string()?.to_string();
    let width = reader.u32()?;
    let height = reader.u32()?;
    Ok(PtyRequest {
        term,
        size: WindowSize::new(width, height),
    })
}
