//! Incremental framing for the diagnostics stream.
//!
//! The daemon writes compact JSON objects back to back, normally separated by
//! `\n`, but chunk boundaries fall anywhere. [`ObjectScanner`] accumulates
//! bytes and cuts complete top-level objects by brace balance, tracking string
//! literals so braces inside messages do not count.

/// Pending input above this size without a complete object is discarded.
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// One unit cut from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A brace-balanced object, not yet decoded.
    Object(Vec<u8>),
    /// Text that cannot be an object (stray line, truncated object, overflow).
    Malformed(String),
}

#[derive(Debug, Default)]
pub struct ObjectScanner {
    buf: Vec<u8>,
    /// Scan resumes here; bytes before it belong to the current object.
    pos: usize,
    depth: u32,
    in_string: bool,
    escaped: bool,
    in_object: bool,
}

impl ObjectScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Drop everything buffered, e.g. when the producing process exits.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.reset_scan();
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Cut the next complete segment, or `None` until more input arrives.
    pub fn next_segment(&mut self) -> Option<Segment> {
        if !self.in_object {
            let Some(start) = self.buf.iter().position(|b| !b.is_ascii_whitespace()) else {
                self.buf.clear();
                return None;
            };
            self.buf.drain(..start);
            if self.buf[0] != b'{' {
                let Some(end) = self.buf.iter().position(|&b| b == b'\n') else {
                    return self.overflow();
                };
                let line = self.take(end + 1);
                return Some(Segment::Malformed(line));
            }
            self.in_object = true;
            self.pos = 0;
        }
        self.scan().or_else(|| self.overflow())
    }

    /// Advance through the current object. Returns a segment once the object
    /// closes or turns out to be truncated.
    fn scan(&mut self) -> Option<Segment> {
        let mut i = self.pos;
        while i < self.buf.len() {
            let b = self.buf[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                i += 1;
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let object = self.buf.drain(..=i).collect();
                        self.reset_scan();
                        return Some(Segment::Object(object));
                    }
                }
                b'\n' => {
                    // Nested content of pretty-printed JSON is indented, so an
                    // unindented `{` after a newline starts a new object and
                    // the current one was truncated.
                    match self.buf.get(i + 1) {
                        None => {
                            self.pos = i;
                            return None;
                        }
                        Some(b'{') => {
                            let text = self.take(i + 1);
                            return Some(Segment::Malformed(text));
                        }
                        Some(_) => {}
                    }
                }
                _ => {}
            }
            i += 1;
        }
        self.pos = i;
        None
    }

    fn overflow(&mut self) -> Option<Segment> {
        if self.buf.len() <= MAX_PENDING_BYTES {
            return None;
        }
        let dropped = self.buf.len();
        self.clear();
        Some(Segment::Malformed(format!(
            "<{dropped} bytes without a complete object discarded>"
        )))
    }

    fn take(&mut self, len: usize) -> String {
        let bytes: Vec<u8> = self.buf.drain(..len).collect();
        self.reset_scan();
        String::from_utf8_lossy(&bytes).trim().to_string()
    }

    fn reset_scan(&mut self) {
        self.pos = 0;
        self.depth = 0;
        self.in_string = false;
        self.escaped = false;
        self.in_object = false;
    }
}
