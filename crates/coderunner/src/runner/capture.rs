//! Output capture with a per-channel byte ceiling

/// Appended to a channel that hit its ceiling
pub const OUTPUT_LIMIT_MARKER: &str = "\n[output limit exceeded]";

/// Appended to stderr when the wall clock ceiling elapses
pub const TIMEOUT_MARKER: &str = "\n[execution timed out]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Channel {
    Stdout,
    Stderr,
}

/// Accumulates stdout and stderr independently up to `ceiling` bytes each
#[derive(Debug)]
pub(crate) struct OutputCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    ceiling: usize,
    /// Channel that overflowed, if any
    overflowed: Option<Channel>,
}

impl OutputCapture {
    pub fn new(ceiling: usize) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            ceiling,
            overflowed: None,
        }
    }

    /// Append a chunk. Returns `true` once the chunk would exceed the ceiling;
    /// the part that fits is kept and the rest discarded.
    pub fn push(&mut self, channel: Channel, data: &[u8]) -> bool {
        if self.overflowed.is_some() {
            return true;
        }

        let ceiling = self.ceiling;
        let buf = self.buffer(channel);
        let room = ceiling.saturating_sub(buf.len());
        if data.len() <= room {
            buf.extend_from_slice(data);
            return false;
        }

        buf.extend_from_slice(&data[..room]);
        self.overflowed = Some(channel);
        true
    }

    pub fn overflowed(&self) -> Option<Channel> {
        self.overflowed
    }

    /// Decode both channels, appending markers where they apply
    pub fn finish(self, timed_out: bool) -> (String, String) {
        let mut stdout = decode(self.stdout, self.overflowed == Some(Channel::Stdout));
        let mut stderr = decode(self.stderr, self.overflowed == Some(Channel::Stderr));

        match self.overflowed {
            Some(Channel::Stdout) => stdout.push_str(OUTPUT_LIMIT_MARKER),
            Some(Channel::Stderr) => stderr.push_str(OUTPUT_LIMIT_MARKER),
            None => {}
        }
        if timed_out {
            stderr.push_str(TIMEOUT_MARKER);
        }

        (stdout, stderr)
    }

    fn buffer(&mut self, channel: Channel) -> &mut Vec<u8> {
        match channel {
            Channel::Stdout => &mut self.stdout,
            Channel::Stderr => &mut self.stderr,
        }
    }
}

/// Decode as UTF-8. A truncated buffer loses an incomplete trailing sequence;
/// other invalid bytes become U+FFFD.
fn decode(mut bytes: Vec<u8>, truncated: bool) -> String {
    if truncated {
        let end = incomplete_tail_start(&bytes);
        bytes.truncate(end);
    }
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Length of `bytes` without a trailing multi-byte sequence cut short
fn incomplete_tail_start(bytes: &[u8]) -> usize {
    // A UTF-8 sequence is at most 4 bytes; look back at most 3 for its lead
    for back in 1..=bytes.len().min(3) {
        let idx = bytes.len() - back;
        let byte = bytes[idx];
        if byte & 0b1100_0000 == 0b1000_0000 {
            // Continuation byte, keep looking for the lead
            continue;
        }
        let needed = match byte {
            b if b & 0b1110_0000 == 0b1100_0000 => 2,
            b if b & 0b1111_0000 == 0b1110_0000 => 3,
            b if b & 0b1111_1000 == 0b1111_0000 => 4,
            _ => return bytes.len(),
        };
        return if back < needed { idx } else { bytes.len() };
    }
    bytes.len()
}
