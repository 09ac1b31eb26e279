//! Line splitting for the unframed inbound stream.

/// Line terminator style seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Cr,
    CrLf,
}

impl Terminator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Terminator::Cr => "\r",
            Terminator::CrLf => "\r\n",
        }
    }
}

/// Accumulates inbound text and hands out complete lines.
///
/// The terminator style is locked in by the first CR that is followed by
/// another character and used for the rest of the exchange.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
    terminator: Option<Terminator>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminator detected so far, if decided.
    pub fn terminator(&self) -> Option<Terminator> {
        self.terminator
    }

    /// Text received after the last terminator.
    pub fn pending(&self) -> &str {
        &self.partial
    }

    /// Append `chunk` and drain every complete line.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        self.detect_terminator();

        let separator = self.terminator.unwrap_or(Terminator::Cr).as_str();
        let Some(last) = self.partial.rfind(separator) else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last + separator.len());
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .strip_suffix(separator)
            .unwrap_or(complete.as_str())
            .split(separator)
            // A CR that ended a chunk may have been the first half of a CRLF.
            .map(|line| line.trim_start_matches('\n').to_string())
            .collect()
    }

    fn detect_terminator(&mut self) {
        if self.terminator.is_some() {
            return;
        }
        let bytes = self.partial.as_bytes();
        if let Some(pos) = bytes.iter().position(|&b| b == b'\r') {
            match bytes.get(pos + 1) {
                Some(b'\n') => self.terminator = Some(Terminator::CrLf),
                Some(_) => self.terminator = Some(Terminator::Cr),
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("one\rtwo\rthr"), vec!["one", "two"]);
        assert_eq!(buf.terminator(), Some(Terminator::Cr));
        assert_eq!(buf.pending(), "thr");
        assert_eq!(buf.push("ee\r"), vec!["three"]);
        assert_eq!(buf.pending(), "");
    }

    #[test]
    fn test_crlf_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("one\r\ntwo\r\n"), vec!["one", "two"]);
        assert_eq!(buf.terminator(), Some(Terminator::CrLf));
    }

    #[test]
    fn test_no_terminator_keeps_accumulating() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(r#"{"i":"ab"#).is_empty());
        assert!(buf.push(r#"cd","r":1}"#).is_empty());
        assert_eq!(buf.push("\r"), vec![r#"{"i":"abcd","r":1}"#]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut buf = LineBuffer::new();
        // Undecided: the CR is the last byte seen.
        assert_eq!(buf.push("first\r"), vec!["first"]);
        assert_eq!(buf.terminator(), None);
        assert_eq!(buf.push("\nsecond\r\n"), vec!["second"]);
        assert_eq!(buf.terminator(), Some(Terminator::CrLf));
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push("\r\rx\r"), vec!["", "", "x"]);
    }
}
