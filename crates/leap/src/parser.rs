//! Stream framer: turns arbitrarily chunked socket reads into complete,
//! newline-delimited message frames.
//!
//! The trailing fragment of every feed is retained until a later chunk
//! supplies its delimiter, so a frame split across any number of reads is
//! reassembled intact. Memory grows only with the longest undelimited
//! fragment currently buffered.

use bytes::{Bytes, BytesMut};

/// Carry buffer for the line-delimited stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and emit every complete line it finishes, in order.
    ///
    /// A `\n` delimits each line; an optional preceding `\r` is stripped.
    /// The delimiter itself is not part of the emitted line. A chunk with no
    /// delimiter emits nothing and only extends the carry buffer.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let mut line = self.carry.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            lines.push(line.freeze());
        }
        lines
    }

    /// Bytes currently buffered without a delimiter.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_as_strings(lines: Vec<Bytes>) -> Vec<String> {
        lines
            .into_iter()
            .map(|l| String::from_utf8(l.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn one_chunk_equals_many_chunks() {
        let payload = b"{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n";

        let mut whole = LineBuffer::new();
        let all_at_once = lines_as_strings(whole.feed(payload));

        for split in 1..payload.len() {
            let mut piecewise = LineBuffer::new();
            let mut collected = Vec::new();
            collected.extend(piecewise.feed(&payload[..split]));
            collected.extend(piecewise.feed(&payload[split..]));
            assert_eq!(
                lines_as_strings(collected),
                all_at_once,
                "split at {split} diverged"
            );
        }
    }

    #[test]
    fn byte_at_a_time_reassembles() {
        let payload = b"{\"CommuniqueType\":\"ReadResponse\"}\n";
        let mut buffer = LineBuffer::new();
        let mut collected = Vec::new();
        for byte in payload {
            collected.extend(buffer.feed(&[*byte]));
        }
        assert_eq!(
            lines_as_strings(collected),
            vec!["{\"CommuniqueType\":\"ReadResponse\"}"]
        );
    }

    #[test]
    fn partial_line_is_retained() {
        let mut buffer = LineBuffer::new();
        let head = b"{\"CommuniqueType\": \"Subscribe";
        assert!(buffer.feed(head).is_empty());
        assert_eq!(buffer.pending(), head.len());

        let lines = buffer.feed(b"Response\"}\n");
        assert_eq!(
            lines_as_strings(lines),
            vec!["{\"CommuniqueType\": \"SubscribeResponse\"}"]
        );
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn chunk_without_delimiter_emits_nothing() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.feed(b"no newline here").is_empty());
        assert!(buffer.feed(b", still none").is_empty());
    }

    #[test]
    fn multiple_delimiters_in_one_chunk_emit_in_order() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.feed(b"first\nsecond\nthird\ntrailing");
        assert_eq!(lines_as_strings(lines), vec!["first", "second", "third"]);
        assert_eq!(buffer.pending(), "trailing".len());
    }

    #[test]
    fn crlf_delimiter_is_stripped() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.feed(b"one\r\ntwo\n");
        assert_eq!(lines_as_strings(lines), vec!["one", "two"]);
    }

    #[test]
    fn empty_lines_are_emitted() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.feed(b"\n\nx\n");
        assert_eq!(lines_as_strings(lines), vec!["", "", "x"]);
    }

    #[test]
    fn garbage_line_does_not_affect_following_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.feed(b"this is not valid JSON\n{\"ok\":true}\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines_as_strings(lines)[1],
            "{\"ok\":true}"
        );
    }
}
