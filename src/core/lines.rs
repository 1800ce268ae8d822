// Incremental UTF-8 decoding and quote-aware line splitting over a byte reader.
use std::collections::VecDeque;
use std::io::{self, Read};

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};
use crate::core::source::Source;

pub const DEFAULT_LINE_SEPARATOR: &str = "\n";
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Split `text` on `separator`, never splitting inside a quoted region.
///
/// A `"` toggles the quoted state unless it directly follows a backslash. The
/// quote state restarts at every split point.
pub fn split_preserving_quotes<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let bytes = text.as_bytes();
    let sep = separator.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        if !quoted && !sep.is_empty() && bytes[i..].starts_with(sep) {
            segments.push(&text[start..i]);
            i += sep.len();
            start = i;
            escaped = false;
            continue;
        }
        let byte = bytes[i];
        if byte == b'"' && !escaped {
            quoted = !quoted;
        }
        escaped = byte == b'\\';
        i += 1;
    }
    segments.push(&text[start..]);
    segments
}

/// Forward-only sequence of logical lines read from `R`.
pub struct LineReader<R> {
    reader: Option<R>,
    separator: String,
    chunk: Vec<u8>,
    undecoded: Vec<u8>,
    pending: String,
    ready: VecDeque<String>,
    finished: bool,
}

impl<R: Read + Send> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_separator(reader, DEFAULT_LINE_SEPARATOR)
    }

    pub fn with_separator(reader: R, separator: impl Into<String>) -> Self {
        Self {
            reader: Some(reader),
            separator: separator.into(),
            chunk: vec![0u8; DEFAULT_CHUNK_SIZE],
            undecoded: Vec::new(),
            pending: String::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk = vec![0u8; chunk_size.max(1)];
        self
    }

    fn fill(&mut self) -> Result<(), Error> {
        let Some(reader) = self.reader.as_mut() else {
            self.finished = true;
            return Ok(());
        };
        let read = loop {
            match reader.read(&mut self.chunk) {
                Ok(read) => break read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(Error::new(ErrorKind::NetworkFailure)
                        .with_message("failed to read data file")
                        .with_source(err));
                }
            }
        };

        if read == 0 {
            self.finish();
            return Ok(());
        }

        let (chunk, undecoded) = (&self.chunk[..read], &mut self.undecoded);
        undecoded.extend_from_slice(chunk);
        decode_available(undecoded, &mut self.pending);
        self.split_pending();
        Ok(())
    }

    fn split_pending(&mut self) {
        if !self.pending.contains(self.separator.as_str()) {
            return;
        }
        let segments = split_preserving_quotes(&self.pending, &self.separator);
        let Some((rest, complete)) = segments.split_last() else {
            return;
        };
        let consumed = self.pending.len() - rest.len();
        for line in complete {
            if !line.is_empty() {
                self.ready.push_back((*line).to_string());
            }
        }
        self.pending.drain(..consumed);
    }

    fn finish(&mut self) {
        if !self.undecoded.is_empty() {
            self.pending.push_str(&self.undecoded.to_str_lossy());
            self.undecoded.clear();
        }
        self.split_pending();
        if !self.pending.is_empty() {
            self.ready.push_back(std::mem::take(&mut self.pending));
        }
        self.reader = None;
        self.finished = true;
    }
}

impl<R: Read + Send> Source for LineReader<R> {
    type Item = String;

    fn next_item(&mut self) -> Result<Option<String>, Error> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.finished {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn cancel(&mut self) {
        self.reader = None;
        self.ready.clear();
        self.pending.clear();
        self.undecoded.clear();
        self.finished = true;
    }
}

/// Move every complete code point from `undecoded` into `out`, leaving a
/// trailing incomplete sequence (if any) for the next chunk.
fn decode_available(undecoded: &mut Vec<u8>, out: &mut String) {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&undecoded[start..]) {
            Ok(text) => {
                out.push_str(text);
                start = undecoded.len();
                break;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                out.push_str(&undecoded[start..start + valid].to_str_lossy());
                match err.error_len() {
                    Some(invalid) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start += valid + invalid;
                    }
                    None => {
                        start += valid;
                        break;
                    }
                }
            }
        }
    }
    undecoded.drain(..start);
}

#[cfg(test)]
mod tests {
    use super::{LineReader, split_preserving_quotes};
    use crate::core::source::{Source, drain};
    use std::io::{Cursor, Read};

    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let end = (self.pos + self.step).min(self.data.len()).min(self.pos + buf.len());
            let read = end - self.pos;
            buf[..read].copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(read)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))
        }
    }

    #[test]
    fn split_keeps_quoted_separator() {
        assert_eq!(
            split_preserving_quotes("1,\"a,b\",2", ","),
            vec!["1", "\"a,b\"", "2"]
        );
    }

    #[test]
    fn split_ignores_escaped_quotes() {
        let cells = split_preserving_quotes(r#"1,"say \"hi\", ok",3"#, ",");
        assert_eq!(cells, vec!["1", r#""say \"hi\", ok""#, "3"]);
    }

    #[test]
    fn split_of_empty_text_is_one_empty_segment() {
        assert_eq!(split_preserving_quotes("", ","), vec![""]);
        assert_eq!(split_preserving_quotes("a,", ","), vec!["a", ""]);
    }

    #[test]
    fn reader_keeps_quoted_newline_in_one_line() {
        let text = "1,\"first\nsecond\",x\n2,plain,y\n";
        let mut lines = LineReader::new(Cursor::new(text.as_bytes().to_vec()));
        let got = drain(&mut lines).expect("lines");
        assert_eq!(got, vec!["1,\"first\nsecond\",x", "2,plain,y"]);
    }

    #[test]
    fn reader_yields_trailing_partial_line_and_skips_blank_lines() {
        let text = "a\n\n\nb\nc";
        let mut lines = LineReader::new(Cursor::new(text.as_bytes().to_vec()));
        assert_eq!(drain(&mut lines).expect("lines"), vec!["a", "b", "c"]);
    }

    #[test]
    fn reader_decodes_code_points_split_across_chunks() {
        let text = "1,\"ポーション\"\n2,\"エーテル\"\n";
        let reader = Trickle {
            data: text.as_bytes().to_vec(),
            pos: 0,
            step: 1,
        };
        let mut lines = LineReader::new(reader).with_chunk_size(1);
        assert_eq!(
            drain(&mut lines).expect("lines"),
            vec!["1,\"ポーション\"", "2,\"エーテル\""]
        );
    }

    #[test]
    fn reader_replaces_invalid_bytes() {
        let mut data = b"a".to_vec();
        data.push(0xff);
        data.extend_from_slice(b"b\nc");
        let mut lines = LineReader::new(Cursor::new(data));
        assert_eq!(drain(&mut lines).expect("lines"), vec!["a\u{FFFD}b", "c"]);
    }

    #[test]
    fn reader_honours_custom_separator() {
        let text = "a\r\nb\r\n";
        let mut lines = LineReader::with_separator(Cursor::new(text.as_bytes().to_vec()), "\r\n");
        assert_eq!(drain(&mut lines).expect("lines"), vec!["a", "b"]);
    }

    #[test]
    fn read_failure_is_network_failure() {
        let mut lines = LineReader::new(Broken);
        let err = lines.next_item().expect_err("err");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::NetworkFailure);
    }

    #[test]
    fn cancel_stops_the_sequence() {
        let mut lines = LineReader::new(Cursor::new(b"a\nb\nc\n".to_vec()));
        assert_eq!(lines.next_item().expect("line").as_deref(), Some("a"));
        lines.cancel();
        assert_eq!(lines.next_item().expect("line"), None);
    }
}
