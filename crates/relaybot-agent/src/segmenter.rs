//! Output segmenter — splits the `generate` node's streamed token chunks
//! into transport-sized segments (§4.3 "Output segmenter").
//!
//! Default mode splits on newlines. A `<no-split>...</no-split>` region is
//! buffered whole and emitted as one segment, newlines preserved. XML-ish
//! tags are stripped from whatever is about to be sent.

use regex::Regex;
use std::sync::OnceLock;

const NO_SPLIT_OPEN: &str = "<no-split>";
const NO_SPLIT_CLOSE: &str = "</no-split>";

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn strip_tags(s: &str) -> String {
    tag_pattern().replace_all(s, "").to_string()
}

#[derive(Default)]
pub struct Segmenter {
    buf: String,
    in_no_split: bool,
}

impl Segmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next text delta; returns any segments ready to send now.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();

        loop {
            if self.in_no_split {
                match self.buf.find(NO_SPLIT_CLOSE) {
                    Some(end) => {
                        let segment = self.buf[..end].to_string();
                        self.buf.drain(..end + NO_SPLIT_CLOSE.len());
                        self.in_no_split = false;
                        out.push(strip_tags(&segment));
                    }
                    None => break,
                }
                continue;
            }

            if let Some(start) = self.buf.find(NO_SPLIT_OPEN) {
                // Flush any complete lines preceding the tag first.
                let before = self.buf[..start].to_string();
                if let Some(last_nl) = before.rfind('\n') {
                    for line in before[..last_nl].split('\n') {
                        if !line.is_empty() {
                            out.push(strip_tags(line));
                        }
                    }
                    self.buf.drain(..last_nl + 1);
                    continue;
                }
                if start > 0 {
                    // Same-line text precedes the tag with no newline to anchor
                    // on — the tag itself marks "before" as complete, so flush
                    // it as its own segment and enter no-split mode now.
                    if !before.is_empty() {
                        out.push(strip_tags(&before));
                    }
                    self.buf.drain(..start);
                    continue;
                }
                self.buf.drain(..NO_SPLIT_OPEN.len());
                self.in_no_split = true;
                continue;
            }

            match self.buf.find('\n') {
                Some(idx) => {
                    let line = self.buf[..idx].to_string();
                    self.buf.drain(..=idx);
                    if !line.is_empty() {
                        out.push(strip_tags(&line));
                    }
                }
                None => break,
            }
        }

        out
    }

    /// Flush whatever remains at end-of-stream.
    pub fn finish(mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(strip_tags(&std::mem::take(&mut self.buf)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_newlines() {
        let mut seg = Segmenter::new();
        let out = seg.feed("line one\nline two\n");
        assert_eq!(out, vec!["line one", "line two"]);
    }

    #[test]
    fn buffers_no_split_region_as_one_segment() {
        let mut seg = Segmenter::new();
        let mut out = seg.feed("before\n<no-split>a\nb\nc</no-split>\nafter\n");
        out.extend(seg.finish());
        assert_eq!(out, vec!["before", "a\nb\nc", "after"]);
    }

    #[test]
    fn no_split_preceded_by_same_line_text() {
        let mut seg = Segmenter::new();
        let mut out = seg.feed("A\nB<no-split>C\nD</no-split>E\n");
        out.extend(seg.finish());
        assert_eq!(out, vec!["A", "B", "C\nD", "E"]);
    }

    #[test]
    fn strips_xml_ish_tags_from_emitted_segments() {
        let mut seg = Segmenter::new();
        let out = seg.feed("hello <image status=\"loading\" /> world\n");
        assert_eq!(out, vec!["hello  world"]);
    }

    #[test]
    fn flushes_trailing_buffer_on_finish() {
        let mut seg = Segmenter::new();
        let mut out = seg.feed("partial line no newline");
        assert!(out.is_empty());
        out.extend(seg.finish());
        assert_eq!(out, vec!["partial line no newline"]);
    }
}
