//! Recovering structure from noisy backend output

const REASONING_MARKERS: &[(&str, &str)] = &[("<think>", "</think>"), ("<thinking>", "</thinking>")];

/// Slice out the first balanced `{...}` object, skipping code fences.
///
/// Depth counting does not understand string literals; braces inside quoted
/// values only work out when they happen to balance. Returns the cleaned
/// content unchanged when no balanced object exists.
pub fn extract_json(content: &str) -> &str {
    let mut content = content.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    let content = content.trim();

    let Some(start) = content.find('{') else {
        return content;
    };

    let mut depth = 0usize;
    for (offset, byte) in content.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return &content[start..=start + offset];
                }
            }
            _ => {}
        }
    }
    content
}

/// Which side of a reasoning marker a piece of streamed text fell on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Reasoning(String),
    Visible(String),
}

/// Incremental splitter for `<think>...</think>` style reasoning blocks.
///
/// Markers may arrive split across deltas, so a tail that could still grow
/// into a marker is held back until the next push or `finish`.
#[derive(Debug, Default)]
pub struct ReasoningSplitter {
    pending: String,
    closing: Option<&'static str>,
    reasoning: String,
    visible: String,
}

impl ReasoningSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns the segments that are now settled.
    pub fn push(&mut self, delta: &str) -> Vec<Segment> {
        self.pending.push_str(delta);
        let mut out = Vec::new();

        loop {
            match self.closing {
                Some(close) => {
                    if let Some(idx) = self.pending.find(close) {
                        let text: String = self.pending.drain(..idx).collect();
                        self.pending.drain(..close.len());
                        self.closing = None;
                        self.settle_reasoning(text, &mut out);
                        continue;
                    }
                    let keep = partial_suffix_len(&self.pending, &[close]);
                    let cut = self.pending.len() - keep;
                    let text: String = self.pending.drain(..cut).collect();
                    self.settle_reasoning(text, &mut out);
                    break;
                }
                None => {
                    let opener = REASONING_MARKERS
                        .iter()
                        .filter_map(|(open, close)| {
                            self.pending.find(open).map(|idx| (idx, *open, *close))
                        })
                        .min_by_key(|(idx, open, _)| (*idx, std::cmp::Reverse(open.len())));
                    if let Some((idx, open, close)) = opener {
                        let text: String = self.pending.drain(..idx).collect();
                        self.pending.drain(..open.len());
                        self.closing = Some(close);
                        self.settle_visible(text, &mut out);
                        continue;
                    }
                    let openers: Vec<&str> = REASONING_MARKERS.iter().map(|(o, _)| *o).collect();
                    let keep = partial_suffix_len(&self.pending, &openers);
                    let cut = self.pending.len() - keep;
                    let text: String = self.pending.drain(..cut).collect();
                    self.settle_visible(text, &mut out);
                    break;
                }
            }
        }
        out
    }

    /// Flush whatever is still held back. An unterminated reasoning block
    /// stays reasoning.
    pub fn finish(&mut self) -> Vec<Segment> {
        let text = std::mem::take(&mut self.pending);
        let mut out = Vec::new();
        if self.closing.is_some() {
            self.settle_reasoning(text, &mut out);
        } else {
            self.settle_visible(text, &mut out);
        }
        out
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn visible(&self) -> &str {
        &self.visible
    }

    fn settle_reasoning(&mut self, text: String, out: &mut Vec<Segment>) {
        if !text.is_empty() {
            self.reasoning.push_str(&text);
            out.push(Segment::Reasoning(text));
        }
    }

    fn settle_visible(&mut self, text: String, out: &mut Vec<Segment>) {
        if !text.is_empty() {
            self.visible.push_str(&text);
            out.push(Segment::Visible(text));
        }
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of any marker.
fn partial_suffix_len(text: &str, markers: &[&str]) -> usize {
    markers
        .iter()
        .flat_map(|marker| {
            (1..marker.len())
                .rev()
                .find(|&n| text.ends_with(&marker[..n]))
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_object() {
        let raw = r#"{"answer":"hi","keywords":[]}"#;
        assert_eq!(extract_json(raw), raw);
    }

    #[test]
    fn test_extract_is_idempotent() {
        let raw = "```json\n{\"a\": {\"b\": 1}}\n```";
        let once = extract_json(raw);
        assert_eq!(once, "{\"a\": {\"b\": 1}}");
        assert_eq!(extract_json(once), once);
    }

    #[test]
    fn test_extract_with_prose_around() {
        let raw = "Sure! Here you go: {\"answer\":\"x\"} hope that helps {";
        assert_eq!(extract_json(raw), "{\"answer\":\"x\"}");
    }

    #[test]
    fn test_extract_unbalanced_returns_content() {
        let raw = "  {\"answer\": \"x\"  ";
        assert_eq!(extract_json(raw), "{\"answer\": \"x\"");
    }

    #[test]
    fn test_extract_no_object() {
        assert_eq!(extract_json("```\nhello\n```"), "hello");
    }

    #[test]
    fn test_extract_balanced_braces_in_strings() {
        let raw = r#"{"answer":"use {x} here"}"#;
        assert_eq!(extract_json(raw), raw);
    }

    #[test]
    fn test_splitter_single_delta() {
        let mut s = ReasoningSplitter::new();
        let mut segs = s.push("<think>plan it</think>{\"answer\":1}");
        segs.extend(s.finish());
        assert_eq!(
            segs,
            vec![
                Segment::Reasoning("plan it".into()),
                Segment::Visible("{\"answer\":1}".into())
            ]
        );
        assert_eq!(s.reasoning(), "plan it");
        assert_eq!(s.visible(), "{\"answer\":1}");
    }

    #[test]
    fn test_splitter_markers_split_across_deltas() {
        let mut s = ReasoningSplitter::new();
        for delta in ["Hi <th", "ink>deep", " thought</thi", "nk> there"] {
            s.push(delta);
        }
        s.finish();
        assert_eq!(s.reasoning(), "deep thought");
        assert_eq!(s.visible(), "Hi  there");
    }

    #[test]
    fn test_splitter_long_marker_variant() {
        let mut s = ReasoningSplitter::new();
        s.push("<thinking>a</thinking>b");
        s.finish();
        assert_eq!(s.reasoning(), "a");
        assert_eq!(s.visible(), "b");
    }

    #[test]
    fn test_splitter_unterminated_reasoning() {
        let mut s = ReasoningSplitter::new();
        s.push("<think>never closed");
        s.finish();
        assert_eq!(s.reasoning(), "never closed");
        assert_eq!(s.visible(), "");
    }

    #[test]
    fn test_splitter_lone_angle_bracket_is_visible() {
        let mut s = ReasoningSplitter::new();
        let segs = s.push("a < b");
        assert_eq!(segs, vec![Segment::Visible("a < b".into())]);
        s.push("<");
        s.finish();
        assert_eq!(s.visible(), "a < b<");
    }
}
