//! Patch value types: [`DiffOp`], [`Hunk`] and [`Patch`].
//!
//! All offsets and lengths count `char`s (Unicode scalar values).
//!
//! Text form (one header per hunk, one line per op):
//! ```text
//! @@ -7,5 +7,4 @@
//!  orld
//! -!
//! ```
//! Fragments are percent-escaped for `%`, `\n` and `\r` so every op stays on
//! a single line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PatchError;

/// One operation on a text fragment inside a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffOp {
    Keep(String),
    Insert(String),
    Delete(String),
}

impl DiffOp {
    pub fn text(&self) -> &str {
        match self {
            DiffOp::Keep(t) | DiffOp::Insert(t) | DiffOp::Delete(t) => t,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    /// Whether the fragment is part of the hunk's pre-image.
    pub fn in_source(&self) -> bool {
        matches!(self, DiffOp::Keep(_) | DiffOp::Delete(_))
    }

    /// Whether the fragment is part of the hunk's post-image.
    pub fn in_target(&self) -> bool {
        matches!(self, DiffOp::Keep(_) | DiffOp::Insert(_))
    }

    /// Insert and delete swap, keep stays.
    pub fn inverted(&self) -> DiffOp {
        match self {
            DiffOp::Keep(t) => DiffOp::Keep(t.clone()),
            DiffOp::Insert(t) => DiffOp::Delete(t.clone()),
            DiffOp::Delete(t) => DiffOp::Insert(t.clone()),
        }
    }

    fn prefix(&self) -> char {
        match self {
            DiffOp::Keep(_) => ' ',
            DiffOp::Insert(_) => '+',
            DiffOp::Delete(_) => '-',
        }
    }
}

/// A located, self-contained edit region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub source_start: usize,
    pub source_len: usize,
    pub target_start: usize,
    pub target_len: usize,
    pub ops: Vec<DiffOp>,
}

impl Hunk {
    /// Build a hunk from its ops, deriving both lengths.
    pub fn new(source_start: usize, target_start: usize, ops: Vec<DiffOp>) -> Self {
        let source_len = ops.iter().filter(|op| op.in_source()).map(DiffOp::char_len).sum();
        let target_len = ops.iter().filter(|op| op.in_target()).map(DiffOp::char_len).sum();
        Self {
            source_start,
            source_len,
            target_start,
            target_len,
            ops,
        }
    }

    /// The text this hunk expects to find (keep + delete fragments).
    pub fn source_text(&self) -> String {
        self.ops
            .iter()
            .filter(|op| op.in_source())
            .map(DiffOp::text)
            .collect()
    }

    /// The text this hunk leaves behind (keep + insert fragments).
    pub fn target_text(&self) -> String {
        self.ops
            .iter()
            .filter(|op| op.in_target())
            .map(DiffOp::text)
            .collect()
    }

    /// Net change in length once applied.
    pub fn length_delta(&self) -> isize {
        (self.target_len as isize).saturating_sub(self.source_len as isize)
    }

    pub fn inverted(&self) -> Hunk {
        Hunk {
            source_start: self.target_start,
            source_len: self.target_len,
            target_start: self.source_start,
            target_len: self.source_len,
            ops: self.ops.iter().map(DiffOp::inverted).collect(),
        }
    }

    /// The hunk with one side of its keep context dropped, leading side
    /// kept first.
    ///
    /// Each variant comes with the number of leading chars removed. Empty
    /// unless the hunk has non-empty keep context on both sides, so every
    /// variant is still anchored by the context it keeps.
    pub(crate) fn one_sided(&self) -> Vec<(usize, Hunk)> {
        let lead = match self.ops.first() {
            Some(DiffOp::Keep(t)) if !t.is_empty() => t.chars().count(),
            _ => return Vec::new(),
        };
        let anchored_tail = matches!(self.ops.last(), Some(DiffOp::Keep(t)) if !t.is_empty());
        if self.ops.len() < 3 || !anchored_tail {
            return Vec::new();
        }

        let keep_lead = self.ops[..self.ops.len() - 1].to_vec();
        let keep_tail = self.ops[1..].to_vec();
        vec![
            (0, Hunk::new(self.source_start, self.target_start, keep_lead)),
            (
                lead,
                Hunk::new(
                    self.source_start.saturating_add(lead),
                    self.target_start.saturating_add(lead),
                    keep_tail,
                ),
            ),
        ]
    }
}

/// Ordered hunks applied against one agreed-upon source text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    hunks: Vec<Hunk>,
}

impl Patch {
    pub fn new(hunks: Vec<Hunk>) -> Self {
        Self { hunks }
    }

    /// A patch that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    pub fn into_hunks(self) -> Vec<Hunk> {
        self.hunks
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hunks.len()
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hunk in &self.hunks {
            writeln!(
                f,
                "@@ -{},{} +{},{} @@",
                hunk.source_start, hunk.source_len, hunk.target_start, hunk.target_len
            )?;
            for op in &hunk.ops {
                writeln!(f, "{}{}", op.prefix(), escape(op.text()))?;
            }
        }
        Ok(())
    }
}

impl FromStr for Patch {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hunks = Vec::new();
        let mut current: Option<Hunk> = None;

        for (idx, line) in s.lines().enumerate() {
            let line_no = idx + 1;
            if line.starts_with("@@") {
                if let Some(hunk) = current.take() {
                    hunks.push(check_lengths(hunk, line_no - 1)?);
                }
                current = Some(parse_header(line, line_no)?);
                continue;
            }
            if line.is_empty() {
                continue;
            }
            let hunk = current
                .as_mut()
                .ok_or_else(|| PatchError::parse(line_no, "op line before first hunk header"))?;
            let mut chars = line.chars();
            let prefix = chars.next().unwrap_or(' ');
            let text = unescape(chars.as_str(), line_no)?;
            let op = match prefix {
                ' ' => DiffOp::Keep(text),
                '+' => DiffOp::Insert(text),
                '-' => DiffOp::Delete(text),
                other => {
                    return Err(PatchError::parse(line_no, format!("unknown op prefix {other:?}")))
                }
            };
            hunk.ops.push(op);
        }

        if let Some(hunk) = current {
            hunks.push(check_lengths(hunk, s.lines().count())?);
        }
        Ok(Patch::new(hunks))
    }
}

fn parse_header(line: &str, line_no: usize) -> Result<Hunk, PatchError> {
    let body = line
        .strip_prefix("@@ -")
        .and_then(|rest| rest.strip_suffix(" @@"))
        .ok_or_else(|| PatchError::parse(line_no, "malformed hunk header"))?;
    let (source, target) = body
        .split_once(" +")
        .ok_or_else(|| PatchError::parse(line_no, "missing target range"))?;
    let (source_start, source_len) = parse_range(source, line_no)?;
    let (target_start, target_len) = parse_range(target, line_no)?;
    Ok(Hunk {
        source_start,
        source_len,
        target_start,
        target_len,
        ops: Vec::new(),
    })
}

fn parse_range(range: &str, line_no: usize) -> Result<(usize, usize), PatchError> {
    let (start, len) = range
        .split_once(',')
        .ok_or_else(|| PatchError::parse(line_no, format!("range {range:?} has no length")))?;
    let start = start
        .parse()
        .map_err(|_| PatchError::parse(line_no, format!("bad offset {start:?}")))?;
    let len = len
        .parse()
        .map_err(|_| PatchError::parse(line_no, format!("bad length {len:?}")))?;
    Ok((start, len))
}

fn check_lengths(hunk: Hunk, line_no: usize) -> Result<Hunk, PatchError> {
    let derived = Hunk::new(hunk.source_start, hunk.target_start, hunk.ops);
    if derived.source_len != hunk.source_len || derived.target_len != hunk.target_len {
        return Err(PatchError::parse(
            line_no,
            format!(
                "hunk lengths -{},+{} do not match ops -{},+{}",
                hunk.source_len, hunk.target_len, derived.source_len, derived.target_len
            ),
        ));
    }
    Ok(derived)
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\n' => out.push_str("%0A"),
            '\r' => out.push_str("%0D"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(text: &str, line_no: usize) -> Result<String, PatchError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest
            .get(pos + 1..pos + 3)
            .ok_or_else(|| PatchError::parse(line_no, "truncated escape"))?;
        match code {
            "25" => out.push('%'),
            "0A" => out.push('\n'),
            "0D" => out.push('\r'),
            other => return Err(PatchError::parse(line_no, format!("unknown escape %{other}"))),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Patch {
        Patch::new(vec![Hunk::new(
            7,
            7,
            vec![
                DiffOp::Keep("orld".into()),
                DiffOp::Insert("!\n100%".into()),
            ],
        )])
    }

    #[test]
    fn test_hunk_lengths_derived_from_ops() {
        let hunk = Hunk::new(
            2,
            2,
            vec![
                DiffOp::Keep("ab".into()),
                DiffOp::Delete("cde".into()),
                DiffOp::Insert("X".into()),
                DiffOp::Keep("f".into()),
            ],
        );
        assert_eq!(hunk.source_len, 6);
        assert_eq!(hunk.target_len, 4);
        assert_eq!(hunk.source_text(), "abcdef");
        assert_eq!(hunk.target_text(), "abXf");
        assert_eq!(hunk.length_delta(), -2);
    }

    #[test]
    fn test_lengths_count_chars_not_bytes() {
        let hunk = Hunk::new(0, 0, vec![DiffOp::Insert("😊é".into())]);
        assert_eq!(hunk.target_len, 2);
    }

    #[test]
    fn test_hunk_inverted() {
        let hunk = Hunk::new(
            3,
            5,
            vec![DiffOp::Keep("a".into()), DiffOp::Delete("b".into())],
        );
        let inv = hunk.inverted();
        assert_eq!(inv.source_start, 5);
        assert_eq!(inv.target_start, 3);
        assert_eq!(inv.source_len, 1);
        assert_eq!(inv.target_len, 2);
        assert_eq!(inv.ops, vec![DiffOp::Keep("a".into()), DiffOp::Insert("b".into())]);
    }

    #[test]
    fn test_one_sided_variants() {
        let hunk = Hunk::new(
            10,
            10,
            vec![
                DiffOp::Keep("abcd".into()),
                DiffOp::Delete("X".into()),
                DiffOp::Keep("efgh".into()),
            ],
        );
        let variants = hunk.one_sided();
        assert_eq!(variants.len(), 2);

        let (lead, keep_lead) = &variants[0];
        assert_eq!(*lead, 0);
        assert_eq!(keep_lead.source_start, 10);
        assert_eq!(keep_lead.source_text(), "abcdX");

        let (lead, keep_tail) = &variants[1];
        assert_eq!(*lead, 4);
        assert_eq!(keep_tail.source_start, 14);
        assert_eq!(keep_tail.source_text(), "Xefgh");
        assert_eq!(keep_tail.target_text(), "efgh");
    }

    #[test]
    fn test_one_sided_needs_context_on_both_sides() {
        let bare = Hunk::new(0, 0, vec![DiffOp::Insert("x".into())]);
        assert!(bare.one_sided().is_empty());

        let lead_only = Hunk::new(
            0,
            0,
            vec![DiffOp::Keep("ab".into()), DiffOp::Delete("x".into())],
        );
        assert!(lead_only.one_sided().is_empty());

        let tail_only = Hunk::new(
            0,
            0,
            vec![DiffOp::Delete("x".into()), DiffOp::Keep("ab".into())],
        );
        assert!(tail_only.one_sided().is_empty());
    }

    #[test]
    fn test_text_form_escapes_newlines() {
        let text = sample().to_string();
        assert_eq!(text, "@@ -7,4 +7,10 @@\n orld\n+!%0A100%25\n");
        let parsed: Patch = text.parse().unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_parse_rejects_length_mismatch() {
        let err = "@@ -0,3 +0,1 @@\n a\n".parse::<Patch>().unwrap_err();
        assert!(matches!(err, PatchError::Parse { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        let err = "@@ 0,1 0,1 @@\n a\n".parse::<Patch>().unwrap_err();
        assert!(matches!(err, PatchError::Parse { line: 1, .. }));

        let err = " a\n".parse::<Patch>().unwrap_err();
        assert!(matches!(err, PatchError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_escape() {
        let err = "@@ -0,1 +0,1 @@\n %41\n".parse::<Patch>().unwrap_err();
        assert!(matches!(err, PatchError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_empty_patch_text() {
        assert_eq!(Patch::empty().to_string(), "");
        assert!("".parse::<Patch>().unwrap().is_empty());
    }
}
