//! Channel spec tokenizer and glob expansion
//!
//! A channel spec is mostly backend-opaque text, with one exception the
//! core understands: bracketed glob tokens. `[1-4]` is an inclusive
//! numeric range (ascending or descending), `[1,3,7]` an explicit
//! enumeration. A spec with globs denotes one concrete channel per
//! combination of glob values; [`ChannelSpec::render`] produces the i-th
//! combination with the rightmost glob varying fastest.

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
enum Glob {
    /// Inclusive range, possibly descending (`[9-4]`)
    Range { start: u64, end: u64 },
    /// Explicit value enumeration
    Values(Vec<u64>),
}

impl Glob {
    fn len(&self) -> usize {
        match self {
            Glob::Range { start, end } => (start.abs_diff(*end) + 1) as usize,
            Glob::Values(values) => values.len(),
        }
    }

    fn value(&self, index: usize) -> u64 {
        match self {
            Glob::Range { start, end } if start <= end => start + index as u64,
            Glob::Range { start, .. } => start - index as u64,
            Glob::Values(values) => values[index],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Glob(Glob),
}

/// A parsed channel spec: literal text interleaved with glob tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSpec {
    spec: String,
    segments: Vec<Segment>,
}

impl ChannelSpec {
    /// Tokenize a spec into literal and glob segments.
    ///
    /// Every `[` introduces a glob and its contents must be well-formed;
    /// a stray `]` outside a glob stays literal (the rest of the spec text
    /// belongs to the backend).
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let syntax = |reason: &str| ConfigError::GlobSyntax {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = spec;

        while let Some(open) = rest.find('[') {
            literal.push_str(&rest[..open]);
            let body_start = open + 1;
            let close = rest[body_start..]
                .find(']')
                .ok_or_else(|| syntax("unterminated glob"))?;
            let body = &rest[body_start..body_start + close];
            if body.contains('[') {
                return Err(syntax("nested glob"));
            }

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Glob(Self::parse_glob(body).map_err(|r| syntax(r))?));
            rest = &rest[body_start + close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            spec: spec.to_string(),
            segments,
        })
    }

    fn parse_glob(body: &str) -> Result<Glob, &'static str> {
        if body.is_empty() {
            return Err("empty glob");
        }
        let number = |text: &str| -> Result<u64, &'static str> {
            text.trim()
                .parse::<u64>()
                .map_err(|_| "glob values must be decimal numbers")
        };

        if body.contains(',') {
            let values = body
                .split(',')
                .map(number)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Glob::Values(values))
        } else if let Some((start, end)) = body.split_once('-') {
            Ok(Glob::Range {
                start: number(start)?,
                end: number(end)?,
            })
        } else {
            Ok(Glob::Values(vec![number(body)?]))
        }
    }

    /// The spec text this was parsed from.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Number of glob tokens.
    pub fn glob_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Glob(_)))
            .count()
    }

    /// Number of concrete channels this spec denotes: the product of all
    /// glob widths, 1 for a glob-free spec.
    pub fn channels(&self) -> usize {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Glob(glob) => Some(glob.len()),
                Segment::Literal(_) => None,
            })
            .product()
    }

    /// Render the i-th concrete spec, rightmost glob varying fastest.
    ///
    /// `index` must be below [`Self::channels`].
    pub fn render(&self, index: usize) -> String {
        debug_assert!(index < self.channels());

        // Decompose the index odometer-style, rightmost digit first.
        let mut digits = Vec::with_capacity(self.glob_count());
        let mut rem = index;
        for segment in self.segments.iter().rev() {
            if let Segment::Glob(glob) = segment {
                digits.push(rem % glob.len());
                rem /= glob.len();
            }
        }

        let mut out = String::with_capacity(self.spec.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Glob(glob) => {
                    let digit = digits.pop().expect("one digit per glob");
                    out.push_str(&glob.value(digit).to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(spec: &str) -> Vec<String> {
        let parsed = ChannelSpec::parse(spec).unwrap();
        (0..parsed.channels()).map(|i| parsed.render(i)).collect()
    }

    #[test]
    fn glob_free_spec_is_a_single_channel() {
        let spec = ChannelSpec::parse("cc.1.64").unwrap();
        assert_eq!(spec.glob_count(), 0);
        assert_eq!(spec.channels(), 1);
        assert_eq!(spec.render(0), "cc.1.64");
    }

    #[test]
    fn range_expands_in_order() {
        assert_eq!(expand("ch[1-4]"), ["ch1", "ch2", "ch3", "ch4"]);
    }

    #[test]
    fn descending_range_expands_downwards() {
        assert_eq!(expand("ch[3-1]"), ["ch3", "ch2", "ch1"]);
    }

    #[test]
    fn enumeration_expands_verbatim() {
        assert_eq!(expand("note[2,9,5]"), ["note2", "note9", "note5"]);
    }

    #[test]
    fn single_value_glob_is_allowed() {
        assert_eq!(expand("ch[7]"), ["ch7"]);
    }

    #[test]
    fn multiple_globs_expand_rightmost_fastest() {
        assert_eq!(
            expand("cc.[1-2].[10-11]"),
            ["cc.1.10", "cc.1.11", "cc.2.10", "cc.2.11"]
        );
        let spec = ChannelSpec::parse("cc.[1-2].[10-11]").unwrap();
        assert_eq!(spec.channels(), 4);
        assert_eq!(spec.glob_count(), 2);
    }

    #[test]
    fn literal_tail_after_glob_is_kept() {
        assert_eq!(expand("fader[1-2].value"), ["fader1.value", "fader2.value"]);
    }

    #[test]
    fn stray_closing_bracket_stays_literal() {
        assert_eq!(expand("weird]name"), ["weird]name"]);
    }

    #[test]
    fn unterminated_glob_is_rejected() {
        let err = ChannelSpec::parse("ch[1-4").unwrap_err();
        assert!(matches!(err, ConfigError::GlobSyntax { .. }), "{err}");
    }

    #[test]
    fn empty_glob_is_rejected() {
        assert!(ChannelSpec::parse("ch[]").is_err());
    }

    #[test]
    fn non_numeric_glob_is_rejected() {
        assert!(ChannelSpec::parse("ch[a-f]").is_err());
        assert!(ChannelSpec::parse("ch[1,x]").is_err());
        assert!(ChannelSpec::parse("ch[[1-2]]").is_err());
    }
}
