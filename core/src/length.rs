//! Length expressions for fields and payload slots.
//!
//! A length is either a literal byte count (`"8"`)
//! or a reference to another field with an optional subtractor
//! (`"length"`, `"length-4"`).
//! Referenced lengths are solved in both directions:
//! at decode time the referenced header field carries the parameter
//! and the expression yields the payload byte count,
//! at encode time the payload byte count is known
//! and the expression yields the value to write into the header field.

use std::fmt;
use std::str::FromStr;

use snafu::{ensure, OptionExt, Snafu};

#[derive(Debug, Clone, Eq, PartialEq, Snafu)]
pub enum ParseLengthError {
    /// empty length expression
    Empty,

    #[snafu(display("length expression `{}` refers to more than one field", expression))]
    MultipleReferences { expression: String },

    #[snafu(display("invalid field name `{}` in length expression", name))]
    InvalidReference { name: String },
}

/// A field length in bytes,
/// either static or resolved through another field.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Length {
    /// A literal byte count.
    Static(usize),
    /// The value of the named field, minus `subtractor` bytes.
    Ref { field: String, subtractor: u64 },
}

impl Length {
    /// Create a length referring to another field without a subtractor.
    pub fn reference(field: impl Into<String>) -> Self {
        Length::Ref {
            field: field.into(),
            subtractor: 0,
        }
    }

    /// Whether this length is a literal byte count.
    pub fn is_static(&self) -> bool {
        matches!(self, Length::Static(_))
    }

    /// The literal byte count, if static.
    pub fn static_value(&self) -> Option<usize> {
        match self {
            Length::Static(n) => Some(*n),
            Length::Ref { .. } => None,
        }
    }

    /// The name of the referenced field, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Length::Static(_) => None,
            Length::Ref { field, .. } => Some(field),
        }
    }

    /// Solve the byte count from the referenced field's value
    /// (decode direction: the header says `parameter`,
    /// the slot holds `parameter - subtractor` bytes).
    ///
    /// Saturates at zero if the parameter is below the subtractor.
    pub fn solve_value(&self, parameter: u64) -> u64 {
        match self {
            Length::Static(n) => *n as u64,
            Length::Ref { subtractor, .. } => parameter.saturating_sub(*subtractor),
        }
    }

    /// Solve the referenced field's value from the byte count
    /// (encode direction: the slot holds `value` bytes,
    /// the header must say `value + subtractor`).
    pub fn solve_parameter(&self, value: u64) -> u64 {
        match self {
            Length::Static(n) => *n as u64,
            Length::Ref { subtractor, .. } => value + *subtractor,
        }
    }
}

impl FromStr for Length {
    type Err = ParseLengthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ensure!(!s.is_empty(), EmptySnafu);

        if let Ok(n) = s.parse::<usize>() {
            return Ok(Length::Static(n));
        }

        match s.split_once('-') {
            None => {
                ensure!(is_identifier(s), InvalidReferenceSnafu { name: s });
                Ok(Length::Ref {
                    field: s.to_string(),
                    subtractor: 0,
                })
            }
            Some((field, subtractor)) => {
                let field = field.trim();
                let subtractor = subtractor.trim();
                ensure!(is_identifier(field), InvalidReferenceSnafu { name: field });
                // a second identifier after `-` would make the expression ambiguous
                let subtractor = subtractor
                    .parse::<u64>()
                    .ok()
                    .context(MultipleReferencesSnafu { expression: s })?;
                Ok(Length::Ref {
                    field: field.to_string(),
                    subtractor,
                })
            }
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Static(n) => write!(f, "{}", n),
            Length::Ref {
                field,
                subtractor: 0,
            } => f.write_str(field),
            Length::Ref { field, subtractor } => write!(f, "{}-{}", field, subtractor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;

    #[test]
    fn static_length() {
        let length: Length = "5".parse().unwrap();
        assert!(length.is_static());
        assert_eq!(length.static_value(), Some(5));
        assert_eq!(length.field(), None);
    }

    #[test]
    fn reference_without_subtractor() {
        let length: Length = "length".parse().unwrap();
        assert!(!length.is_static());
        assert_eq!(length.field(), Some("length"));
        assert_eq!(length.solve_value(18), 18);
        assert_eq!(length.solve_parameter(18), 18);
    }

    #[test]
    fn reference_with_subtractor() {
        let length: Length = "length-8".parse().unwrap();
        assert_eq!(length.field(), Some("length"));
        assert_eq!(length.solve_value(18), 10);
        assert_eq!(length.solve_parameter(10), 18);
    }

    #[test]
    fn only_one_reference_allowed() {
        let err = "length-messageId".parse::<Length>().unwrap_err();
        assert_matches!(err, ParseLengthError::MultipleReferences { .. });
    }

    #[test]
    fn solving_round_trips() {
        let length: Length = "len-4".parse().unwrap();
        for n in [0_u64, 1, 9, 1024, u32::MAX as u64] {
            assert_eq!(length.solve_value(length.solve_parameter(n)), n);
        }
    }

    #[test]
    fn display_round_trips() {
        for expr in ["12", "length", "length-8"] {
            let length: Length = expr.parse().unwrap();
            assert_eq!(length.to_string(), expr);
        }
    }
}
