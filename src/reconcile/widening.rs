//! Type transitions the reconciler may apply automatically
//!
//! A transition is a widening only if every value of the old type is
//! representable, unchanged, in the new one. Anything not listed here is
//! reported as drift:
//!
//! | From              | To                                        |
//! |-------------------|-------------------------------------------|
//! | Integer{n}        | Integer{m}, m > n                         |
//! | Integer{n}        | Decimal{p,s} with p - s >= digits(n)      |
//! | Integer{2 or 4}   | Float                                     |
//! | Integer{2}        | Real                                      |
//! | Real              | Float                                     |
//! | Decimal{p,s}      | Decimal{p',s'}, s' >= s, p'-s' >= p-s     |
//! | Text{n}           | Text{m}, m > n, or unbounded Text         |
//! | FixedText{n}      | FixedText{m}, m > n                       |
//! | Binary{n}         | Binary{m}, m > n, or unbounded Binary     |
//!
//! `digits(2) = 5`, `digits(4) = 10`, `digits(8) = 19`. Fixed to variable
//! text and date to timestamp are not widenings: padding and time-of-day
//! semantics change.

use crate::models::LogicalType;

/// Decimal digits needed to hold every value of an integer width
fn integer_digits(bytes: u8) -> u32 {
    match bytes {
        2 => 5,
        4 => 10,
        _ => 19,
    }
}

/// Whether `from -> to` is a proven-safe widening
pub fn is_widening(from: &LogicalType, to: &LogicalType) -> bool {
    use LogicalType::*;

    match (*from, *to) {
        (Integer { bytes: a }, Integer { bytes: b }) => b > a,
        (Integer { bytes }, Decimal { precision, scale }) => {
            precision.saturating_sub(scale) >= integer_digits(bytes)
        }
        (Integer { bytes }, Float) => bytes <= 4,
        (Integer { bytes }, Real) => bytes <= 2,
        (Real, Float) => true,
        (
            Decimal {
                precision: p1,
                scale: s1,
            },
            Decimal {
                precision: p2,
                scale: s2,
            },
        ) => {
            (p1, s1) != (p2, s2)
                && s2 >= s1
                && p2.saturating_sub(s2) >= p1.saturating_sub(s1)
        }
        (Text { max_length: Some(a) }, Text { max_length: Some(b) }) => b > a,
        (Text { max_length: Some(_) }, Text { max_length: None }) => true,
        (FixedText { length: a }, FixedText { length: b }) => b > a,
        (Binary { max_length: Some(a) }, Binary { max_length: Some(b) }) => b > a,
        (Binary { max_length: Some(_) }, Binary { max_length: None }) => true,
        _ => false,
    }
}

/// Whether `from -> to` loses range or precision (the reverse of a widening)
pub fn is_narrowing(from: &LogicalType, to: &LogicalType) -> bool {
    is_widening(to, from)
}
