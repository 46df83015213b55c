//! The nom vocabulary the wire types parse with, re-exported in one place.

pub use nom::{
    bytes::complete::take,
    error::{ErrorKind, ParseError},
    sequence::tuple,
    Err,
};
