//! `casm_errors` provides basic features to declare human-understandable
//! errors, along with diagnostics.
//!
//! First off, `casm_errors` provides the [`error!`] macro that helps to
//! declare types that implement [`std::error::Error`], and also derive
//! [`thiserror::Error`] and [`miette::Diagnostic`]. The macro helps to define
//! error code, message, formatted message, help, and the route of the error
//! in a structured report sink: a category name plus a category-local
//! numeric code, retrievable from the generated `route` method. It
//! automatically generates documentation, with intra-links to the
//! [`Diagnostics`] type. As an example, see the [`Error`] type that is built
//! with this macro!
//!
//! The second feature provided by `casm_errors` is [`Diagnostics`]. When an
//! error has a code, e.g. `E004`, it can be used to further explain an error
//! with `casm --explain E004`, à la `rustc`. That's almost the same
//! mechanism. But the diagnostics are also part of the documentation itself,
//! check for example [`Diagnostics::E004`]. There is 2 ways to get the
//! detailed diagnostics based on error code.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

mod error_codes;

#[cfg(doc)]
pub use error_codes::Diagnostics;
#[cfg(feature = "diagnostics")]
pub use error_codes::DIAGNOSTICS;
pub use miette::Result;

#[doc(hidden)]
#[macro_export]
macro_rules! as_item {
    ($item:item) => {
        $item
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! link_error_code {
    ($error_code:ident) => {
        concat!(
            "[`",
            stringify!($error_code),
            "`](casm_errors::Diagnostics::",
            stringify!($error_code),
            ")."
        )
    };
}

/// Use this macro to declare a type that acts like a human-understable error,
/// with diagnostics and an optional report-sink route per variant.
///
/// # Example
///
/// An example is better than a long text:
///
/// ```rust
/// use casm_errors::error;
///
/// error! {
///     pub enum Error {
///         #[code = E000]
///         #[route = parser:7]
///         #[message = "The given error code is invalid."]
///         #[formatted_message("`{0}` is not a valid error code.")]
///         #[help = "Did you mistype the error code?"]
///         InvalidCode(String),
///
///         #[message = "Something else went wrong."]
///         #[help = "Sorry."]
///         Other,
///     }
/// }
///
/// # fn main() {
/// let error = Error::InvalidCode("xyz".to_string());
///
/// // Get the error as a string.
/// assert_eq!(
///     error.to_string(),
///     "`xyz` is not a valid error code.".to_string()
/// );
///
/// // Get the route of the error in a structured report sink: the category
/// // name, and the category-local numeric code.
/// assert_eq!(error.route(), Some(("parser", 7)));
/// assert_eq!(Error::Other.route(), None);
///
/// // Get more information on the errors, via `miette`.
///
/// use miette::Diagnostic;
///
/// assert_eq!(
///     error.code().map(|code| code.to_string()),
///     Some("E000".to_string())
/// );
/// assert_eq!(
///     error.help().map(|help| help.to_string()),
///     Some("Did you mistype the error code?".to_string())
/// );
/// # }
/// ```
///
/// This create an `Error` enum type, with an `InvalidCode` tuple variant.
/// This newly created `Error` enum type implements [`thiserror::Error`] and
/// [`miette::Diagnostic`], and carries an inherent `route` method.
///
/// # Syntax
///
/// So far, the macro only supports an `enum` declaration, no `struct` yet.
/// `enum` supports variant, or tuple variant only.
///
/// Each variant can have the following attributes:
///
/// * `#[cfg(…)]` (optional),
/// * `#[code = E...]` to define the error code (optional),
/// * `#[route = category:code]` to define where the error lands in a
///   structured report sink: a lowercase category identifier and a
///   category-local numeric code (optional); the generated
///   `route(&self) -> Option<(&'static str, u32)>` method returns it,
/// * `#[message = "…"]` to define a literal string message; it will be used
///   as documentation.
/// * `#[formatted_message("format {0} {}", .0.accessor)]` to define a
///   “dynamic” string message; it will be used for the [`std::fmt::Display`]
///   implementation, and follows the same rules as the `#[error(…)]`
///   attribute of [`thiserror`] (optional).
/// * `#[help = "…"]` to define a help, a hint, a tip, to drive the user to a
///   solution; note that this is mandatory.
///
/// Alternatively, it is possible to annotate a variant with `#[cfg(…)]`
/// (optional), `#[route = …]` (optional) and `#[transparent]`, which makes
/// the variant “transparent” and forwards everything to the first tuple item
/// of the variant. Note that tuple items can use the same [`thiserror`]
/// attributes, like `#[from]`.
///
/// ```rust
/// use casm_errors::error;
///
/// error! {
///     pub enum Error {
///         #[transparent]
///         Other(#[from] std::io::Error),
///     }
/// }
/// ```
///
/// A variant under `#[cfg(…)]` must not carry a `#[route = …]`: the route
/// arm is not `cfg`-gated.
#[macro_export]
macro_rules! error {
    // Error declaration with a static literal message.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        $( #[cfg( $cfg:meta )] )*
        $( #[code = $error_code:ident] )?
        $( #[route = $route_category:ident : $route_code:literal] )?
        #[message = $error_message:expr]
        #[help = $error_help:literal]
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*

                $(
                    #[doc = concat!("Error code: ", $crate::link_error_code!($error_code))]
                    #[doc = "\n"]
                )?
                #[doc = $error_message]
                #[error($error_message)]
                #[diagnostic(
                    $( code($error_code), )?
                    help($error_help),
                )]
                $( #[cfg( $cfg )] )*
            ]
            [ $( $routes )* ]
            @route( $( ($route_category, $route_code) )? )
            $( $tail )*
        }
    };

    // Error declaration with a dynamic message.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        $( #[cfg( $cfg:meta )] )*
        $( #[code = $error_code:ident] )?
        $( #[route = $route_category:ident : $route_code:literal] )?
        #[message = $error_message:expr]
        #[formatted_message( $error_message_format:literal $( , . $error_message_arguments:expr )* $( , )* )]
        #[help = $error_help:literal]
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*

                $(
                    #[doc = concat!("Error code: ", $crate::link_error_code!($error_code))]
                    #[doc = "\n"]
                )?
                #[doc = $error_message]
                #[error( $error_message_format $( , . $error_message_arguments ),* )]
                #[diagnostic(
                    $( code($error_code), )?
                    help($error_help),
                )]
                $( #[cfg( $cfg )] )*
            ]
            [ $( $routes )* ]
            @route( $( ($route_category, $route_code) )? )
            $( $tail )*
        }
    };

    // Transparent error, with a route.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        $( #[cfg( $cfg:meta )] )*
        #[route = $route_category:ident : $route_code:literal]
        #[ $transparent:tt ]
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*

                #[doc = "Transparent error. Please see the inner fields."]
                #[error($transparent)]
                $( #[cfg( $cfg )] )*
            ]
            [ $( $routes )* ]
            @route( ($route_category, $route_code) )
            $( $tail )*
        }
    };

    // Transparent error, without a route.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        $( #[cfg( $cfg:meta )] )*
        #[ $transparent:tt ]
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*

                #[doc = "Transparent error. Please see the inner fields."]
                #[error($transparent)]
                $( #[cfg( $cfg )] )*
            ]
            [ $( $routes )* ]
            @route()
            $( $tail )*
        }
    };

    // Unit variant, with a pending route.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        @route( $( ( $route_category:ident, $route_code:literal ) )? )
        $variant_name:ident ,
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*
                $variant_name,
            ]
            [
                $( $routes )*
                $( ( $variant_name $route_category $route_code ) )?
            ]
            $( $tail )*
        }
    };

    // Unit variant, without any preceding attributes.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        $variant_name:ident ,
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*
                $variant_name,
            ]
            [ $( $routes )* ]
            $( $tail )*
        }
    };

    // Tuple variant, with a pending route.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        @route( $( ( $route_category:ident, $route_code:literal ) )? )
        $variant_name:ident (
            $(
                $( #[ $field_meta:meta ] )*
                $field_visibility:vis $field_type:ty
            ),*
            $( , )?
        ) ,
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*
                $variant_name (
                    $(
                        $( #[ $field_meta ] )*
                        $field_visibility $field_type,
                    )*
                ) ,
            ]
            [
                $( $routes )*
                $( ( $variant_name $route_category $route_code ) )?
            ]
            $( $tail )*
        }
    };

    // Tuple variant, without any preceding attributes.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( $routes:tt )* ]
        $variant_name:ident (
            $(
                $( #[ $field_meta:meta ] )*
                $field_visibility:vis $field_type:ty
            ),*
            $( , )?
        ) ,
        $( $tail:tt )*
    ) => {
        error! {
            @variant
            $error_name
            [ $( $declaration )* ]
            [
                $( $accumulator )*
                $variant_name (
                    $(
                        $( #[ $field_meta ] )*
                        $field_visibility $field_type,
                    )*
                ) ,
            ]
            [ $( $routes )* ]
            $( $tail )*
        }
    };

    // End point.
    (
        @variant
        $error_name:ident
        [ $( $declaration:tt )* ]
        [ $( $accumulator:tt )* ]
        [ $( ( $route_variant:ident $route_category:ident $route_code:literal ) )* ]
    ) => {
        $crate::as_item! {
            $( $declaration )* {
                $( $accumulator )*
            }
        }

        impl $error_name {
            /// The route of this failure in a structured report sink: the
            /// category name and the category-local numeric code, for
            /// variants declared with a `#[route = category:code]` attribute.
            #[allow(unreachable_patterns)]
            pub fn route(&self) -> ::core::option::Option<(&'static str, u32)> {
                match self {
                    $(
                        Self::$route_variant { .. } => ::core::option::Option::Some((
                            stringify!($route_category),
                            $route_code,
                        )),
                    )*
                    _ => ::core::option::Option::None,
                }
            }
        }
    };

    // Entry point.
    (
        $( #[doc = $documentation:expr ] )*
        $visibility:vis enum $error_name:ident {
            $( $variants:tt )*
        }
    ) => {
        error! {
            @variant
            $error_name
            [
                $( #[doc = $documentation ] )*
                #[derive(Debug, thiserror::Error, miette::Diagnostic)]
                $visibility enum $error_name
            ]
            []
            []
            $( $variants )*
        }
    };
}

// The `error!` macro generates links to `casm_errors::Diagnostics::E...`. To
// avoid having a warning, since this `Error` type below is living inside
// `casm_errors` itself, a new alias is created from `crate` to `casm_errors`,
// and tadaa, no more warning.
#[cfg(doc)]
use crate as casm_errors;

error! {
    #[doc = "Error type for this crate."]
    #[doc = "\n"]
    #[doc = "The major interests of this type is its `Self::explain` method that can be"]
    #[doc = "used to fetch the diagnostic of a particular error code."]
    pub enum Error {
        #[code = E000]
        #[message = "The given error code is invalid."]
        #[formatted_message("`{0}` is not a valid error code.")]
        #[help = "Did you mistype the error code? The pattern is `E[0-9]{{3}}`, i.e. an `E` followed by 3 digits, such as `E000`."]
        InvalidCode(String),

    }
}

impl Error {
    /// Given a specific error code, this method returns the associated
    /// diagnostic, if the error exists.
    ///
    /// ```
    /// use casm_errors::Error;
    ///
    /// # fn main() {
    /// // Explain a valid error.
    /// assert!(Error::explain("E000").is_ok());
    ///
    /// // Explain an invalid error.
    /// assert!(Error::explain("oops").is_err());
    /// # }
    /// ```
    #[cfg(feature = "diagnostics")]
    pub fn explain(error_code: &str) -> Result<&'static str, Self> {
        DIAGNOSTICS
            .iter()
            .find_map(
                |(current_error_code, diagnostic)| {
                    if *current_error_code == error_code {
                        Some(*diagnostic)
                    } else {
                        None
                    }
                },
            )
            .ok_or(Self::InvalidCode(error_code.to_owned()))
    }
}
