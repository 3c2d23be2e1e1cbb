//! Procedural macros shared by headerchain tests.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Error, ItemFn, LitStr};

/// Run a test with a log subscriber installed for its duration.
///
/// Accepts an optional level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`) and defaults to
/// `DEBUG`. Output goes through the test writer, so it is only shown for failing tests.
///
/// The expansion refers to `tracing` and `tracing_subscriber`, which must be available to
/// the calling crate (usually as dev-dependencies).
///
/// # Example
/// ```rust,ignore
/// use headerchain_macros::test_traced;
///
/// #[test_traced("INFO")]
/// fn test_info_level() {
///     tracing::info!("shown");
///     tracing::debug!("filtered");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let log_level = if attr.is_empty() {
        quote! { tracing::Level::DEBUG }
    } else {
        let level = parse_macro_input!(attr as LitStr);
        match level.value().to_uppercase().as_str() {
            "TRACE" => quote! { tracing::Level::TRACE },
            "DEBUG" => quote! { tracing::Level::DEBUG },
            "INFO" => quote! { tracing::Level::INFO },
            "WARN" => quote! { tracing::Level::WARN },
            "ERROR" => quote! { tracing::Level::ERROR },
            _ => {
                return Error::new_spanned(
                    level,
                    "invalid log level, expected one of TRACE, DEBUG, INFO, WARN, ERROR",
                )
                .to_compile_error()
                .into();
            }
        }
    };

    let attrs = input.attrs;
    let vis = input.vis;
    let sig = input.sig;
    let block = input.block;

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let subscriber = tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(#log_level)
                .with_line_number(true)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .finish();
            let dispatcher = tracing::Dispatch::new(subscriber);

            // Scope the subscriber to this test so parallel tests do not share it
            tracing::dispatcher::with_default(&dispatcher, || #block)
        }
    };
    TokenStream::from(expanded)
}
