//! Test attribute that fails an async test once it exceeds a wall-clock budget.
//!
//! `#[tokio_timeout_test]`, `#[tokio_timeout_test(5)]` and
//! `#[tokio_timeout_test(5, paused)]` run an async test on a fresh
//! current-thread runtime; `paused` starts that runtime with the clock frozen
//! so interval and fade timings advance deterministically.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct TimeoutArgs {
    secs: u64,
    paused: bool,
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs {
            secs: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };
        if input.is_empty() {
            return Ok(args);
        }
        if input.peek(LitInt) {
            let lit: LitInt = input.parse()?;
            args.secs = lit.base10_parse()?;
            if args.secs == 0 {
                return Err(syn::Error::new(lit.span(), "timeout must be greater than zero"));
            }
            if input.is_empty() {
                return Ok(args);
            }
            input.parse::<Token![,]>()?;
        }
        let flag: Ident = input.parse()?;
        if flag != "paused" {
            return Err(syn::Error::new(flag.span(), "expected `paused`"));
        }
        args.paused = true;
        if !input.is_empty() {
            return Err(input.error("unexpected tokens after `paused`"));
        }
        Ok(args)
    }
}

/// Runs `body` on a helper thread and waits at most `secs` for it.
fn watchdog(secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let timeout_duration = std::time::Duration::from_secs(#secs);
        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| #body));
            let _ = sender.send(result);
        });
        match receiver.recv_timeout(timeout_duration) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread failed before reporting result")
            }
        }
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_path(attr, &["tokio", "test"]))
        .collect();

    let secs = args.secs;
    let start_paused = if args.paused {
        quote! { .start_paused(true) }
    } else {
        quote! {}
    };
    let body = watchdog(
        secs,
        quote! {{
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                #start_paused
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(std::time::Duration::from_secs(#secs), async move #block)
                    .await
                    .expect("test timed out");
            });
        }},
    );

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            #body
        }
    })
}

fn is_path(attr: &Attribute, expected: &[&str]) -> bool {
    let segments: Vec<_> = attr.path().segments.iter().collect();
    segments.len() == expected.len()
        && segments
            .iter()
            .zip(expected)
            .all(|(segment, name)| segment.ident == *name)
}
