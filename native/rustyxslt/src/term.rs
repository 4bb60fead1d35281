//! Elixir Term Conversion Utilities
//!
//! Encodes results and errors for the host. Errors always take the shape
//! `{:error, {kind, message}}` with `kind` one of the five taxonomy atoms.

use rustler::{Binary, Encoder, Env, NewBinary, Term};

use crate::api::HandleCounts;
use crate::error::{Result, XsltError};
use crate::lifecycle::RegistryStats;

// Pre-defined atoms for efficiency - created once at compile time
rustler::atoms! {
    ok,
    error,
    invalid_argument,
    parse_failure,
    compile_failure,
    apply_failure,
    allocation_failure,
    documents,
    stylesheets,
    live,
    registered,
    released,
}

/// `{:ok, value}`
pub fn ok_term<'a, T: Encoder>(env: Env<'a>, value: T) -> Term<'a> {
    (ok(), value).encode(env)
}

/// `{:error, {kind, message}}`
pub fn error_term<'a>(env: Env<'a>, err: &XsltError) -> Term<'a> {
    log::debug!("returning {}: {}", err.kind(), err.message());
    let kind = match err {
        XsltError::InvalidArgument(_) => invalid_argument(),
        XsltError::ParseFailure(_) => parse_failure(),
        XsltError::CompileFailure(_) => compile_failure(),
        XsltError::ApplyFailure(_) => apply_failure(),
        XsltError::AllocationFailure(_) => allocation_failure(),
    };
    (error(), (kind, str_to_binary(env, err.message()))).encode(env)
}

/// Copy a string into a fresh binary
pub fn str_to_binary<'a>(env: Env<'a>, s: &str) -> Term<'a> {
    let bytes = s.as_bytes();
    let mut binary = NewBinary::new(env, bytes.len());
    binary.as_mut_slice().copy_from_slice(bytes);
    binary.into()
}

/// Decode the transform parameter list: a list of UTF-8 binaries
pub fn decode_params<'a>(term: Term<'a>) -> Result<Vec<&'a str>> {
    let items: Vec<Binary<'a>> = term
        .decode()
        .map_err(|_| XsltError::invalid_argument("parameters must be a list of binaries"))?;
    let mut params = Vec::new();
    params.try_reserve_exact(items.len())?;
    for (i, item) in items.iter().enumerate() {
        let s = std::str::from_utf8(item.as_slice())
            .map_err(|_| XsltError::invalid_argument(format!("parameter at position {} is not valid UTF-8", i)))?;
        params.push(s);
    }
    Ok(params)
}

fn stats_term<'a>(env: Env<'a>, stats: RegistryStats) -> Term<'a> {
    let pairs = [
        (live().encode(env), stats.live.encode(env)),
        (registered().encode(env), stats.registered.encode(env)),
        (released().encode(env), stats.released.encode(env)),
    ];
    Term::map_from_pairs(env, &pairs).unwrap_or_else(|_| error().encode(env))
}

/// `%{documents: %{live: .., registered: .., released: ..}, stylesheets: ...}`
pub fn handle_counts_term<'a>(env: Env<'a>, counts: HandleCounts) -> Term<'a> {
    let pairs = [
        (documents().encode(env), stats_term(env, counts.documents)),
        (stylesheets().encode(env), stats_term(env, counts.stylesheets)),
    ];
    Term::map_from_pairs(env, &pairs).unwrap_or_else(|_| error().encode(env))
}
