//! Placeholder template rendering.
//!
//! Substitution walks a single token table, so adding a token is a table
//! edit. Token strings are disjoint, which makes the traversal order
//! irrelevant to the result. A token whose entity lookup fails stays
//! verbatim in the output and is reported back to the caller.

use crate::backend::types::Document;
use crate::backend::Snapshot;

/// Everything a template can draw on for one document.
pub struct RenderContext<'a> {
    pub document: &'a Document,
    pub snapshot: &'a Snapshot,
    pub instance_url: &'a str,
    pub use_custom_filename: bool,
}

/// Render output plus the token classes that could not be resolved.
pub struct Rendered {
    pub text: String,
    pub unresolved: Vec<&'static str>,
}

type Resolver = fn(&RenderContext<'_>) -> Option<String>;

/// The fixed token vocabulary. Entity-backed tokens resolve to `None` on a
/// lookup miss (or a null reference) and are left verbatim.
const TOKENS: &[(&str, Resolver)] = &[
    ("%document_id%", |ctx| Some(ctx.document.id.to_string())),
    ("%document_title%", |ctx| Some(ctx.document.title.clone())),
    ("%document_filename%", |ctx| {
        Some(ctx.document.file_name(ctx.use_custom_filename))
    }),
    ("%document_url%", |ctx| {
        Some(ctx.document.details_url(ctx.instance_url))
    }),
    ("%created_date%", |ctx| ctx.document.created_at.clone()),
    ("%modified_date%", |ctx| ctx.document.modified_at.clone()),
    ("%correspondent%", |ctx| {
        ctx.document
            .correspondent_id
            .and_then(|id| ctx.snapshot.correspondent(id))
            .map(|c| c.name.clone())
    }),
    ("%document_type%", |ctx| {
        ctx.document
            .document_type_id
            .and_then(|id| ctx.snapshot.document_type(id))
            .map(|d| d.name.clone())
    }),
    ("%storage_path%", |ctx| {
        ctx.document
            .storage_path_id
            .and_then(|id| ctx.snapshot.storage_path(id))
            .map(|s| s.name.clone())
    }),
    ("%owner_name%", |ctx| {
        ctx.document
            .owner_id
            .and_then(|id| ctx.snapshot.user(id))
            .map(|u| u.username.clone())
    }),
];

/// Render `global` (or `override_template`, which replaces it entirely when
/// non-empty) against the context.
pub fn render(
    global: &str,
    override_template: Option<&str>,
    ctx: &RenderContext<'_>,
) -> Rendered {
    let template = match override_template {
        Some(t) if !t.is_empty() => t,
        _ => global,
    };

    let mut text = template.to_string();
    let mut unresolved = Vec::new();
    for (token, resolve) in TOKENS {
        if !text.contains(token) {
            continue;
        }
        match resolve(ctx) {
            Some(value) => text = text.replace(token, &value),
            None => unresolved.push(*token),
        }
    }

    Rendered { text, unresolved }
}
