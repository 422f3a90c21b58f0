//! paperless-courier — unattended document-routing relay.
//!
//! Polls a paperless-style document backend for items flagged for outbound
//! delivery, matches them against configured rules, renders per-rule
//! templates, composes MIME messages and delivers them over SMTP, then
//! marks each item processed on the backend.

pub mod backend;
pub mod config;
pub mod error;
pub mod mime;
pub mod relay;
pub mod rules;
pub mod smtp;
pub mod template;
