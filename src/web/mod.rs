//! JSON/HTTP remote-command layer. Maps 1:1 onto the control and scheduler
//! accessor surfaces; carries no decision logic of its own.

pub mod api;
pub mod models;
