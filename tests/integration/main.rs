//! Integration tests for the scanning core.
//!
//! Every collaborator is an in-memory or mock implementation, so the
//! suite is deterministic and needs no network or database.

mod mocks;
mod outcomes;
mod regime;
mod scan;
