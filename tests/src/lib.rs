//! # Trellis Test Suite
//!
//! Unified test crate containing cross-crate integration flows.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Shared test extensions and helpers
//! └── integration/      # Cross-crate flows through a live hub
//!     ├── boot_flow.rs
//!     ├── response_flow.rs
//!     ├── rules_flow.rs
//!     └── shared_state_flow.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p trellis-tests
//!
//! # By category
//! cargo test -p trellis-tests integration::
//! ```

#![allow(dead_code)]

pub mod fixtures;
