//! Pipeline stages for gazette record extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap the table-extraction backend without touching record logic.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ grid ──▶ normalize ──▶ segment ──▶ fields
//! (URL/path) (tables) (cell text)  (blocks)    (records)
//!                                     ▲
//!                                 identifier
//! ```
//!
//! 1. [`input`]      - canonicalise the user-supplied path or URL to a local file
//! 2. [`grid`]       - obtain raw table grids per page; runs in `spawn_blocking`
//!    because both built-in sources block on a process or a file
//! 3. [`normalize`]  - deterministic cell-text cleanup
//! 4. [`identifier`] - the registration-number grammar used to find anchors
//! 5. [`segment`]    - group rows into one block per student
//! 6. [`fields`]     - map a block's tokens to typed subject marks

pub mod fields;
pub mod grid;
pub mod identifier;
pub mod input;
pub mod normalize;
pub mod segment;
