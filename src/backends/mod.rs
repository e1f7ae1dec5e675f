//! Backend layer
//!
//! Turns a transformed [`Program`](crate::middle::Program) into target source.
//! There is a single target today: C code for CPython extension modules.
//!
//! # Architecture
//!
//! ```text
//! Program (after the middle-end)
//!         |
//!         v
//!    c::generate_program
//!         |
//!    +----+------------+-----------+
//!    |                 |           |
//! functions        classes     wrappers
//!    |                 |           |
//!    +----+------------+-----------+
//!         |
//!         v
//!   Vec<CFile> (one per module)
//! ```

pub mod c;

pub use c::{generate_module, generate_program, CFile};
