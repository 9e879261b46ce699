//! Built-in trap libraries.

pub mod graphics;
pub mod math;
