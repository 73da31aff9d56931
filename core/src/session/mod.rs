//! Session establishment and per-message encryption
//!
//! Both types borrow the caller's store for the duration of one call
//! sequence. Callers must not run two of them for the same address at
//! once.

mod builder;
mod cipher;

pub use builder::SessionBuilder;
pub use cipher::SessionCipher;

#[cfg(test)]
mod tests;
