//! Utility tools exposed next to the chat services.

pub mod calculator;

pub use calculator::{CalcError, evaluate};
