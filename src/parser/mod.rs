pub mod cursor;
pub use cursor::*;

pub mod parse_error;
pub use parse_error::*;

pub mod ast;
