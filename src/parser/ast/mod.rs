pub mod operators;
pub use operators::*;

pub mod literal;
pub use literal::*;

pub mod scalar;
pub use scalar::*;

pub mod predicate;
pub use predicate::*;

pub mod table_ref;
pub use table_ref::*;

pub mod query_spec;
pub use query_spec::*;

pub mod statement;
pub use statement::*;
