pub mod metadata;
pub use metadata::{
    AttributeMetadata,
    AttributeType,
    EntityMetadata,
    ManyToManyRelationship,
    MetadataProvider,
    StaticMetadata,
};

pub mod parser;
pub mod fetch;
pub mod compiler;
pub mod executor;

pub use compiler::{CompileError, CompileOptions, CompiledQuery, QueryCompiler};
