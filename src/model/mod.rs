//! Model schemas, mutation events and query predicates

mod mutation;
mod predicate;
mod schema;

pub use mutation::{MutationEvent, MutationType};
pub use predicate::{Pagination, QueryOperator, QueryPredicate, QueryRequest};
pub use schema::{FieldType, Model, ModelField, ModelRegistry, ModelSchema, SchemaRef};
