//! Domain model: field schema, resource values, table trees and feedback.

pub mod feedback;
pub mod resource;
pub mod schema;
pub mod table_tree;

pub use feedback::Feedback;
pub use table_tree::{SqlValue, TableTree};
