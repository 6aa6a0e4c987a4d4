pub mod data;
pub mod errors;
pub mod objective;
pub mod searcher;
pub mod tree;

pub use data::{Dataset, Support};
pub use errors::TreeError;
pub use objective::{score, Objective};
pub use searcher::{SearchOutcome, Searcher};
pub use tree::Tree;
