pub mod expander;
pub mod resolver;
pub mod similarity;

// Re-export public types
pub use expander::QueryExpander;
pub use resolver::RecommendationResolver;
