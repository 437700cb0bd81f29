pub mod adapter;
pub mod expression;
pub mod external;
pub mod scoring;
