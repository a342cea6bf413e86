pub mod annotation;
pub mod node;
pub mod pod;
