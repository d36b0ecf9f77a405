pub mod artifact;
pub mod bytes;
