pub mod digest;
pub mod local;
pub mod translate;
