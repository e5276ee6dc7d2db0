pub mod classification;
pub mod entry;
