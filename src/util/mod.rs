// Utility modules

pub mod detect;
pub mod encode;
pub mod image_files;
pub mod temp_files;
