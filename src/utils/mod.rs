pub mod file;
pub mod hwmon;
