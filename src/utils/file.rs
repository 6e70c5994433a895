use std::fs::File;
use std::io::Read;
use std::path::Path;

// Read arbitrary string data.
pub fn get_file_line(file: &Path, capacity: usize) -> Option<String> {
    let mut reader = String::with_capacity(capacity);
    let mut f = File::open(file).ok()?;
    f.read_to_string(&mut reader).ok()?;
    reader.truncate(reader.trim_end().len());
    Some(reader)
}

/// Designed at first for reading an `i64` or `u64`
/// from a sysfs file (`/sys/class/hwmon`, `/sys/class/power_supply`).
pub fn read_number_from_file<N>(file: &Path) -> Option<N>
where
    N: std::str::FromStr,
{
    let mut reader = [0u8; 32];
    let mut f = File::open(file).ok()?;
    let n = f.read(&mut reader).ok()?;
    // parse and trim would complain about `\0`.
    let number = &reader[..n];
    let number = std::str::from_utf8(number).ok()?;
    let number = number.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    number.parse().ok()
}
