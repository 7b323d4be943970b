// Install-scoped device id used as the attribution identity when no SDK
// supplies one. Format: "stillwater-<uuid>"

use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use super::data_dir;

const DEVICE_ID_FILE: &str = "device_id.txt";
const DEVICE_ID_PREFIX: &str = "stillwater-";

/// Error type for device ID operations
#[derive(Debug, thiserror::Error)]
pub enum DeviceIdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device ID format: {0}")]
    InvalidFormat(String),
}

/// Get or create the device ID stored in `dir`.
///
/// The first call writes a fresh id; later calls return the same one.
pub fn get_or_create_device_id_at(dir: &Path) -> Result<String, DeviceIdError> {
    let device_id_path = dir.join(DEVICE_ID_FILE);

    if device_id_path.exists() {
        let device_id = fs::read_to_string(&device_id_path)?.trim().to_string();
        return if device_id.starts_with(DEVICE_ID_PREFIX) {
            Ok(device_id)
        } else {
            Err(DeviceIdError::InvalidFormat(device_id))
        };
    }

    let device_id = format!("{}{}", DEVICE_ID_PREFIX, Uuid::new_v4());

    fs::create_dir_all(dir)?;
    let mut file = fs::File::create(&device_id_path)?;
    writeln!(file, "{}", device_id)?;

    Ok(device_id)
}

/// Get or create the device ID in the default data directory.
pub fn get_or_create_device_id() -> Result<String, DeviceIdError> {
    get_or_create_device_id_at(&data_dir()?)
}
