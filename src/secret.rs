use rand::RngCore;
use std::fs;
use std::io;
use std::path::Path;

const SECRET_FILE_NAME: &str = ".jwt_secret";
const SECRET_LEN: usize = 32;

/// Load the process signing secret from `<data>/.jwt_secret`, generating a
/// fresh 32-byte key when the file is missing or shorter than 32 bytes.
/// The same bytes back both session tokens and signed pointer URLs.
pub fn load_or_generate(data_dir: &Path) -> io::Result<Vec<u8>> {
    let full_path = data_dir.join(SECRET_FILE_NAME);

    if let Ok(secret) = fs::read(&full_path) {
        if secret.len() >= SECRET_LEN {
            log::info!("Loaded signing secret from {:?}", full_path);
            return Ok(secret);
        }
        log::warn!("Signing secret at {:?} is too short, regenerating", full_path);
    } else {
        log::warn!("Signing secret not found, generating a new one...");
    }

    let mut secret = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);

    fs::create_dir_all(data_dir)?;
    fs::write(&full_path, &secret)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&full_path, fs::Permissions::from_mode(0o600))?;
    }

    log::info!("Generated and saved a new signing secret at {:?}", full_path);
    Ok(secret)
}
