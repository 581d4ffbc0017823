use anyhow::Result;
use rand::rngs::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct TestFixtures {
    temp_dir: TempDir,
}

impl TestFixtures {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn create_test_script(&self, name: &str, content: &str) -> Result<PathBuf> {
        let script_path = self.temp_dir.path().join(name);
        std::fs::write(&script_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms)?;
        }

        Ok(script_path)
    }

    pub fn create_test_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let file_path = self.temp_dir.path().join(name);
        std::fs::write(&file_path, content)?;
        Ok(file_path)
    }

    /// Write a fresh Ed25519 key pair as `name` and `name.pub`
    pub fn create_test_keys(&self, name: &str) -> Result<(PathBuf, PathBuf)> {
        let private_path = self.temp_dir.path().join(name);
        let public_path = self.temp_dir.path().join(format!("{name}.pub"));

        let key = generate_key()?;
        key.write_openssh_file(&private_path, LineEnding::LF)?;
        std::fs::write(&public_path, authorized_key_line(&key)?)?;

        Ok((private_path, public_path))
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}

pub fn generate_key() -> Result<PrivateKey> {
    Ok(PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?)
}

/// The public half in authorized_keys format
pub fn authorized_key_line(key: &PrivateKey) -> Result<String> {
    Ok(key.public_key().to_openssh()?)
}

// Common test data
pub mod data {
    pub const MALFORMED_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAA!!broken!! mallory@nowhere";

    /// `window-change` payload: width, height, then pixel fields
    pub fn window_change(width: u32, height: u32, pixels: [u32; 2]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(16);
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&pixels[0].to_be_bytes());
        payload.extend_from_slice(&pixels[1].to_be_bytes());
        payload
    }

    /// `pty-req` payload with an empty mode list
    pub fn pty_request(term: &str, width: u32, height: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(term.len() as u32).to_be_bytes());
        payload.extend_from_slice(term.as_bytes());
        payload.extend_from_slice(&width.to_be_bytes());
        payload.extend_from_slice(&height.to_be_bytes());
        payload.extend_from_slice(&[0u8; 8]);
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.push(0);
        payload
    }
}
