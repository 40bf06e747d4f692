//! Utility functions for directory management and system integration
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and data storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Config: `~/.config/zonefw/` - `config.json`
//! - Data: `~/.local/share/zonefw/` - default textdir tree
//! - State: `~/.local/state/zonefw/` - log file
//!
//! # Example
//!
//! ```
//! use zonefw::utils::{get_data_dir, ensure_dirs};
//!
//! ensure_dirs().expect("Failed to create directories");
//!
//! if let Some(data_path) = get_data_dir() {
//!     let _textdir = data_path.join("textdir");
//! }
//! ```

use directories::ProjectDirs;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "zonefw", "zonefw")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        for dir in [get_config_dir(), get_data_dir(), get_state_dir()]
            .into_iter()
            .flatten()
        {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        for dir in [get_config_dir(), get_data_dir(), get_state_dir()]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}

/// Address snapshot of one kernel network device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInterface {
    pub device: String,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

/// Lists the devices the kernel currently reports, sorted by name.
///
/// Devices appear once per address family in the underlying listing; entries
/// are merged so every device shows up once with its first address of each
/// family. Returns an empty list when enumeration fails.
pub fn system_interfaces() -> Vec<SystemInterface> {
    let found = match NetworkInterface::show() {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut out: Vec<SystemInterface> = Vec::new();
    for iface in found {
        let idx = match out.iter().position(|s| s.device == iface.name) {
            Some(idx) => idx,
            None => {
                out.push(SystemInterface {
                    device: iface.name.clone(),
                    ipv4: None,
                    ipv6: None,
                });
                out.len() - 1
            }
        };
        let entry = &mut out[idx];
        for addr in &iface.addr {
            match addr {
                Addr::V4(v4) if entry.ipv4.is_none() => entry.ipv4 = Some(v4.ip),
                Addr::V6(v6) if entry.ipv6.is_none() => entry.ipv6 = Some(v6.ip),
                _ => {}
            }
        }
    }
    out.sort_by(|a, b| a.device.cmp(&b.device));
    out
}
