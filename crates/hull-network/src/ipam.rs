//! Bitmap IPv4 address allocator.
//!
//! Every subnet is tracked as a string of `'0'` (free) and `'1'` (taken)
//! characters, one per address in the subnet, keyed by the subnet's CIDR
//! with host bits cleared. Bit `i` stands for address `network + i + 1`.
//! The whole table is stored as one JSON object and rewritten under an
//! exclusive lock on every change.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use hull_common::error::{HullError, Result};
use hull_common::lock::FileLock;
use ipnetwork::Ipv4Network;

/// Shortest prefix accepted; longer bitmaps are not worth persisting as text.
pub const MIN_PREFIX: u8 = 16;

const FREE: char = '0';
const TAKEN: char = '1';

type Table = BTreeMap<String, String>;

/// File-backed subnet allocator.
#[derive(Debug, Clone)]
pub struct Ipam {
    path: PathBuf,
    lock_path: PathBuf,
}

impl Ipam {
    /// Allocator persisting its table at `path`.
    ///
    /// The lock file sits next to it with a `.lock` suffix.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock = OsString::from(path.as_os_str());
        lock.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock),
        }
    }

    /// Path of the persisted table.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes the lowest free address in `subnet`.
    ///
    /// The network and broadcast addresses are never returned.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::AddressExhausted`] when every usable address is
    /// taken, [`HullError::InvalidInput`] for prefixes shorter than
    /// [`MIN_PREFIX`], or an I/O or serialization error for the table.
    pub fn allocate(&self, subnet: &Ipv4Network) -> Result<Ipv4Addr> {
        let subnet = normalize(subnet)?;
        let _lock = FileLock::acquire(&self.lock_path)?;
        let mut table = self.load()?;

        let key = subnet.to_string();
        let size = bitmap_len(subnet);
        let bitmap = table
            .entry(key.clone())
            .or_insert_with(|| FREE.to_string().repeat(size));
        check_len(&key, bitmap, size)?;

        let usable = size.saturating_sub(2);
        let index = bitmap
            .char_indices()
            .take(usable)
            .find(|&(_, c)| c == FREE)
            .map(|(i, _)| i)
            .ok_or_else(|| HullError::AddressExhausted {
                subnet: key.clone(),
            })?;
        bitmap.replace_range(index..=index, &TAKEN.to_string());

        let address = address_at(subnet, index);
        self.dump(&table)?;
        tracing::debug!(subnet = %key, address = %address, "address allocated");
        Ok(address)
    }

    /// Returns `address` to the free pool of `subnet`.
    ///
    /// Yields `false` (and logs a warning) if the address was not allocated.
    ///
    /// # Errors
    ///
    /// Returns [`HullError::InvalidInput`] when `address` is not a usable
    /// host address of `subnet`, or an I/O or serialization error for the
    /// table.
    pub fn release(&self, subnet: &Ipv4Network, address: Ipv4Addr) -> Result<bool> {
        let subnet = normalize(subnet)?;
        let key = subnet.to_string();
        let size = bitmap_len(subnet);
        let index = index_of(subnet, address)
            .filter(|&i| i < size.saturating_sub(2))
            .ok_or_else(|| HullError::InvalidInput {
                message: format!("{address} is not a host address of {key}"),
            })?;

        let _lock = FileLock::acquire(&self.lock_path)?;
        let mut table = self.load()?;
        let Some(bitmap) = table.get_mut(&key) else {
            tracing::warn!(subnet = %key, address = %address, "release in untracked subnet");
            return Ok(false);
        };
        check_len(&key, bitmap, size)?;
        if bitmap.chars().nth(index) == Some(FREE) {
            tracing::warn!(subnet = %key, address = %address, "address was not allocated");
            return Ok(false);
        }
        bitmap.replace_range(index..=index, &FREE.to_string());
        self.dump(&table)?;
        tracing::debug!(subnet = %key, address = %address, "address released");
        Ok(true)
    }

    /// Returns the raw bitmap tracked for `subnet`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    pub fn bitmap(&self, subnet: &Ipv4Network) -> Result<Option<String>> {
        let key = normalize(subnet)?.to_string();
        let _lock = FileLock::acquire(&self.lock_path)?;
        Ok(self.load()?.remove(&key))
    }

    fn load(&self) -> Result<Table> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Table::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Table::new()),
            Err(e) => Err(HullError::io(&self.path, e)),
        }
    }

    fn dump(&self, table: &Table) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HullError::io(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(table)?).map_err(|e| HullError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| HullError::io(&self.path, e))
    }
}

/// Clears the host bits of `subnet` and rejects oversized prefixes.
fn normalize(subnet: &Ipv4Network) -> Result<Ipv4Network> {
    if subnet.prefix() < MIN_PREFIX {
        return Err(HullError::InvalidInput {
            message: format!("subnet {subnet} is larger than /{MIN_PREFIX}"),
        });
    }
    Ipv4Network::new(subnet.network(), subnet.prefix()).map_err(|e| HullError::InvalidInput {
        message: format!("invalid subnet {subnet}: {e}"),
    })
}

fn bitmap_len(subnet: Ipv4Network) -> usize {
    1usize << (32 - u32::from(subnet.prefix()))
}

fn check_len(key: &str, bitmap: &str, size: usize) -> Result<()> {
    if bitmap.len() == size && bitmap.chars().all(|c| c == FREE || c == TAKEN) {
        Ok(())
    } else {
        Err(HullError::InvalidState {
            message: format!("corrupt allocation bitmap for {key}"),
        })
    }
}

fn address_at(subnet: Ipv4Network, index: usize) -> Ipv4Addr {
    let offset = u32::try_from(index).unwrap_or(u32::MAX);
    Ipv4Addr::from(u32::from(subnet.network()) + offset + 1)
}

fn index_of(subnet: Ipv4Network, address: Ipv4Addr) -> Option<usize> {
    if !subnet.contains(address) {
        return None;
    }
    let offset = u32::from(address).checked_sub(u32::from(subnet.network()))?;
    usize::try_from(offset.checked_sub(1)?).ok()
}
