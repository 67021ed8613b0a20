use std::collections::BTreeMap;

use log::{debug, warn};

use crate::alloc::error::InvariantViolation;
use crate::alloc::packet::{Addr, MemCmd, PortId};
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockEntry {
    owner: PortId,
    acquired_at: Cycle,
}

/// Outcome of checking a transaction against the lock table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCheck {
    /// No live lock stands in the way.
    Free,
    /// An LL/SC access hit a live lock held by another port.
    Blocked { owner: PortId },
    /// The lock on this address was dropped; ports parked on locks may retry.
    Released,
}

impl LockCheck {
    pub fn is_blocked(self) -> bool {
        matches!(self, LockCheck::Blocked { .. })
    }
}

/// Load-linked reservations keyed by exact address.
#[derive(Debug)]
pub struct AddressLockTable {
    timeout: Cycle,
    entries: BTreeMap<Addr, LockEntry>,
}

impl AddressLockTable {
    pub fn new(timeout: Cycle) -> Self {
        assert!(timeout > 0, "lock timeout must be > 0");
        Self {
            timeout,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn holder(&self, addr: Addr) -> Option<PortId> {
        self.entries.get(&addr).map(|entry| entry.owner)
    }

    fn expired(&self, entry: &LockEntry, now: Cycle) -> bool {
        now.saturating_sub(entry.acquired_at) >= self.timeout
    }

    /// Check `cmd` from `port` against the lock on `addr`.
    ///
    /// Only an LL/SC access to a live lock owned by another port is blocked. An expired lock, or
    /// any store-type access, removes the entry.
    pub fn is_locked_against(
        &mut self,
        addr: Addr,
        port: PortId,
        now: Cycle,
        cmd: MemCmd,
    ) -> LockCheck {
        let Some(entry) = self.entries.get(&addr).copied() else {
            return LockCheck::Free;
        };
        let expired = self.expired(&entry, now);
        if cmd.is_llsc() && entry.owner != port && !expired {
            warn!(
                "port {}: {:?} @ {:#x} hits a lock held by port {}",
                port, cmd, addr, entry.owner
            );
            return LockCheck::Blocked { owner: entry.owner };
        }
        if expired || cmd.is_exclusive() {
            debug!("lock on {:#x} (port {}) released", addr, entry.owner);
            self.entries.remove(&addr);
            return LockCheck::Released;
        }
        LockCheck::Free
    }

    /// Register a load-linked lock. Re-acquiring a live lock by its owner is a no-op.
    pub fn acquire(&mut self, addr: Addr, port: PortId, now: Cycle) -> Result<(), InvariantViolation> {
        match self.entries.get(&addr).copied() {
            Some(entry) if !self.expired(&entry, now) => {
                if entry.owner != port {
                    return Err(InvariantViolation::LockOwnerMismatch {
                        addr,
                        owner: entry.owner,
                        port,
                    });
                }
                Ok(())
            }
            _ => {
                self.entries.insert(
                    addr,
                    LockEntry {
                        owner: port,
                        acquired_at: now,
                    },
                );
                Ok(())
            }
        }
    }

    /// Drop every lock whose timeout has elapsed. Returns how many were dropped.
    pub fn expire(&mut self, now: Cycle) -> usize {
        let timeout = self.timeout;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.acquired_at) < timeout);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_port_load_locked_blocks_until_timeout() {
        let mut table = AddressLockTable::new(30);
        table.acquire(0x100, 0, 10).unwrap();
        assert_eq!(
            LockCheck::Blocked { owner: 0 },
            table.is_locked_against(0x100, 1, 39, MemCmd::LoadLocked)
        );
        assert_eq!(
            LockCheck::Released,
            table.is_locked_against(0x100, 1, 40, MemCmd::LoadLocked)
        );
        assert!(table.is_empty());
    }

    #[test]
    fn store_conditional_from_non_owner_blocks() {
        let mut table = AddressLockTable::new(30);
        table.acquire(0x100, 0, 0).unwrap();
        assert!(table
            .is_locked_against(0x100, 2, 5, MemCmd::StoreCond)
            .is_blocked());
        assert_eq!(Some(0), table.holder(0x100));
    }

    #[test]
    fn owner_store_conditional_releases() {
        let mut table = AddressLockTable::new(30);
        table.acquire(0x100, 0, 0).unwrap();
        assert_eq!(
            LockCheck::Released,
            table.is_locked_against(0x100, 0, 5, MemCmd::StoreCond)
        );
        assert_eq!(None, table.holder(0x100));
    }

    #[test]
    fn plain_write_releases_and_read_passes() {
        let mut table = AddressLockTable::new(30);
        table.acquire(0x40, 3, 0).unwrap();
        assert_eq!(LockCheck::Free, table.is_locked_against(0x40, 1, 2, MemCmd::Read));
        assert_eq!(Some(3), table.holder(0x40));
        assert_eq!(
            LockCheck::Released,
            table.is_locked_against(0x40, 1, 3, MemCmd::Write)
        );
        assert_eq!(LockCheck::Free, table.is_locked_against(0x40, 1, 4, MemCmd::LoadLocked));
    }

    #[test]
    fn reacquire_by_owner_keeps_original_timestamp() {
        let mut table = AddressLockTable::new(10);
        table.acquire(0x8, 1, 0).unwrap();
        table.acquire(0x8, 1, 5).unwrap();
        assert_eq!(1, table.expire(10));
    }

    #[test]
    fn acquire_against_live_foreign_lock_fails() {
        let mut table = AddressLockTable::new(10);
        table.acquire(0x8, 1, 0).unwrap();
        assert_eq!(
            Err(InvariantViolation::LockOwnerMismatch {
                addr: 0x8,
                owner: 1,
                port: 2
            }),
            table.acquire(0x8, 2, 3)
        );
        assert!(table.acquire(0x8, 2, 10).is_ok());
        assert_eq!(Some(2), table.holder(0x8));
    }

    #[test]
    fn expire_sweeps_only_stale_entries() {
        let mut table = AddressLockTable::new(5);
        table.acquire(0x0, 0, 0).unwrap();
        table.acquire(0x4, 1, 3).unwrap();
        assert_eq!(0, table.expire(4));
        assert_eq!(1, table.expire(5));
        assert_eq!(Some(1), table.holder(0x4));
        assert_eq!(1, table.expire(8));
        assert!(table.is_empty());
    }
}
