use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{config::PortRange, LeaderError, LeaderResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A free list over one port range. The lowest free port is handed out first.
#[derive(Debug, Clone)]
pub struct PortPool {
    name: &'static str,
    range: PortRange,
    used: BTreeSet<u16>,
}

/// The three ports a machine is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortAssignment {
    /// Public port tunnelled to the guest's SSH port.
    pub remote: u16,

    /// Host port forwarded to the guest's game port.
    pub local_forward: u16,

    /// Public port tunnelled to the guest's game port.
    pub game_remote: u16,
}

/// Allocates a [`PortAssignment`] from three non-overlapping pools.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    remote: PortPool,
    local_forward: PortPool,
    game_remote: PortPool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PortPool {
    /// Creates an empty pool named `name` for error messages.
    pub fn new(name: &'static str, range: PortRange) -> Self {
        Self {
            name,
            range,
            used: BTreeSet::new(),
        }
    }

    /// Claims the lowest free port.
    pub fn allocate(&mut self) -> LeaderResult<u16> {
        let port = self
            .range
            .ports()
            .find(|p| !self.used.contains(p))
            .ok_or(LeaderError::AllocationExhausted { pool: self.name })?;

        self.used.insert(port);
        Ok(port)
    }

    /// Returns a port to the pool. Ports outside the range or not in use are ignored.
    pub fn release(&mut self, port: u16) -> bool {
        self.used.remove(&port)
    }

    /// Returns `true` if `port` is currently handed out.
    pub fn is_used(&self, port: u16) -> bool {
        self.used.contains(&port)
    }

    /// Number of ports in use.
    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    /// The pool's range.
    pub fn range(&self) -> PortRange {
        self.range
    }
}

impl PortAllocator {
    /// Creates the three pools. Fails if any two ranges overlap.
    pub fn new(remote: PortRange, local_forward: PortRange, game_remote: PortRange) -> LeaderResult<Self> {
        let named = [
            ("remote", remote),
            ("local forward", local_forward),
            ("game remote", game_remote),
        ];
        for (i, (name_a, a)) in named.iter().enumerate() {
            for (name_b, b) in &named[i + 1..] {
                if a.overlaps(b) {
                    return Err(LeaderError::InvalidPortRange(format!(
                        "{name_a} range {a} overlaps {name_b} range {b}"
                    )));
                }
            }
        }

        Ok(Self {
            remote: PortPool::new("remote port", remote),
            local_forward: PortPool::new("local forward port", local_forward),
            game_remote: PortPool::new("game port", game_remote),
        })
    }

    /// Claims one port from each pool. Nothing stays claimed if any pool is exhausted.
    pub fn allocate(&mut self) -> LeaderResult<PortAssignment> {
        let remote = self.remote.allocate()?;

        let local_forward = match self.local_forward.allocate() {
            Ok(port) => port,
            Err(e) => {
                self.remote.release(remote);
                return Err(e);
            }
        };

        let game_remote = match self.game_remote.allocate() {
            Ok(port) => port,
            Err(e) => {
                self.remote.release(remote);
                self.local_forward.release(local_forward);
                return Err(e);
            }
        };

        Ok(PortAssignment {
            remote,
            local_forward,
            game_remote,
        })
    }

    /// Returns all three ports to their pools.
    pub fn release(&mut self, ports: &PortAssignment) {
        self.remote.release(ports.remote);
        self.local_forward.release(ports.local_forward);
        self.game_remote.release(ports.game_remote);
    }

    /// The remote (SSH) pool.
    pub fn remote(&self) -> &PortPool {
        &self.remote
    }

    /// The local forwarding pool.
    pub fn local_forward(&self) -> &PortPool {
        &self.local_forward
    }

    /// The game remote pool.
    pub fn game_remote(&self) -> &PortPool {
        &self.game_remote
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
