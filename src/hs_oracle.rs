//! Version readings for convergence checks.
//!
//! The controller never reads `current_version` directly when deciding
//! convergence; it asks a `VersionOracle`. `DirectOracle` is the centralised
//! global read used by the simulation. A decentralised reading (each peer
//! polling its neighbours) plugs in here without touching phase logic.

use crate::hs_interface::{PeerHandle, Version};
use crate::hs_registry::PeerRegistry;

pub trait VersionOracle {
    /// Version a peer currently reports. `None` means the peer does not
    /// participate (the rendezvous center), never "version zero".
    fn version_of(&self, registry: &PeerRegistry, peer: PeerHandle) -> Option<Version>;

    /// Highest reported version over `peers`, 0 when nothing contributes.
    ///
    /// Versions start at 1, so 0 doubles as "no data yet".
    fn max_version(&self, registry: &PeerRegistry, peers: &[PeerHandle]) -> Version {
        peers
            .iter()
            .filter_map(|peer| self.version_of(registry, *peer))
            .max()
            .unwrap_or(0)
    }

    /// Lowest non-zero reported version over `peers`, 0 when nothing contributes
    fn min_version(&self, registry: &PeerRegistry, peers: &[PeerHandle]) -> Version {
        peers
            .iter()
            .filter_map(|peer| self.version_of(registry, *peer))
            .filter(|version| *version > 0)
            .min()
            .unwrap_or(0)
    }
}

/// Reads each peer's true version straight from the registry
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectOracle;

impl VersionOracle for DirectOracle {
    fn version_of(&self, registry: &PeerRegistry, peer: PeerHandle) -> Option<Version> {
        if registry.is_center(peer) {
            return None;
        }
        registry.current_version(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hs_interface::{GridPos, RoleFlags};

    #[test]
    fn test_center_does_not_participate() {
        let mut reg = PeerRegistry::new(GridPos::new(2, 2), 1, 15);
        let center = reg.register_with_version(12, GridPos::new(2, 2), RoleFlags::PLAIN, 14).unwrap();
        let plain = reg.register_with_version(0, GridPos::new(0, 0), RoleFlags::PLAIN, 3).unwrap();

        let oracle = DirectOracle;
        assert_eq!(oracle.version_of(&reg, center), None);
        assert_eq!(oracle.version_of(&reg, plain), Some(3));

        // the center's 14 must not leak into the fold
        assert_eq!(oracle.max_version(&reg, &[center, plain]), 3);
    }

    #[test]
    fn test_empty_sets_fold_to_zero() {
        let reg = PeerRegistry::new(GridPos::new(2, 2), 1, 15);
        let oracle = DirectOracle;
        assert_eq!(oracle.max_version(&reg, &[]), 0);
        assert_eq!(oracle.min_version(&reg, &[]), 0);
    }

    #[test]
    fn test_min_and_max_over_pivots() {
        let mut reg = PeerRegistry::new(GridPos::new(2, 2), 1, 15);
        reg.register_with_version(1, GridPos::new(1, 2), RoleFlags::PIVOT, 12).unwrap();
        reg.register_with_version(2, GridPos::new(2, 1), RoleFlags::PIVOT, 7).unwrap();
        reg.register_with_version(3, GridPos::new(3, 2), RoleFlags::PIVOT, 9).unwrap();

        let oracle = DirectOracle;
        let pivots = reg.pivots().to_vec();
        assert_eq!(oracle.max_version(&reg, &pivots), 12);
        assert_eq!(oracle.min_version(&reg, &pivots), 7);
    }
}
