use indexmap::IndexMap;
use log::{info, warn};
use rand::Rng;

use crate::hs_error::RegistryError;
use crate::hs_interface::{GridPos, NodeId, PeerHandle, Role, RoleFlags, Version};

// ============================================================================
// Grid Layout
// ============================================================================

/// Derives role flags from grid coordinates.
///
/// The center is `(rows / 2, cols / 2)`. Cells on the center row or center
/// column within `pivot_radius` of the center are pivots, the rest of that
/// cross are points, everything else is plain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: u32,
    pub cols: u32,
    pub pivot_radius: u32,
}

impl GridLayout {
    pub fn new(rows: u32, cols: u32, pivot_radius: u32) -> Self {
        Self {
            rows,
            cols,
            pivot_radius,
        }
    }

    pub fn center(&self) -> GridPos {
        GridPos::new(self.rows / 2, self.cols / 2)
    }

    pub fn is_center(&self, pos: GridPos) -> bool {
        pos == self.center()
    }

    pub fn flags_for(&self, pos: GridPos) -> RoleFlags {
        let center = self.center();
        let distance = if pos == center {
            return RoleFlags::PLAIN;
        } else if pos.row == center.row {
            pos.col.abs_diff(center.col)
        } else if pos.col == center.col {
            pos.row.abs_diff(center.row)
        } else {
            return RoleFlags::PLAIN;
        };

        if distance <= self.pivot_radius {
            RoleFlags::PIVOT
        } else {
            RoleFlags::POINT
        }
    }

    /// All cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = GridPos> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| GridPos::new(row, col)))
    }
}

// ============================================================================
// Peer
// ============================================================================

/// A registered peer. Versions are only written through the registry's
/// crate-private mutators.
#[derive(Debug, Clone)]
pub struct Peer {
    node: NodeId,
    pos: GridPos,
    name: String,
    role: Role,
    initial_version: Version,
    current_version: Version,
    arrived_at_center: bool,
    sync_completed: bool,
}

impl Peer {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn pos(&self) -> GridPos {
        self.pos
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn initial_version(&self) -> Version {
        self.initial_version
    }

    pub fn current_version(&self) -> Version {
        self.current_version
    }

    pub fn arrived_at_center(&self) -> bool {
        self.arrived_at_center
    }

    pub fn sync_completed(&self) -> bool {
        self.sync_completed
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Arena of peers, indexed by `PeerHandle`, insertion order preserved
pub struct PeerRegistry {
    center: GridPos,
    version_min: Version,
    version_max: Version,
    peers: IndexMap<NodeId, Peer>,
    points: Vec<PeerHandle>,
    pivots: Vec<PeerHandle>,
}

impl PeerRegistry {
    /// `version_min..=version_max` is the range initial versions are sampled from
    pub fn new(center: GridPos, version_min: Version, version_max: Version) -> Self {
        Self {
            center,
            version_min,
            version_max,
            peers: IndexMap::new(),
            points: Vec::new(),
            pivots: Vec::new(),
        }
    }

    /// Register a node with a freshly sampled initial version
    pub fn register<R: Rng + ?Sized>(
        &mut self,
        node: NodeId,
        pos: GridPos,
        flags: RoleFlags,
        rng: &mut R,
    ) -> Result<PeerHandle, RegistryError> {
        self.check(node, pos, flags)?;
        let version = rng.gen_range(self.version_min..=self.version_max);
        self.insert(node, pos, flags, version)
    }

    /// Register a node with an explicit initial version
    pub fn register_with_version(
        &mut self,
        node: NodeId,
        pos: GridPos,
        flags: RoleFlags,
        version: Version,
    ) -> Result<PeerHandle, RegistryError> {
        self.check(node, pos, flags)?;
        self.insert(node, pos, flags, version)
    }

    fn check(&self, node: NodeId, pos: GridPos, flags: RoleFlags) -> Result<Role, RegistryError> {
        if self.peers.contains_key(&node) {
            return Err(RegistryError::DuplicatePeer { node });
        }
        if pos == self.center && (flags.point || flags.pivot) {
            return Err(RegistryError::CenterRole { pos });
        }
        match (flags.point, flags.pivot) {
            (true, true) => Err(RegistryError::InvalidRole { pos }),
            (true, false) => Ok(Role::Point),
            (false, true) => Ok(Role::Pivot),
            (false, false) => Ok(Role::Plain),
        }
    }

    fn insert(
        &mut self,
        node: NodeId,
        pos: GridPos,
        flags: RoleFlags,
        version: Version,
    ) -> Result<PeerHandle, RegistryError> {
        let role = self.check(node, pos, flags)?;
        let peer = Peer {
            node,
            pos,
            name: format!("Node-{}-{}", pos.row, pos.col),
            role,
            initial_version: version,
            current_version: version,
            arrived_at_center: false,
            sync_completed: false,
        };

        info!(
            "[REGISTER] {}{} initialVersion={}",
            peer.name,
            match role {
                Role::Plain => "",
                Role::Point => " [POINT]",
                Role::Pivot => " [PIVOT]",
            },
            version
        );

        let (index, _) = self.peers.insert_full(node, peer);
        let handle = PeerHandle(index);
        match role {
            Role::Point => self.points.push(handle),
            Role::Pivot => self.pivots.push(handle),
            Role::Plain => {}
        }

        Ok(handle)
    }

    pub fn peer(&self, handle: PeerHandle) -> Option<&Peer> {
        self.peers.get_index(handle.0).map(|(_, peer)| peer)
    }

    pub fn handle_of(&self, node: NodeId) -> Option<PeerHandle> {
        self.peers.get_index_of(&node).map(PeerHandle)
    }

    pub fn points(&self) -> &[PeerHandle] {
        &self.points
    }

    pub fn pivots(&self) -> &[PeerHandle] {
        &self.pivots
    }

    pub fn all(&self) -> impl Iterator<Item = PeerHandle> + '_ {
        (0..self.peers.len()).map(PeerHandle)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn center(&self) -> GridPos {
        self.center
    }

    pub fn is_center(&self, handle: PeerHandle) -> bool {
        self.peer(handle).map_or(false, |peer| peer.pos == self.center)
    }

    /// Raw current version, without the oracle's participation rules
    pub fn current_version(&self, handle: PeerHandle) -> Option<Version> {
        self.peer(handle).map(|peer| peer.current_version)
    }

    fn peer_mut(&mut self, handle: PeerHandle) -> Option<&mut Peer> {
        self.peers.get_index_mut(handle.0).map(|(_, peer)| peer)
    }

    /// Raise a peer's version to `version`. Regressions are refused.
    /// Returns true when the stored version changed.
    pub(crate) fn raise_version(&mut self, handle: PeerHandle, version: Version) -> bool {
        let Some(peer) = self.peer_mut(handle) else {
            warn!("raise_version on unknown peer {:?}", handle);
            return false;
        };

        if version < peer.current_version {
            warn!(
                "refusing version regression on {}: {} -> {}",
                peer.name, peer.current_version, version
            );
            return false;
        }

        let changed = version != peer.current_version;
        peer.current_version = version;
        changed
    }

    /// Set the arrival flag. Returns true only the first time.
    pub(crate) fn mark_arrived(&mut self, handle: PeerHandle) -> bool {
        match self.peer_mut(handle) {
            Some(peer) if !peer.arrived_at_center => {
                peer.arrived_at_center = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_sync_completed(&mut self, handle: PeerHandle) -> bool {
        match self.peer_mut(handle) {
            Some(peer) if !peer.sync_completed => {
                peer.sync_completed = true;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(GridPos::new(2, 2), 1, 15)
    }

    #[test]
    fn test_layout_matches_five_by_five_cross() {
        let layout = GridLayout::new(5, 5, 1);
        assert_eq!(layout.center(), GridPos::new(2, 2));

        let pivots: Vec<_> = layout
            .cells()
            .filter(|p| layout.flags_for(*p) == RoleFlags::PIVOT)
            .collect();
        let points: Vec<_> = layout
            .cells()
            .filter(|p| layout.flags_for(*p) == RoleFlags::POINT)
            .collect();

        assert_eq!(
            pivots,
            vec![
                GridPos::new(1, 2),
                GridPos::new(2, 1),
                GridPos::new(2, 3),
                GridPos::new(3, 2)
            ]
        );
        assert_eq!(
            points,
            vec![
                GridPos::new(0, 2),
                GridPos::new(2, 0),
                GridPos::new(2, 4),
                GridPos::new(4, 2)
            ]
        );
        assert_eq!(layout.flags_for(GridPos::new(2, 2)), RoleFlags::PLAIN);
        assert_eq!(layout.flags_for(GridPos::new(0, 0)), RoleFlags::PLAIN);
    }

    #[test]
    fn test_layout_wider_pivot_ring() {
        let layout = GridLayout::new(7, 7, 2);
        assert_eq!(layout.flags_for(GridPos::new(3, 1)), RoleFlags::PIVOT);
        assert_eq!(layout.flags_for(GridPos::new(3, 0)), RoleFlags::POINT);
        assert_eq!(layout.flags_for(GridPos::new(5, 3)), RoleFlags::PIVOT);
        assert_eq!(layout.flags_for(GridPos::new(6, 3)), RoleFlags::POINT);
    }

    #[test]
    fn test_layout_zero_radius_has_no_pivots() {
        let layout = GridLayout::new(5, 5, 0);
        let points: Vec<GridPos> = layout
            .cells()
            .filter(|pos| layout.flags_for(*pos) == RoleFlags::POINT)
            .collect();
        assert_eq!(points.len(), 8);
        assert!(points.contains(&GridPos::new(2, 1)));
        assert!(points.contains(&GridPos::new(0, 2)));
        assert!(layout.cells().all(|pos| layout.flags_for(pos) != RoleFlags::PIVOT));
    }

    #[test]
    fn test_register_preserves_insertion_order() {
        let mut reg = registry();
        let a = reg.register_with_version(10, GridPos::new(0, 2), RoleFlags::POINT, 5).unwrap();
        let b = reg.register_with_version(11, GridPos::new(1, 2), RoleFlags::PIVOT, 1).unwrap();
        let c = reg.register_with_version(12, GridPos::new(0, 0), RoleFlags::PLAIN, 3).unwrap();
        let d = reg.register_with_version(13, GridPos::new(4, 2), RoleFlags::POINT, 9).unwrap();

        assert_eq!(reg.points(), &[a, d]);
        assert_eq!(reg.pivots(), &[b]);
        assert_eq!(reg.all().collect::<Vec<_>>(), vec![a, b, c, d]);
        assert_eq!(reg.handle_of(12), Some(c));
        assert_eq!(reg.peer(d).unwrap().name(), "Node-4-2");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = registry();
        reg.register_with_version(1, GridPos::new(0, 0), RoleFlags::PLAIN, 1).unwrap();
        assert_eq!(
            reg.register_with_version(1, GridPos::new(0, 1), RoleFlags::PLAIN, 1),
            Err(RegistryError::DuplicatePeer { node: 1 })
        );
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_invalid_role_combinations_rejected() {
        let mut reg = registry();
        let both = RoleFlags {
            point: true,
            pivot: true,
        };
        assert_eq!(
            reg.register_with_version(1, GridPos::new(2, 1), both, 1),
            Err(RegistryError::InvalidRole {
                pos: GridPos::new(2, 1)
            })
        );
        assert_eq!(
            reg.register_with_version(2, GridPos::new(2, 2), RoleFlags::POINT, 1),
            Err(RegistryError::CenterRole {
                pos: GridPos::new(2, 2)
            })
        );
        assert!(reg.is_empty());

        // the center itself registers fine as plain
        let center = reg.register_with_version(3, GridPos::new(2, 2), RoleFlags::PLAIN, 1).unwrap();
        assert!(reg.is_center(center));
    }

    #[test]
    fn test_sampled_versions_stay_in_range() {
        let mut reg = registry();
        let mut rng = StdRng::from_seed([7u8; 32]);
        for node in 0..200 {
            let h = reg
                .register(node, GridPos::new(node / 5, node % 5 + 10), RoleFlags::PLAIN, &mut rng)
                .unwrap();
            let peer = reg.peer(h).unwrap();
            assert!((1..=15).contains(&peer.initial_version()));
            assert_eq!(peer.initial_version(), peer.current_version());
        }
    }

    #[test]
    fn test_raise_version_never_lowers() {
        let mut reg = registry();
        let h = reg.register_with_version(1, GridPos::new(0, 2), RoleFlags::POINT, 8).unwrap();

        assert!(!reg.raise_version(h, 3));
        assert_eq!(reg.current_version(h), Some(8));

        assert!(reg.raise_version(h, 12));
        assert_eq!(reg.current_version(h), Some(12));
        assert!(!reg.raise_version(h, 12));

        // initial version is untouched
        assert_eq!(reg.peer(h).unwrap().initial_version(), 8);
    }

    #[test]
    fn test_arrival_flag_set_once() {
        let mut reg = registry();
        let h = reg.register_with_version(1, GridPos::new(0, 2), RoleFlags::POINT, 8).unwrap();
        assert!(reg.mark_arrived(h));
        assert!(!reg.mark_arrived(h));
        assert!(reg.peer(h).unwrap().arrived_at_center());
    }
}
